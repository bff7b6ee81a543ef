//! One refresh cycle: ingest, filter, keep the best version of each episode.

use std::future::Future;

use tracing::{info, warn};

use crate::config::FilterConfig;
use crate::dedup::select_versions;
use crate::entry::{Entry, RawItem};
use crate::error::{ConfigError, SenbetsuError};
use crate::feed::FeedState;
use crate::filter::RuleSet;

/// Receives accepted entries in their final order.
///
/// Implementations decide what delivery means: saving a link, downloading
/// the torrent, printing it. Entries already handled in an earlier run
/// should be skipped by the sink itself.
pub trait EntrySink: Send {
    fn deliver(&mut self, entry: &Entry) -> impl Future<Output = Result<(), SenbetsuError>> + Send;
}

/// What a single [`Pipeline::refresh`] produced.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// Entries above the previous watermark.
    pub fresh: usize,
    /// Accepted entries after version selection, sorted by id.
    pub accepted: Vec<Entry>,
}

/// Feed state together with the rules currently in force.
#[derive(Debug, Default)]
pub struct Pipeline {
    state: FeedState,
    rules: RuleSet,
    /// Accepted entries the sink failed to take, oldest first.
    retry: Vec<Entry>,
}

impl Pipeline {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            state: FeedState::new(),
            rules,
            retry: Vec::new(),
        }
    }

    /// Compile `config` and replace the current rules. On error the old
    /// rules stay in force.
    pub fn reload(&mut self, config: &FilterConfig) -> Result<(), ConfigError> {
        self.rules = RuleSet::compile(config)?;
        Ok(())
    }

    pub fn state(&self) -> &FeedState {
        &self.state
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Entries waiting to be handed to a sink again.
    pub fn pending(&self) -> &[Entry] {
        &self.retry
    }

    /// Ingest `items` and return the accepted entries.
    ///
    /// The feed state only advances when every fresh entry was evaluated
    /// without error, so a rule that fails at evaluation time leaves the
    /// same entries pending for the next refresh.
    pub fn refresh(&mut self, items: &[RawItem]) -> Result<RefreshReport, ConfigError> {
        let mut next = self.state.clone();
        let fresh = next.update(items);
        let fresh_count = fresh.len();

        let mut accepted = Vec::new();
        for mut entry in fresh {
            if self.rules.evaluate(&mut entry)? {
                accepted.push(entry);
            }
        }
        let accepted = select_versions(accepted, self.rules.tie_break());

        self.state = next;
        info!(
            fresh = fresh_count,
            accepted = accepted.len(),
            watermark = self.state.watermark(),
            "Refresh complete"
        );
        Ok(RefreshReport {
            fresh: fresh_count,
            accepted,
        })
    }

    /// Hand the pending retries and then `accepted` to `sink`, in order.
    /// Returns how many were delivered.
    ///
    /// An entry the sink rejects is logged and kept for the next call, so it
    /// is not lost now that it sits below the watermark.
    pub async fn deliver<S: EntrySink>(&mut self, sink: &mut S, accepted: Vec<Entry>) -> usize {
        let mut queue = std::mem::take(&mut self.retry);
        queue.extend(accepted);

        let mut delivered = 0;
        for entry in queue {
            match sink.deliver(&entry).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(entry = %entry.label(), error = %e, "Delivery failed, will retry");
                    self.retry.push(entry);
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toml::Value;

    fn item(id: u64, title: &str) -> RawItem {
        RawItem {
            title: title.into(),
            guid: format!("<guid>https://www.tokyotosho.info/details.php?id={id}</guid>"),
            category: "<category>Anime</category>".into(),
            ..Default::default()
        }
    }

    fn filter_config(toml_src: &str) -> FilterConfig {
        toml::from_str(toml_src).unwrap()
    }

    fn pipeline() -> Pipeline {
        let mut p = Pipeline::default();
        p.reload(&filter_config(
            r#"
tie_break = ["ver"]
deny = ['(?i)\braw\b']
accept = ['^\[Group\] (?<name>.+) - (?<ep>\d+)(?:v(?<ver>\d+))?$']
"#,
        ))
        .unwrap();
        p
    }

    fn ids(entries: &[Entry]) -> Vec<u64> {
        entries.iter().filter_map(|e| e.id).collect()
    }

    #[test]
    fn test_refresh_filters_and_selects() {
        let mut p = pipeline();
        let report = p
            .refresh(&[
                item(1, "[Group] Show - 01"),
                item(2, "[Group] Show - 01v2"),
                item(3, "[Group] Show - 02 RAW"),
                item(4, "[Other] Show - 02"),
            ])
            .unwrap();

        assert_eq!(report.fresh, 4);
        assert_eq!(ids(&report.accepted), vec![2]);
        assert_eq!(report.accepted[0].info.as_ref().unwrap().ver, 2);
        assert_eq!(p.state().watermark(), 4);
    }

    #[test]
    fn test_second_refresh_sees_only_new_items() {
        let mut p = pipeline();
        p.refresh(&[item(1, "[Group] Show - 01")]).unwrap();
        let report = p
            .refresh(&[item(1, "[Group] Show - 01"), item(2, "[Group] Show - 02")])
            .unwrap();
        assert_eq!(report.fresh, 1);
        assert_eq!(ids(&report.accepted), vec![2]);
    }

    #[test]
    fn test_failed_evaluation_leaves_state_untouched() {
        let mut p = Pipeline::default();
        p.reload(&filter_config(r#"accept = [{ title = "Show", nonsense = "x" }]"#))
            .unwrap();

        let err = p.refresh(&[item(7, "Show - 01")]).unwrap_err();
        assert!(matches!(err, ConfigError::Evaluation { .. }), "got {err:?}");
        assert_eq!(p.state().watermark(), 0);
        assert!(p.state().entries().is_empty());

        p.reload(&filter_config(r#"accept = ["Show"]"#)).unwrap();
        let report = p.refresh(&[item(7, "Show - 01")]).unwrap();
        assert_eq!(ids(&report.accepted), vec![7]);
    }

    #[test]
    fn test_failed_reload_keeps_old_rules() {
        let mut p = pipeline();
        let broken = filter_config(
            r#"
accept = [{ loop = 1 }]
[macros]
loop = { loop = "$1" }
"#,
        );
        assert!(p.reload(&broken).is_err());
        assert_eq!(p.rules().accept_rules().len(), 1);
        assert_eq!(p.rules().deny_rules().len(), 1);
    }

    struct Collect {
        seen: Vec<u64>,
        fail_on: Option<u64>,
    }

    impl EntrySink for Collect {
        async fn deliver(&mut self, entry: &Entry) -> Result<(), SenbetsuError> {
            let id = entry.require_id()?;
            if self.fail_on == Some(id) {
                return Err(SenbetsuError::Sink(format!("refused {id}")));
            }
            self.seen.push(id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deliver_continues_past_failures() {
        let mut p = pipeline();
        let report = p
            .refresh(&[
                item(1, "[Group] Show - 01"),
                item(2, "[Group] Show - 02"),
                item(3, "[Group] Show - 03"),
            ])
            .unwrap();

        let mut sink = Collect {
            seen: Vec::new(),
            fail_on: Some(2),
        };
        let delivered = p.deliver(&mut sink, report.accepted).await;
        assert_eq!(delivered, 2);
        assert_eq!(sink.seen, vec![1, 3]);
        assert_eq!(ids(p.pending()), vec![2]);
    }

    #[tokio::test]
    async fn test_failed_delivery_retried_next_cycle() {
        let mut p = pipeline();
        let mut sink = Collect {
            seen: Vec::new(),
            fail_on: Some(1),
        };
        let report = p.refresh(&[item(1, "[Group] Show - 01")]).unwrap();
        assert_eq!(p.deliver(&mut sink, report.accepted).await, 0);
        assert_eq!(p.state().watermark(), 1);

        // Same feed again: nothing fresh, but the held entry goes out first.
        sink.fail_on = None;
        let report = p
            .refresh(&[item(1, "[Group] Show - 01"), item(2, "[Group] Show - 02")])
            .unwrap();
        assert_eq!(report.fresh, 1);
        assert_eq!(p.deliver(&mut sink, report.accepted).await, 2);
        assert_eq!(sink.seen, vec![1, 2]);
        assert!(p.pending().is_empty());
    }

    #[test]
    fn test_toml_value_rules_accepted() {
        let mut config = FilterConfig::default();
        config.accept.push(Value::String("Show".into()));
        let mut p = Pipeline::default();
        p.reload(&config).unwrap();
        assert_eq!(p.rules().accept_rules().len(), 1);
    }
}
