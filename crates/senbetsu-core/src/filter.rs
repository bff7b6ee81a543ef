use std::borrow::Cow;
use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, info};

use crate::config::FilterConfig;
use crate::entry::{Entry, EntryField};
use crate::error::{ConfigError, RuleList};
use crate::info::{Info, InfoKey, InfoValue, TieBreakOrder};
use crate::rules::{compile_rules, Condition, MacroSet, Rule, Scalar, Target};

/// Compiled deny and accept lists plus the tie-break order they were loaded with.
///
/// Built in one piece by [`RuleSet::compile`]; a reload replaces the whole value.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    deny: Vec<Rule>,
    accept: Vec<Rule>,
    tie_break: TieBreakOrder,
}

/// Which rule matched, and the Info it produced.
#[derive(Debug, Clone)]
pub struct RuleMatch {
    pub index: usize,
    pub info: Option<Info>,
}

impl RuleSet {
    pub fn new(deny: Vec<Rule>, accept: Vec<Rule>, tie_break: TieBreakOrder) -> Self {
        Self {
            deny,
            accept,
            tie_break,
        }
    }

    /// Expand macros and compile both lists. Nothing is kept on failure.
    pub fn compile(config: &FilterConfig) -> Result<Self, ConfigError> {
        let macros = MacroSet::new(&config.macros)?;
        let deny = compile_rules(&macros, &config.deny, RuleList::Deny)?;
        let accept = compile_rules(&macros, &config.accept, RuleList::Accept)?;
        let tie_break = TieBreakOrder::parse(&config.tie_break)?;
        info!(
            deny = deny.len(),
            accept = accept.len(),
            tie_break = ?tie_break.keys(),
            "Compiled rule set"
        );
        Ok(Self::new(deny, accept, tie_break))
    }

    pub fn tie_break(&self) -> &TieBreakOrder {
        &self.tie_break
    }

    pub fn deny_rules(&self) -> &[Rule] {
        &self.deny
    }

    pub fn accept_rules(&self) -> &[Rule] {
        &self.accept
    }

    /// Deny first, then accept. On acceptance the entry's `info` is set.
    pub fn evaluate(&self, entry: &mut Entry) -> Result<bool, ConfigError> {
        if let Some(hit) = find_match(&self.deny, entry, RuleList::Deny)? {
            debug!(entry = %entry.label(), rule = hit.index, "Denied");
            return Ok(false);
        }
        match find_match(&self.accept, entry, RuleList::Accept)? {
            Some(hit) => {
                debug!(
                    entry = %entry.label(),
                    rule = hit.index,
                    info = ?hit.info,
                    "Accepted"
                );
                entry.info = hit.info;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// First rule in `rules` that the entry satisfies.
pub fn find_match(
    rules: &[Rule],
    entry: &Entry,
    list: RuleList,
) -> Result<Option<RuleMatch>, ConfigError> {
    for (index, rule) in rules.iter().enumerate() {
        let outcome = match_rule(rule, entry).map_err(|e| ConfigError::Evaluation {
            list,
            index,
            entry: entry.label(),
            source: Box::new(e),
        })?;
        if let Outcome::Hit(info) = outcome {
            return Ok(Some(RuleMatch { index, info }));
        }
    }
    Ok(None)
}

enum Outcome {
    Miss,
    Hit(Option<Info>),
}

/// Named captures of the retained regex match. Groups that did not
/// participate map to `None`.
#[derive(Debug)]
struct Captured {
    groups: HashMap<String, Option<String>>,
}

impl Captured {
    fn new(regex: &Regex, caps: &regex::Captures<'_>) -> Self {
        let groups = regex
            .capture_names()
            .flatten()
            .map(|name| (name.to_string(), caps.name(name).map(|m| m.as_str().to_string())))
            .collect();
        Self { groups }
    }
}

fn match_rule(rule: &Rule, entry: &Entry) -> Result<Outcome, ConfigError> {
    let mut captured: Option<Captured> = None;
    let mut deferred: Vec<(InfoKey, &Scalar)> = Vec::new();

    for condition in &rule.conditions {
        let satisfied = match condition {
            Condition::LiteralMatch { field, value } => entry
                .field(*field)
                .is_some_and(|s| s == value.to_string().as_str()),
            Condition::SetMatch { target, values } => {
                match target_text(target, entry, captured.as_ref())? {
                    Some(s) => values.iter().any(|v| s == v.to_string()),
                    None => false,
                }
            }
            Condition::RegexMatch { target, regex } => {
                let text = target_text(target, entry, captured.as_ref())?;
                let hit = text
                    .as_deref()
                    .and_then(|s| regex.captures(s))
                    .map(|c| Captured::new(regex, &c));
                match hit {
                    Some(hit) => {
                        // The title match is the canonical capture source.
                        let is_title = *target == Target::Field(EntryField::Title);
                        if is_title || captured.is_none() {
                            captured = Some(hit);
                        }
                        true
                    }
                    None => false,
                }
            }
            Condition::CaptureGate { name, value } => {
                let Some(groups) = captured.as_ref().map(|c| &c.groups) else {
                    return Err(ConfigError::UnknownSelector(name.clone()));
                };
                if !is_captured(groups, name) {
                    return Err(ConfigError::UnknownSelector(name.clone()));
                }
                // Info keys are re-checked once the Info is derived; any other
                // capture only has to exist.
                if let Some(key) = InfoKey::from_name(name) {
                    deferred.push((key, value));
                }
                true
            }
        };
        if !satisfied {
            return Ok(Outcome::Miss);
        }
    }

    let info = captured.map(|c| Info::from_captures(&c.groups));
    if !deferred.is_empty() {
        let Some(info) = &info else {
            return Ok(Outcome::Miss);
        };
        let all_hold = deferred.iter().all(|(key, value)| match info.get(*key) {
            InfoValue::Range(range) => value.as_int().is_some_and(|n| range.contains(&n)),
            InfoValue::Int(n) => value.as_int() == Some(n),
            InfoValue::Text(text) => text == Some(value.to_string().as_str()),
        });
        if !all_hold {
            return Ok(Outcome::Miss);
        }
    }
    Ok(Outcome::Hit(info.filter(Info::has_identity)))
}

/// Text a set or regex condition reads from. Capture targets must name a
/// group of the retained match.
fn target_text<'e>(
    target: &Target,
    entry: &'e Entry,
    captured: Option<&Captured>,
) -> Result<Option<Cow<'e, str>>, ConfigError> {
    match target {
        Target::Field(field) => Ok(entry.field(*field)),
        Target::Capture(name) => match captured.and_then(|c| c.groups.get(name.as_str())) {
            Some(text) => Ok(text.clone().map(Cow::Owned)),
            None => Err(ConfigError::UnknownSelector(name.clone())),
        },
    }
}

/// Whether the retained match defines the group `name`. `eps` is derived
/// from `ep` and counts as captured whenever `ep` is.
fn is_captured(groups: &HashMap<String, Option<String>>, name: &str) -> bool {
    groups.contains_key(name)
        || (name == InfoKey::Eps.name() && groups.contains_key(InfoKey::Ep.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::RawItem;
    use toml::{Table, Value};

    fn entry(id: u64, title: &str) -> Entry {
        Entry::extract(&RawItem {
            title: title.into(),
            guid: format!("<guid>http://example.org/?id={id}</guid>"),
            category: "<category>Anime</category>".into(),
            link: format!("http://example.org/{id}.torrent"),
            ..Default::default()
        })
    }

    fn rules(src: &str) -> Vec<Rule> {
        let table: Table = toml::from_str(src).unwrap();
        let fragments = table
            .get("rules")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        compile_rules(&MacroSet::default(), &fragments, RuleList::Accept).unwrap()
    }

    fn rule_set(deny: &str, accept: &str) -> RuleSet {
        RuleSet::new(rules(deny), rules(accept), TieBreakOrder::default())
    }

    #[test]
    fn test_selector_on_capture() {
        let set = rule_set(
            "",
            r#"rules = [{ title = '(?<name>\w+) (?<res>\d+)p', res = 1080 }]"#,
        );
        let mut hd = entry(1, "Show 1080p");
        let mut sd = entry(2, "Show 720p");
        assert!(set.evaluate(&mut hd).unwrap());
        assert!(!set.evaluate(&mut sd).unwrap());
        assert!(sd.info.is_none());
    }

    #[test]
    fn test_info_attached_with_defaults() {
        let set = rule_set("", r#"rules = ['^(?<name>.+) - (?<ep>\d+)$']"#);
        let mut e = entry(1, "Frieren - 05");
        assert!(set.evaluate(&mut e).unwrap());
        let info = e.info.unwrap();
        assert_eq!(info.name, "Frieren");
        assert_eq!(info.ep, 5);
        assert_eq!(info.endep, 5);
        assert_eq!(info.eps(), 5..=5);
        assert_eq!(info.res, -1);
    }

    #[test]
    fn test_deny_precedes_accept() {
        let set = rule_set(r#"rules = ["(?i)raw"]"#, r#"rules = ["Frieren"]"#);
        let mut raw = entry(1, "Frieren - 05 RAW");
        let mut sub = entry(2, "Frieren - 05");
        assert!(!set.evaluate(&mut raw).unwrap());
        assert!(set.evaluate(&mut sub).unwrap());
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let accept = rules(
            r#"rules = ['(?<name>Frieren) - (?<ep>\d+)', '(?<name>Frier)en - (?<ep>\d+)']"#,
        );
        let e = entry(1, "Frieren - 02");
        let hit = find_match(&accept, &e, RuleList::Accept).unwrap().unwrap();
        assert_eq!(hit.index, 0);
        assert_eq!(hit.info.unwrap().name, "Frieren");
    }

    #[test]
    fn test_set_and_literal_fields() {
        let set = rule_set(
            "",
            r#"rules = [{ title = "Frieren", category = ["Music", "Anime"], authorized = false }]"#,
        );
        let mut e = entry(1, "Frieren - 01");
        assert!(set.evaluate(&mut e).unwrap());
        // Matched without name/ep captures: accepted, no Info.
        assert!(e.info.is_none());
    }

    #[test]
    fn test_episode_range_containment() {
        let set = rule_set(
            "",
            r#"rules = [{ title = '(?<name>.+) - (?<ep>\d+)-(?<endep>\d+)', eps = 7 }]"#,
        );
        let mut batch = entry(1, "Frieren - 01-12");
        let mut later = entry(2, "Frieren - 13-24");
        assert!(set.evaluate(&mut batch).unwrap());
        assert!(!set.evaluate(&mut later).unwrap());
    }

    #[test]
    fn test_non_info_capture_only_has_to_exist() {
        let set = rule_set(
            "",
            r#"rules = [{ title = '^\[(?<lang>\w+)\] (?<name>.+)', lang = "en" }]"#,
        );
        let mut de = entry(2, "[de] Show");
        assert!(set.evaluate(&mut de).unwrap());
        assert_eq!(de.info.unwrap().name, "Show");
    }

    #[test]
    fn test_group_literal_against_info() {
        let set = rule_set(
            "",
            r#"rules = [{ title = '^\[(?<group>[^\]]+)\] (?<name>.+) - (?<ep>\d+)', group = "Commie" }]"#,
        );
        let mut commie = entry(1, "[Commie] Frieren - 01");
        let mut other = entry(2, "[Other] Frieren - 01");
        assert!(set.evaluate(&mut commie).unwrap());
        assert_eq!(commie.info.unwrap().group.as_deref(), Some("Commie"));
        assert!(!set.evaluate(&mut other).unwrap());
    }

    #[test]
    fn test_unknown_selector_is_configuration_error() {
        let set = rule_set("", r#"rules = [{ title = '(?<name>\w+)', quality = "good" }]"#);
        let mut e = entry(7, "Show 1080p");
        let err = set.evaluate(&mut e).unwrap_err();
        match &err {
            ConfigError::Evaluation {
                list,
                index,
                entry,
                source,
            } => {
                assert_eq!(*list, RuleList::Accept);
                assert_eq!(*index, 0);
                assert!(entry.contains("#7"));
                assert!(matches!(**source, ConfigError::UnknownSelector(ref s) if s == "quality"));
            }
            other => panic!("Expected Evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn test_info_key_without_capture_is_configuration_error() {
        let set = rule_set("", r#"rules = [{ title = '(?<name>\w+)', res = 1080 }]"#);
        let mut e = entry(3, "Show");
        match set.evaluate(&mut e) {
            Err(ConfigError::Evaluation { source, .. }) => {
                assert!(matches!(*source, ConfigError::UnknownSelector(ref s) if s == "res"));
            }
            other => panic!("Expected Evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn test_eps_needs_only_ep_capture() {
        let set = rule_set("", r#"rules = [{ title = '(?<name>.+) - (?<ep>\d+)', eps = 4 }]"#);
        let mut e = entry(1, "Frieren - 04");
        assert!(set.evaluate(&mut e).unwrap());
    }

    #[test]
    fn test_capture_set_without_group_is_error() {
        let set = rule_set("", r#"rules = [{ title = '(?<name>\w+)', ver = [1, 2] }]"#);
        let mut e = entry(1, "Show");
        assert!(set.evaluate(&mut e).is_err());
    }

    #[test]
    fn test_capture_gate_without_title_regex_is_error() {
        let set = rule_set("", r#"rules = [{ category = "Anime", lang = "en" }]"#);
        let mut e = entry(1, "Frieren");
        assert!(set.evaluate(&mut e).is_err());
    }

    #[test]
    fn test_title_miss_short_circuits_before_unknown_selector() {
        let set = rule_set("", r#"rules = [{ title = "Nope", quality = "good" }]"#);
        let mut e = entry(1, "Frieren");
        assert!(!set.evaluate(&mut e).unwrap());
    }

    #[test]
    fn test_compile_from_config() {
        let config: FilterConfig = toml::from_str(
            r#"
tie_break = ["ver", "res"]
deny = ["(?i)raw"]
accept = [{ sub = "Commie" }]

[macros]
sub = '^\[$1\] (?<name>.+) - (?<ep>\d+)'
"#,
        )
        .unwrap();
        let set = RuleSet::compile(&config).unwrap();
        assert_eq!(set.deny_rules().len(), 1);
        assert_eq!(set.accept_rules().len(), 1);
        assert_eq!(set.tie_break().keys(), &[InfoKey::Ver, InfoKey::Res]);

        let mut e = entry(1, "[Commie] Frieren - 03");
        assert!(set.evaluate(&mut e).unwrap());
        assert_eq!(e.info.unwrap().ep, 3);
    }
}
