//! Feed polling around the `senbetsu-core` pipeline: fetch, filter, deliver.

mod fetch;
mod ledger;
mod sink;

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use senbetsu_core::{AppConfig, ConfigError, Pipeline, RuleSet};

pub use fetch::{fetch_feed, parse_items};
pub use ledger::Ledger;
pub use sink::{LinkSink, OutputSink, PrintSink};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("fetch error: {0}")]
    Fetch(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the runtime was started.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Explicit config file. Falls back to [`AppConfig::load`].
    pub config_path: Option<PathBuf>,
    /// Print accepted entries instead of saving them.
    pub dry_run: bool,
}

/// Counts from one fetch-filter-deliver cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub fetched: usize,
    pub fresh: usize,
    pub accepted: usize,
    pub delivered: usize,
    /// Entries held back for the next cycle after a failed delivery.
    pub pending: usize,
}

pub struct Runtime {
    options: RuntimeOptions,
    config: AppConfig,
    client: reqwest::Client,
    pipeline: Pipeline,
}

impl Runtime {
    /// Load the config and compile its rules. A broken config is fatal here.
    pub fn new(options: RuntimeOptions) -> Result<Self, RuntimeError> {
        let config = load_config(&options)?;
        let rules = RuleSet::compile(&config.filter)?;
        let client = reqwest::Client::builder()
            .user_agent(concat!("senbetsu/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RuntimeError::Fetch(format!("http client: {e}")))?;

        Ok(Self {
            options,
            config,
            client,
            pipeline: Pipeline::new(rules),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Re-read the config file and swap in its rules. On error the current
    /// config and rules stay in force.
    pub fn reload(&mut self) -> Result<(), RuntimeError> {
        let config = load_config(&self.options)?;
        self.pipeline.reload(&config.filter)?;
        self.config = config;
        Ok(())
    }

    /// Fetch the feed once and deliver what the rules accept.
    ///
    /// The sink is opened before the feed state advances, so an unusable
    /// output leaves every entry fresh for the next cycle.
    pub async fn run_once(&mut self) -> Result<CycleReport, RuntimeError> {
        let items = fetch_feed(&self.client, &self.config.feed).await?;
        let mut sink = self.open_sink()?;
        let report = self.pipeline.refresh(&items)?;

        let accepted = report.accepted.len();
        let delivered = self.pipeline.deliver(&mut sink, report.accepted).await;

        let cycle = CycleReport {
            fetched: items.len(),
            fresh: report.fresh,
            accepted,
            delivered,
            pending: self.pipeline.pending().len(),
        };
        info!(
            fetched = cycle.fetched,
            fresh = cycle.fresh,
            accepted = cycle.accepted,
            delivered = cycle.delivered,
            pending = cycle.pending,
            "Cycle finished"
        );
        Ok(cycle)
    }

    /// Poll until `shutdown` resolves. The config is re-read before every
    /// cycle; a failed reload or cycle is logged and the loop carries on.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        let mut period = self.poll_period();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.reload() {
                warn!(error = %e, "Config reload failed, keeping previous rules");
            }
            if let Err(e) = self.run_once().await {
                error!(error = %e, "Cycle failed");
            }

            let next = self.poll_period();
            if next != period {
                info!(secs = next.as_secs(), "Poll interval changed");
                period = next;
                ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            }
        }
    }

    fn poll_period(&self) -> Duration {
        Duration::from_secs(self.config.feed.interval_secs.max(1))
    }

    fn open_sink(&self) -> Result<OutputSink, RuntimeError> {
        if self.options.dry_run {
            return Ok(OutputSink::Print(PrintSink::new(std::io::stdout())));
        }
        let output = &self.config.output;
        let ledger = Ledger::load(&output.ledger_path())?;
        Ok(OutputSink::Links(LinkSink::new(
            self.client.clone(),
            output.links_path(),
            output.torrent_dir.clone(),
            ledger,
        )))
    }
}

/// Load the config named by `options`, or the default location.
pub fn load_config(options: &RuntimeOptions) -> Result<AppConfig, ConfigError> {
    match &options.config_path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}
