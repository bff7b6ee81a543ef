use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use senbetsu_core::RuleSet;
use senbetsu_runtime::{load_config, Runtime, RuntimeOptions};

/// Filter a torrent RSS feed through deny/accept rules.
#[derive(Parser, Debug)]
#[command(name = "senbetsu", version, long_about = None)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print accepted entries as JSON lines instead of saving them
    #[arg(long, global = true)]
    dry_run: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Poll the feed until interrupted
    Run,
    /// Fetch and filter the feed once
    Once,
    /// Validate the config and compile its rules without fetching
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "senbetsu=debug,senbetsu_core=debug,senbetsu_runtime=debug"
    } else {
        "senbetsu=info,senbetsu_core=info,senbetsu_runtime=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = RuntimeOptions {
        config_path: cli.config,
        dry_run: cli.dry_run,
    };

    let result = match cli.command {
        Command::Check => check(&options),
        Command::Once => once(options).await,
        Command::Run => run(options).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn check(options: &RuntimeOptions) -> Result<(), String> {
    let config = load_config(options).map_err(|e| e.to_string())?;
    let rules = RuleSet::compile(&config.filter).map_err(|e| e.to_string())?;
    println!(
        "ok: {} deny, {} accept, tie-break {:?}",
        rules.deny_rules().len(),
        rules.accept_rules().len(),
        rules.tie_break().keys()
    );
    Ok(())
}

async fn once(options: RuntimeOptions) -> Result<(), String> {
    let mut runtime = Runtime::new(options).map_err(|e| e.to_string())?;
    runtime.run_once().await.map_err(|e| e.to_string())?;
    Ok(())
}

async fn run(options: RuntimeOptions) -> Result<(), String> {
    let mut runtime = Runtime::new(options).map_err(|e| e.to_string())?;
    info!(
        url = %runtime.config().feed.url,
        interval_secs = runtime.config().feed.interval_secs,
        "Polling feed"
    );
    runtime
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await;
    Ok(())
}
