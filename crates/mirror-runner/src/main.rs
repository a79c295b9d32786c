//! # mirror-runner
//!
//! Entry point for the order mirror.
//!
//! Loads a JSON configuration file, connects the Binance adapter, opens the
//! order store, and either runs the reconciliation schedule until Ctrl+C or
//! executes a single command and prints its result as JSON.
//!
//! # Usage
//!
//! ```bash
//! mirror-runner config.json                      # run the schedule
//! mirror-runner config.json reconcile            # one pass, print the report
//! mirror-runner config.json trades --limit 20    # closed trades
//! mirror-runner config.json stats                # cache / job health
//! ```

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mirror_engine::{FileOrderStore, MemoryOrderStore, MirrorService, OrderStore};
use mirror_exchange::BinanceExchange;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::AppConfig;

/// Exchange order mirror and reconciliation runner.
#[derive(Parser)]
#[command(name = "mirror-runner", about = "Exchange order mirror and reconciliation runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Optional log directory for file output. Overrides the config file.
    #[arg(long)]
    log_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Default)]
enum Command {
    /// Run the reconciliation schedule until Ctrl+C (default).
    #[default]
    Run,
    /// Run one reconciliation pass and print the report.
    Reconcile,
    /// Print closed trades, most recent first.
    Trades {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print cache and reconciliation statistics.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (before logging, which it configures)
    let config = AppConfig::load(&cli.config)?;

    // 2. Initialize logging
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level);
    let log_dir = cli.log_dir.as_deref().or(config.logging.dir.as_deref());
    mirror_core::logging::init_logging(level, log_dir, &config.logging.module_name, config.logging.json);
    info!(config = %cli.config.display(), level, "mirror-runner starting");

    // 3. Wire the service
    let service = build_service(&config)?;

    // 4. Dispatch
    match cli.command.unwrap_or_default() {
        Command::Run => run(&service).await?,
        Command::Reconcile => match service.trigger_reconciliation().await? {
            Some(report) => print_json(&report)?,
            None => warn!("reconciliation already in progress"),
        },
        Command::Trades { limit } => print_json(&service.closed_trades(limit, None).await?)?,
        Command::Stats => print_json(&service.cache_stats().await?)?,
    }
    Ok(())
}

fn build_service(config: &AppConfig) -> Result<MirrorService> {
    let exchange = BinanceExchange::new(&config.binance).context("failed to build the Binance adapter")?;

    let store: Arc<dyn OrderStore> = match &config.store.path {
        Some(path) => {
            let store = FileOrderStore::open(path)
                .with_context(|| format!("failed to open order store {}", path.display()))?;
            info!(path = %path.display(), rows = store.len(), "order store opened");
            Arc::new(store)
        }
        None => {
            warn!("store.path not set, the order mirror will not survive a restart");
            Arc::new(MemoryOrderStore::new())
        }
    };

    Ok(MirrorService::new(Arc::new(exchange), store, config.settings()))
}

async fn run(service: &MirrorService) -> Result<()> {
    if service.start_scheduler() {
        info!("reconciliation scheduled, press Ctrl+C to stop");
    } else {
        info!("no schedule configured, press Ctrl+C to stop");
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    service.stop_scheduler();
    info!("goodbye");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
