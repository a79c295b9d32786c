//! Configuration sections shared across the workspace.
//!
//! The process reads a single JSON file. Each section below has serde defaults
//! for every field, so a minimal file only needs credentials. The exchange
//! section is defined next to the adapter (`mirror-exchange`); the runner
//! assembles the full document.
//!
//! # Example
//!
//! ```json
//! {
//!   "logging":   { "level": "info", "dir": "/var/log/mirror" },
//!   "binance":   { "api_key": "...", "secret_key": "..." },
//!   "cache":     { "orders_ttl_ms": 15000 },
//!   "reconcile": { "interval_secs": 60, "batch_size": 5, "instruments": ["BTCUSDT"] },
//!   "store":     { "path": "/var/lib/mirror/orders.jsonl" },
//!   "trading":   { "fee_rate": "0.001" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::cache::ttl;

/// Logging section.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for daily-rotating log files; console only when absent.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_module_name")]
    pub module_name: String,
    /// Emit console logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), dir: None, module_name: default_module_name(), json: false }
    }
}

/// TTL tiers for the read cache, in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ticker_ttl")]
    pub ticker_ttl_ms: u64,
    #[serde(default = "default_orders_ttl")]
    pub orders_ttl_ms: u64,
    #[serde(default = "default_balance_ttl")]
    pub balance_ttl_ms: u64,
    #[serde(default = "default_history_ttl")]
    pub order_history_ttl_ms: u64,
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl_ms: u64,
}

impl CacheConfig {
    pub fn ticker_ttl(&self) -> Duration {
        Duration::from_millis(self.ticker_ttl_ms)
    }

    pub fn orders_ttl(&self) -> Duration {
        Duration::from_millis(self.orders_ttl_ms)
    }

    pub fn balance_ttl(&self) -> Duration {
        Duration::from_millis(self.balance_ttl_ms)
    }

    pub fn order_history_ttl(&self) -> Duration {
        Duration::from_millis(self.order_history_ttl_ms)
    }

    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_millis(self.metadata_ttl_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ticker_ttl_ms: default_ticker_ttl(),
            orders_ttl_ms: default_orders_ttl(),
            balance_ttl_ms: default_balance_ttl(),
            order_history_ttl_ms: default_history_ttl(),
            metadata_ttl_ms: default_metadata_ttl(),
        }
    }
}

/// Reconciliation job section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    /// Run the job on a schedule. A manual trigger works either way.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    /// Instruments fetched per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batches, to stay under the exchange's weight limit.
    #[serde(default = "default_batch_delay")]
    pub batch_delay_ms: u64,
    /// Instruments always reconciled, even without open mirror rows.
    #[serde(default)]
    pub instruments: Vec<String>,
    /// How far back to look for unknown orders on watch-list instruments.
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reconcile_interval(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay(),
            instruments: Vec::new(),
            lookback_hours: default_lookback_hours(),
        }
    }
}

/// Order mirror persistence section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Append-only JSON-lines event log. In-memory only when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Trading parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Fee rate used when the exchange does not report a commission.
    #[serde(default = "default_fee_rate")]
    pub fee_rate: Decimal,
    /// Distance between a stop-loss trigger and its limit price, in basis
    /// points, on the side that makes the limit marketable.
    #[serde(default = "default_stop_limit_offset")]
    pub stop_limit_offset_bps: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self { fee_rate: default_fee_rate(), stop_limit_offset_bps: default_stop_limit_offset() }
    }
}

/// Check the numeric sections for values that would stall or spin the job.
pub fn validate_sections(reconcile: &ReconcileConfig, trading: &TradingConfig) -> Result<()> {
    if reconcile.batch_size == 0 {
        bail!("reconcile.batch_size must be at least 1");
    }
    if reconcile.enabled && reconcile.interval_secs == 0 {
        bail!("reconcile.interval_secs must be positive when the schedule is enabled");
    }
    if trading.fee_rate < Decimal::ZERO || trading.fee_rate >= Decimal::ONE {
        bail!("trading.fee_rate must be in [0, 1), got {}", trading.fee_rate);
    }
    if trading.stop_limit_offset_bps >= 10_000 {
        bail!("trading.stop_limit_offset_bps must be below 10000");
    }
    Ok(())
}

/// Load and parse a JSON config file.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Default helpers (used by serde)
// ---------------------------------------------------------------------------

fn default_log_level() -> String {
    "info".into()
}

fn default_module_name() -> String {
    "mirror-runner".into()
}

fn default_true() -> bool {
    true
}

fn default_ticker_ttl() -> u64 {
    ttl::TICKER.as_millis() as u64
}

fn default_orders_ttl() -> u64 {
    ttl::ORDERS.as_millis() as u64
}

fn default_balance_ttl() -> u64 {
    ttl::BALANCE.as_millis() as u64
}

fn default_history_ttl() -> u64 {
    ttl::ORDER_HISTORY.as_millis() as u64
}

fn default_metadata_ttl() -> u64 {
    ttl::METADATA.as_millis() as u64
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_delay() -> u64 {
    1000
}

fn default_lookback_hours() -> u64 {
    24
}

fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3) // 0.1%
}

fn default_stop_limit_offset() -> u32 {
    10
}
