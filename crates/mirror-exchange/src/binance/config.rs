//! Binance adapter configuration.
//!
//! Every field has a production default, so a config only needs
//! credentials. Empty credentials fall back to the `BINANCE_API_KEY` and
//! `BINANCE_API_SECRET` environment variables; if those are missing too,
//! signed calls fail with `NotConfigured` before touching the network.

use std::time::Duration;

use serde::Deserialize;

use crate::retry::RetryConfig;

pub const API_KEY_ENV: &str = "BINANCE_API_KEY";
pub const API_SECRET_ENV: &str = "BINANCE_API_SECRET";

/// Configuration for the Binance spot adapter.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    /// Binance API key.
    #[serde(default)]
    pub api_key: String,

    /// Binance API secret (HMAC-SHA256 signing).
    #[serde(default)]
    pub secret_key: String,

    /// Spot REST API base URL.
    #[serde(default = "default_rest_url")]
    pub rest_url: String,

    /// `recvWindow` for signed requests (milliseconds).
    #[serde(default = "default_recv_window")]
    pub recv_window: u64,

    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    // -- Read retries --
    #[serde(default = "default_max_read_retries")]
    pub max_read_retries: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,

    /// How often the server-time offset is re-measured.
    #[serde(default = "default_time_sync_interval")]
    pub time_sync_interval_secs: u64,
}

impl BinanceConfig {
    /// Fill empty credentials from the environment.
    pub fn with_env_credentials(mut self) -> Self {
        if self.api_key.is_empty() {
            self.api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
        }
        if self.secret_key.is_empty() {
            self.secret_key = std::env::var(API_SECRET_ENV).unwrap_or_default();
        }
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn time_sync_interval(&self) -> Duration {
        Duration::from_secs(self.time_sync_interval_secs)
    }

    /// Worst-case duration of one read: every attempt timing out plus the
    /// longest backoff between attempts.
    pub fn read_budget(&self) -> Duration {
        let attempts = self.max_read_retries + 1;
        self.timeout() * attempts + Duration::from_millis(self.retry_max_delay_ms) * self.max_read_retries
    }

    pub fn read_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_read_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            rest_url: default_rest_url(),
            recv_window: default_recv_window(),
            timeout_ms: default_timeout_ms(),
            max_read_retries: default_max_read_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            time_sync_interval_secs: default_time_sync_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default helpers (used by serde)
// ---------------------------------------------------------------------------

fn default_rest_url() -> String {
    "https://api.binance.com".into()
}

fn default_recv_window() -> u64 {
    5000
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_read_retries() -> u32 {
    2
}

fn default_retry_base_delay() -> u64 {
    250
}

fn default_retry_max_delay() -> u64 {
    4000
}

fn default_time_sync_interval() -> u64 {
    300
}
