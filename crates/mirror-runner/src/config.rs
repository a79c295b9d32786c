//! Runner configuration file.

use std::path::Path;

use anyhow::{Result, bail};
use mirror_core::config::{
    CacheConfig, LoggingConfig, ReconcileConfig, StoreConfig, TradingConfig, load_json, validate_sections,
};
use mirror_engine::MirrorSettings;
use mirror_exchange::binance::config::BinanceConfig;
use serde::Deserialize;

/// Root config document. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub binance: BinanceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub trading: TradingConfig,
}

impl AppConfig {
    /// Load, fill credentials from the environment, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Self = load_json(path)?;
        config.binance = config.binance.with_env_credentials();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_sections(&self.reconcile, &self.trading)?;
        if self.binance.timeout_ms == 0 {
            bail!("binance.timeout_ms must be positive");
        }
        if self.binance.rest_url.trim().is_empty() {
            bail!("binance.rest_url is empty");
        }
        Ok(())
    }

    pub fn settings(&self) -> MirrorSettings {
        MirrorSettings {
            cache: self.cache.clone(),
            reconcile: self.reconcile.clone(),
            trading: self.trading.clone(),
            flight_timeout: self.binance.read_budget(),
        }
    }
}
