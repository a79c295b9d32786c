//! Reference prices for bracket validation.

use std::sync::Arc;

use async_trait::async_trait;
use mirror_core::error::{ExchangeError, ExchangeResult};
use mirror_exchange::CachedGateway;
use rust_decimal::Decimal;

/// Source of a current price used to sanity-check bracket levels.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn reference_price(&self, instrument: &str) -> ExchangeResult<Decimal>;
}

/// Last trade price from the cached 24h ticker.
pub struct TickerPriceSource {
    gateway: Arc<CachedGateway>,
}

impl TickerPriceSource {
    pub fn new(gateway: Arc<CachedGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl PriceSource for TickerPriceSource {
    async fn reference_price(&self, instrument: &str) -> ExchangeResult<Decimal> {
        let ticker = self.gateway.ticker(instrument).await?;
        if ticker.last_price <= Decimal::ZERO {
            return Err(ExchangeError::upstream(format!("no usable last price for {instrument}")));
        }
        Ok(ticker.last_price)
    }
}
