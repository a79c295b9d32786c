//! # mirror-exchange
//!
//! Exchange access for the order mirror:
//!
//! - [`ExchangeApi`]: the typed, exchange-agnostic interface
//! - [`binance`]: Binance Spot REST implementation
//! - [`gateway`]: TTL cache + single-flight front for reads
//! - [`retry`]: exponential backoff for idempotent reads

pub mod binance;
pub mod gateway;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirror_core::error::ExchangeResult;
use mirror_core::{
    AccountBalance, ExchangeInfo, ExchangeOrder, Kline, OcoList, OcoRequest, OrderQuery, OrderRequest, Ticker,
};

pub use binance::BinanceExchange;
pub use gateway::{CachedGateway, GatewayStats};

/// Kline intervals accepted by [`ExchangeApi::klines`].
pub const KLINE_INTERVALS: &[&str] =
    &["1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M"];

/// Typed exchange interface.
///
/// Every method returns a classified [`ExchangeError`](mirror_core::error::ExchangeError).
/// Implementations must be `Send + Sync` so one instance can be shared
/// behind an `Arc` by the gateway, the OCO manager, and the reconciliation
/// job.
///
/// Read methods may be retried internally; `place_*` and `cancel_*` are
/// attempted exactly once.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Exchange name for logs (e.g. `"binance"`).
    fn name(&self) -> &str;

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>>;

    async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo>;

    async fn ticker_24h(&self, instrument: &str) -> ExchangeResult<Ticker>;

    async fn klines(&self, instrument: &str, interval: &str, limit: u32) -> ExchangeResult<Vec<Kline>>;

    /// Account snapshot with non-zero balances.
    async fn account(&self) -> ExchangeResult<AccountBalance>;

    /// Open orders, for one instrument or all of them.
    async fn open_orders(&self, instrument: Option<&str>) -> ExchangeResult<Vec<ExchangeOrder>>;

    /// Order history for one instrument.
    async fn all_orders(&self, query: &OrderQuery) -> ExchangeResult<Vec<ExchangeOrder>>;

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<ExchangeOrder>;

    async fn cancel_order(&self, instrument: &str, order_id: u64) -> ExchangeResult<ExchangeOrder>;

    /// Place a take-profit / stop-loss pair as one order list.
    async fn place_oco(&self, request: &OcoRequest) -> ExchangeResult<OcoList>;

    /// Cancel a whole order list.
    async fn cancel_oco(&self, instrument: &str, order_list_id: i64) -> ExchangeResult<OcoList>;
}
