//! Cached, coalesced read path in front of an [`ExchangeApi`].
//!
//! ```text
//! read(key) ──► cache hit? ──yes──► value
//!                  │ no
//!                  ▼
//!           single-flight(key) ──► cache re-check ──► exchange ──► cache.set
//! ```
//!
//! The re-check inside the flight covers a caller that missed the cache just
//! as a previous flight was storing its result. Failed fetches are never
//! cached, and neither are results of fetches that were already running
//! when their keys were invalidated.
//!
//! # Keys
//!
//! | Key                                         | TTL tier       |
//! |---------------------------------------------|----------------|
//! | `account:balance`                           | balance        |
//! | `orders:open:<INST or *>`                   | orders         |
//! | `orders:all:<INST>:<id>:<from>:<to>:<lim>`  | order history  |
//! | `ticker:<INST>`                             | ticker         |
//! | `klines:<INST>:<interval>:<limit>`          | ticker         |
//! | `exchange:info`                             | metadata       |
//!
//! Writes bypass this type entirely; callers invalidate the `orders:` (and
//! `account:`) prefixes after a successful write.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mirror_core::cache::{CacheStore, CacheStoreStats};
use mirror_core::config::CacheConfig;
use mirror_core::error::{ExchangeError, ExchangeResult};
use mirror_core::single_flight::{SingleFlight, SingleFlightStats};
use mirror_core::{AccountBalance, ExchangeInfo, ExchangeOrder, Kline, OrderQuery, Ticker};
use serde::Serialize;
use tracing::debug;

use crate::ExchangeApi;

pub const KEY_ACCOUNT: &str = "account:balance";
pub const KEY_EXCHANGE_INFO: &str = "exchange:info";
pub const PREFIX_ORDERS: &str = "orders:";
pub const PREFIX_ACCOUNT: &str = "account:";

/// Everything the gateway can cache, in one cloneable enum.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPayload {
    Account(AccountBalance),
    Orders(Vec<ExchangeOrder>),
    Ticker(Ticker),
    Klines(Vec<Kline>),
    ExchangeInfo(ExchangeInfo),
}

/// Conversion between a payload type and its [`CachedPayload`] variant.
trait Payload: Sized {
    fn wrap(self) -> CachedPayload;
    fn unwrap(payload: CachedPayload) -> Option<Self>;
}

macro_rules! payload {
    ($ty:ty, $variant:ident) => {
        impl Payload for $ty {
            fn wrap(self) -> CachedPayload {
                CachedPayload::$variant(self)
            }

            fn unwrap(payload: CachedPayload) -> Option<Self> {
                match payload {
                    CachedPayload::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

payload!(AccountBalance, Account);
payload!(Vec<ExchangeOrder>, Orders);
payload!(Ticker, Ticker);
payload!(Vec<Kline>, Klines);
payload!(ExchangeInfo, ExchangeInfo);

/// Cache and coalescing counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub cache: CacheStoreStats,
    pub flights: SingleFlightStats,
}

/// Read-through cache with single-flight coalescing.
pub struct CachedGateway {
    api: Arc<dyn ExchangeApi>,
    cache: Arc<CacheStore<CachedPayload>>,
    flights: SingleFlight<CachedPayload>,
    ttls: CacheConfig,
}

impl CachedGateway {
    /// `flight_timeout` bounds each coalesced fetch; it should be at least
    /// the adapter's worst-case retry time.
    pub fn new(api: Arc<dyn ExchangeApi>, ttls: CacheConfig, flight_timeout: Duration) -> Self {
        Self {
            api,
            cache: Arc::new(CacheStore::new()),
            flights: SingleFlight::new().with_timeout(flight_timeout),
            ttls,
        }
    }

    /// The uncached exchange, for writes and live reads.
    pub fn api(&self) -> &Arc<dyn ExchangeApi> {
        &self.api
    }

    // -----------------------------------------------------------------------
    // Cached reads
    // -----------------------------------------------------------------------

    pub async fn account(&self) -> ExchangeResult<AccountBalance> {
        let api = Arc::clone(&self.api);
        self.read(KEY_ACCOUNT.to_owned(), self.ttls.balance_ttl(), move || async move { api.account().await })
            .await
    }

    pub async fn open_orders(&self, instrument: Option<&str>) -> ExchangeResult<Vec<ExchangeOrder>> {
        let key = format!("{PREFIX_ORDERS}open:{}", instrument.unwrap_or("*"));
        let api = Arc::clone(&self.api);
        let instrument = instrument.map(str::to_owned);
        self.read(key, self.ttls.orders_ttl(), move || async move { api.open_orders(instrument.as_deref()).await })
            .await
    }

    pub async fn all_orders(&self, query: &OrderQuery) -> ExchangeResult<Vec<ExchangeOrder>> {
        let key = format!("{PREFIX_ORDERS}all:{}", query.cache_fragment());
        let api = Arc::clone(&self.api);
        let query = query.clone();
        self.read(key, self.ttls.order_history_ttl(), move || async move { api.all_orders(&query).await }).await
    }

    pub async fn ticker(&self, instrument: &str) -> ExchangeResult<Ticker> {
        let key = format!("ticker:{instrument}");
        let api = Arc::clone(&self.api);
        let instrument = instrument.to_owned();
        self.read(key, self.ttls.ticker_ttl(), move || async move { api.ticker_24h(&instrument).await }).await
    }

    pub async fn klines(&self, instrument: &str, interval: &str, limit: u32) -> ExchangeResult<Vec<Kline>> {
        let key = format!("klines:{instrument}:{interval}:{limit}");
        let api = Arc::clone(&self.api);
        let (instrument, interval) = (instrument.to_owned(), interval.to_owned());
        self.read(key, self.ttls.ticker_ttl(), move || async move { api.klines(&instrument, &interval, limit).await })
            .await
    }

    pub async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        let api = Arc::clone(&self.api);
        self.read(KEY_EXCHANGE_INFO.to_owned(), self.ttls.metadata_ttl(), move || async move {
            api.exchange_info().await
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------------

    /// Drop every cached order listing and detach reads of them still in
    /// flight. Call after any order write.
    pub fn invalidate_orders(&self) -> usize {
        self.invalidate_pattern(PREFIX_ORDERS)
    }

    /// Drop the cached balance. Call after fills or cancels.
    pub fn invalidate_account(&self) -> usize {
        self.invalidate_pattern(PREFIX_ACCOUNT)
    }

    pub fn invalidate_pattern(&self, pattern: &str) -> usize {
        let detached = self.flights.forget_matching(pattern);
        if detached > 0 {
            debug!(pattern, detached, "[gateway] detached in-flight reads");
        }
        self.cache.invalidate_pattern(pattern)
    }

    /// Evict expired entries; returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats { cache: self.cache.stats(), flights: self.flights.stats() }
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    async fn read<T, F, Fut>(&self, key: String, ttl: Duration, fetch: F) -> ExchangeResult<T>
    where
        T: Payload + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ExchangeResult<T>> + Send + 'static,
    {
        if let Some(hit) = self.cache.get(&key).and_then(T::unwrap) {
            return Ok(hit);
        }

        let cache = Arc::clone(&self.cache);
        let flight_key = key.clone();
        let payload = self
            .flights
            .fetch_once(&key, move || {
                let generation = cache.generation();
                async move {
                    if let Some(hit) = cache.peek(&flight_key) {
                        debug!(key = %flight_key, "[gateway] filled while waiting to fetch");
                        return Ok(hit);
                    }
                    let payload = fetch().await?.wrap();
                    if !cache.set_if_generation(flight_key.clone(), payload.clone(), ttl, generation) {
                        debug!(key = %flight_key, "[gateway] invalidated during fetch, not caching");
                    }
                    Ok(payload)
                }
            })
            .await?;

        T::unwrap(payload)
            .ok_or_else(|| ExchangeError::upstream(format!("cache key `{key}` holds another payload type")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use futures_util::future::join_all;
    use mirror_core::time_util::from_ms;
    use mirror_core::{OcoList, OcoRequest, OrderRequest};
    use rust_decimal::Decimal;

    use super::*;

    /// Counts calls; account and open-order reads take 50ms, ticker reads
    /// fail on demand.
    #[derive(Default)]
    struct CountingApi {
        account_calls: AtomicU32,
        order_calls: AtomicU32,
        fail_ticker: bool,
    }

    fn unused<T>() -> ExchangeResult<T> {
        Err(ExchangeError::invalid("not used in this test"))
    }

    #[async_trait]
    impl ExchangeApi for CountingApi {
        fn name(&self) -> &str {
            "counting"
        }

        async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
            unused()
        }

        async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
            unused()
        }

        async fn ticker_24h(&self, instrument: &str) -> ExchangeResult<Ticker> {
            if self.fail_ticker {
                return Err(ExchangeError::upstream("HTTP 502"));
            }
            Ok(Ticker {
                symbol: instrument.to_owned(),
                last_price: Decimal::new(65_000, 0),
                price_change_percent: Decimal::ZERO,
                high_price: Decimal::ZERO,
                low_price: Decimal::ZERO,
                volume: Decimal::ZERO,
                quote_volume: Decimal::ZERO,
                close_time: from_ms(0),
            })
        }

        async fn klines(&self, _: &str, _: &str, _: u32) -> ExchangeResult<Vec<Kline>> {
            unused()
        }

        async fn account(&self) -> ExchangeResult<AccountBalance> {
            self.account_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(AccountBalance { can_trade: true, balances: Vec::new(), update_time: from_ms(0) })
        }

        async fn open_orders(&self, _: Option<&str>) -> ExchangeResult<Vec<ExchangeOrder>> {
            self.order_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(Vec::new())
        }

        async fn all_orders(&self, _: &OrderQuery) -> ExchangeResult<Vec<ExchangeOrder>> {
            unused()
        }

        async fn place_order(&self, _: &OrderRequest) -> ExchangeResult<ExchangeOrder> {
            unused()
        }

        async fn cancel_order(&self, _: &str, _: u64) -> ExchangeResult<ExchangeOrder> {
            unused()
        }

        async fn place_oco(&self, _: &OcoRequest) -> ExchangeResult<OcoList> {
            unused()
        }

        async fn cancel_oco(&self, _: &str, _: i64) -> ExchangeResult<OcoList> {
            unused()
        }
    }

    fn gateway(api: Arc<CountingApi>) -> CachedGateway {
        CachedGateway::new(api, CacheConfig::default(), Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_reads_make_one_call() {
        let api = Arc::new(CountingApi::default());
        let gw = gateway(Arc::clone(&api));

        let results = join_all((0..5).map(|_| gw.account())).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(api.account_calls.load(Ordering::SeqCst), 1);

        // Within TTL the cache answers without a flight.
        gw.account().await.unwrap();
        assert_eq!(api.account_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.stats().flights.coalesced, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_refetched() {
        let api = Arc::new(CountingApi::default());
        let gw = gateway(Arc::clone(&api));

        gw.account().await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;
        gw.account().await.unwrap();
        assert_eq!(api.account_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn order_invalidation_forces_refetch() {
        let api = Arc::new(CountingApi::default());
        let gw = gateway(Arc::clone(&api));

        gw.open_orders(Some("BTCUSDT")).await.unwrap();
        gw.open_orders(Some("BTCUSDT")).await.unwrap();
        assert_eq!(api.order_calls.load(Ordering::SeqCst), 1);

        assert_eq!(gw.invalidate_orders(), 1);
        gw.open_orders(Some("BTCUSDT")).await.unwrap();
        assert_eq!(api.order_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn read_racing_an_invalidation_is_not_cached() {
        let api = Arc::new(CountingApi::default());
        let gw = Arc::new(gateway(Arc::clone(&api)));

        let reader = tokio::spawn({
            let gw = Arc::clone(&gw);
            async move { gw.open_orders(None).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.order_calls.load(Ordering::SeqCst), 1);

        // An order is placed while the read is still in flight.
        gw.invalidate_orders();
        reader.await.unwrap().unwrap();
        assert_eq!(gw.stats().cache.entries, 0);

        gw.open_orders(None).await.unwrap();
        assert_eq!(api.order_calls.load(Ordering::SeqCst), 2);
        gw.open_orders(None).await.unwrap();
        assert_eq!(api.order_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn read_after_invalidation_does_not_join_the_stale_flight() {
        let api = Arc::new(CountingApi::default());
        let gw = Arc::new(gateway(Arc::clone(&api)));

        let reader = tokio::spawn({
            let gw = Arc::clone(&gw);
            async move { gw.open_orders(Some("BTCUSDT")).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        gw.invalidate_orders();

        gw.open_orders(Some("BTCUSDT")).await.unwrap();
        reader.await.unwrap().unwrap();
        assert_eq!(api.order_calls.load(Ordering::SeqCst), 2);
        assert_eq!(gw.stats().flights.coalesced, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_not_cached() {
        let api = Arc::new(CountingApi { fail_ticker: true, ..Default::default() });
        let gw = gateway(api);

        assert!(gw.ticker("BTCUSDT").await.is_err());
        assert_eq!(gw.stats().cache.entries, 0);
    }
}
