//! Caller-facing facade over the mirror.
//!
//! Reads go through the cached gateway. Writes go straight to the exchange,
//! then through to the order mirror, then invalidate the cached views they
//! affect. The reconciliation schedule is owned here and started explicitly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mirror_core::config::{CacheConfig, ReconcileConfig, TradingConfig};
use mirror_core::{
    AccountBalance, ClosedTrade, ExchangeInfo, ExchangeOrder, Kline, Order, OrderQuery, OrderRequest, Ticker,
};
use mirror_exchange::{CachedGateway, ExchangeApi, GatewayStats};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::error::EngineResult;
use crate::matcher::{TimeRange, TradeMatcher};
use crate::oco::{BracketRequest, OcoGroup, OcoManager};
use crate::price::{PriceSource, TickerPriceSource};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::store::{OrderStore, upsert_from_exchange};

/// Engine tuning, assembled by the runner from its config file.
#[derive(Debug, Clone)]
pub struct MirrorSettings {
    pub cache: CacheConfig,
    pub reconcile: ReconcileConfig,
    pub trading: TradingConfig,
    /// Upper bound on one coalesced exchange read.
    pub flight_timeout: Duration,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            reconcile: ReconcileConfig::default(),
            trading: TradingConfig::default(),
            flight_timeout: Duration::from_secs(30),
        }
    }
}

/// Health snapshot for `cache_stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorStats {
    pub exchange: String,
    pub gateway: GatewayStats,
    pub mirrored_open_instruments: usize,
    pub reconcile_running: bool,
    pub scheduler_active: bool,
    pub last_reconcile_at: Option<DateTime<Utc>>,
    pub last_reconcile: Option<ReconcileReport>,
}

pub struct MirrorService {
    gateway: Arc<CachedGateway>,
    store: Arc<dyn OrderStore>,
    oco: OcoManager,
    matcher: TradeMatcher,
    reconciler: Arc<Reconciler>,
    settings: MirrorSettings,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorService {
    /// Build with the default reference price source (cached 24h ticker).
    pub fn new(api: Arc<dyn ExchangeApi>, store: Arc<dyn OrderStore>, settings: MirrorSettings) -> Self {
        let gateway = Arc::new(CachedGateway::new(api, settings.cache.clone(), settings.flight_timeout));
        let prices = Arc::new(TickerPriceSource::new(Arc::clone(&gateway)));
        Self::assemble(gateway, store, prices, settings)
    }

    /// Build with a custom reference price source for bracket validation.
    pub fn with_price_source(
        api: Arc<dyn ExchangeApi>,
        store: Arc<dyn OrderStore>,
        prices: Arc<dyn PriceSource>,
        settings: MirrorSettings,
    ) -> Self {
        let gateway = Arc::new(CachedGateway::new(api, settings.cache.clone(), settings.flight_timeout));
        Self::assemble(gateway, store, prices, settings)
    }

    fn assemble(
        gateway: Arc<CachedGateway>,
        store: Arc<dyn OrderStore>,
        prices: Arc<dyn PriceSource>,
        settings: MirrorSettings,
    ) -> Self {
        let oco = OcoManager::new(Arc::clone(&gateway), Arc::clone(&store), prices, settings.trading.clone());
        let matcher = TradeMatcher::new(Arc::clone(&store));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&gateway),
            Arc::clone(&store),
            settings.reconcile.clone(),
            settings.trading.fee_rate,
        ));
        Self { gateway, store, oco, matcher, reconciler, settings, scheduler: Mutex::new(None) }
    }

    pub fn gateway(&self) -> &Arc<CachedGateway> {
        &self.gateway
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Cached reads
    // -----------------------------------------------------------------------

    pub async fn account_balance(&self) -> EngineResult<AccountBalance> {
        Ok(self.gateway.account().await?)
    }

    pub async fn open_orders(&self, instrument: Option<&str>) -> EngineResult<Vec<ExchangeOrder>> {
        Ok(self.gateway.open_orders(instrument).await?)
    }

    pub async fn all_orders(&self, query: &OrderQuery) -> EngineResult<Vec<ExchangeOrder>> {
        Ok(self.gateway.all_orders(query).await?)
    }

    pub async fn ticker(&self, instrument: &str) -> EngineResult<Ticker> {
        Ok(self.gateway.ticker(instrument).await?)
    }

    pub async fn klines(&self, instrument: &str, interval: &str, limit: u32) -> EngineResult<Vec<Kline>> {
        Ok(self.gateway.klines(instrument, interval, limit).await?)
    }

    pub async fn exchange_info(&self) -> EngineResult<ExchangeInfo> {
        Ok(self.gateway.exchange_info().await?)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Submit one order and mirror the exchange's acknowledgement.
    pub async fn place_order(&self, request: &OrderRequest) -> EngineResult<Order> {
        request.validate()?;
        let live = self.gateway.api().place_order(request).await?;
        self.gateway.invalidate_orders();
        self.gateway.invalidate_account();

        let row = Order::from_exchange(&live, self.settings.trading.fee_rate);
        if let Err(e) = self.store.insert(row.clone()).await {
            error!(order_id = live.order_id, "[mirror] order placed but not mirrored: {e}");
            return Err(e.into());
        }
        info!(
            instrument = %row.instrument,
            order_id = row.exchange_order_id,
            side = %row.side,
            status = %row.status,
            qty = %row.quantity,
            "[mirror] order placed"
        );
        Ok(row)
    }

    /// Cancel one order and record the exchange-reported final state.
    pub async fn cancel_order(&self, instrument: &str, order_id: u64) -> EngineResult<Order> {
        let live = self.gateway.api().cancel_order(instrument, order_id).await?;
        self.gateway.invalidate_orders();
        self.gateway.invalidate_account();

        let row = upsert_from_exchange(self.store.as_ref(), &live, self.settings.trading.fee_rate).await?;
        info!(instrument, order_id, status = %row.status, "[mirror] order canceled");
        Ok(row)
    }

    pub async fn place_bracket(&self, request: &BracketRequest) -> EngineResult<OcoGroup> {
        self.oco.place_bracket(request).await
    }

    pub async fn cancel_bracket(&self, instrument: &str, order_list_id: i64) -> EngineResult<OcoGroup> {
        self.oco.cancel_bracket(instrument, order_list_id).await
    }

    // -----------------------------------------------------------------------
    // Trades & reconciliation
    // -----------------------------------------------------------------------

    /// Closed trades, most recent exit first.
    pub async fn closed_trades(
        &self,
        limit: Option<usize>,
        range: Option<TimeRange>,
    ) -> EngineResult<Vec<ClosedTrade>> {
        self.matcher.closed_trades(limit, range).await
    }

    /// Run one reconciliation pass now. `None` if a pass is already running.
    pub async fn trigger_reconciliation(&self) -> EngineResult<Option<ReconcileReport>> {
        self.reconciler.run_once().await
    }

    /// Start the periodic reconciliation, if enabled and not yet started.
    /// Returns whether a schedule is running afterwards.
    pub fn start_scheduler(&self) -> bool {
        let mut slot = self.scheduler.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return true;
        }
        if !self.settings.reconcile.enabled {
            info!("[mirror] reconciliation schedule disabled");
            return false;
        }
        *slot = Some(self.reconciler.spawn_scheduler());
        true
    }

    /// Stop the periodic reconciliation. An in-flight pass is abandoned; its
    /// completed writes stay.
    pub fn stop_scheduler(&self) {
        if let Some(handle) = self.scheduler.lock().take() {
            handle.abort();
            info!("[mirror] reconciliation schedule stopped");
        }
    }

    pub async fn cache_stats(&self) -> EngineResult<MirrorStats> {
        let last = self.reconciler.last_report();
        Ok(MirrorStats {
            exchange: self.gateway.api().name().to_owned(),
            gateway: self.gateway.stats(),
            mirrored_open_instruments: self.store.open_instruments().await?.len(),
            reconcile_running: self.reconciler.is_running(),
            scheduler_active: self.scheduler.lock().as_ref().is_some_and(|h| !h.is_finished()),
            last_reconcile_at: last.as_ref().map(|r| r.finished_at),
            last_reconcile: last,
        })
    }
}

impl Drop for MirrorService {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler.get_mut().take() {
            handle.abort();
        }
    }
}
