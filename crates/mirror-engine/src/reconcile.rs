//! Periodic reconciliation of the order mirror against the exchange.
//!
//! Each run:
//!
//! 1. collects instruments with non-terminal mirror rows plus the watch list,
//! 2. fetches their order history in batches (`allOrders`, paged by order id
//!    from the oldest open row, or `lookback_hours` back for watch-only
//!    instruments),
//! 3. updates open rows whose status / executed quantity / quote amount
//!    differ from the exchange,
//! 4. inserts exchange orders the mirror has never seen.
//!
//! Rows are never deleted, and a second run over an unchanged exchange
//! writes nothing. A failing instrument is logged, recorded in the report,
//! and skipped; rejected credentials abort the remaining batches instead,
//! since every instrument would fail the same way. Runs never overlap: a trigger arriving during a run returns
//! immediately without queueing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use ahash::AHashMap;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use mirror_core::config::ReconcileConfig;
use mirror_core::error::ErrorKind;
use mirror_core::{ExchangeOrder, Order, OrderQuery};
use mirror_exchange::CachedGateway;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::EngineResult;
use crate::store::{OrderFilter, OrderStore};

/// Maximum page size of the order-history endpoint.
const HISTORY_LIMIT: u32 = 1000;

/// Pages fetched per instrument and run before giving up until the next run.
const MAX_HISTORY_PAGES: usize = 50;

/// Why one instrument could not be reconciled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentFailure {
    pub instrument: String,
    /// `None` for store failures.
    pub kind: Option<ErrorKind>,
    pub error: String,
}

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub instruments: usize,
    pub batches: usize,
    /// Open mirror rows compared against the exchange.
    pub checked: usize,
    pub updated: usize,
    pub inserted: usize,
    pub failed: Vec<InstrumentFailure>,
    /// Set when a fatal exchange error stopped the run before all batches.
    pub aborted: bool,
}

impl ReconcileReport {
    pub fn mutations(&self) -> usize {
        self.updated + self.inserted
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct InstrumentOutcome {
    checked: usize,
    updated: usize,
    inserted: usize,
}

/// Resets the running flag however the run ends (including task abort).
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    gateway: Arc<CachedGateway>,
    store: Arc<dyn OrderStore>,
    config: ReconcileConfig,
    fee_rate: Decimal,
    running: AtomicBool,
    last_report: Mutex<Option<ReconcileReport>>,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<CachedGateway>,
        store: Arc<dyn OrderStore>,
        config: ReconcileConfig,
        fee_rate: Decimal,
    ) -> Self {
        Self {
            gateway,
            store,
            config,
            fee_rate,
            running: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_report(&self) -> Option<ReconcileReport> {
        self.last_report.lock().clone()
    }

    /// Run one pass. Returns `Ok(None)` if a pass is already in progress.
    ///
    /// Per-instrument failures land in the report; only a failure to read
    /// the mirror itself is returned as an error.
    pub async fn run_once(&self) -> EngineResult<Option<ReconcileReport>> {
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            debug!("[reconcile] run already in progress, skipping");
            return Ok(None);
        }
        let _guard = RunGuard(&self.running);

        let started_at = Utc::now();
        let timer = Instant::now();

        let mut instruments = self.store.open_instruments().await?;
        for watched in &self.config.instruments {
            if !instruments.contains(watched) {
                instruments.push(watched.clone());
            }
        }

        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<&[String]> = instruments.chunks(batch_size).collect();
        let mut totals = InstrumentOutcome::default();
        let mut failed = Vec::new();
        let mut aborted = false;

        for (idx, batch) in batches.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.config.batch_delay()).await;
            }
            let results = join_all(batch.iter().map(|instrument| self.reconcile_instrument(instrument))).await;
            for (instrument, result) in batch.iter().zip(results) {
                match result {
                    Ok(outcome) => {
                        totals.checked += outcome.checked;
                        totals.updated += outcome.updated;
                        totals.inserted += outcome.inserted;
                    }
                    Err(e) => {
                        warn!(%instrument, "[reconcile] instrument failed, skipping: {e}");
                        aborted |= e.as_exchange().is_some_and(|x| x.is_fatal());
                        failed.push(InstrumentFailure {
                            instrument: instrument.clone(),
                            kind: e.as_exchange().map(|x| x.kind()),
                            error: e.to_string(),
                        });
                    }
                }
            }
            if aborted && idx + 1 < batches.len() {
                warn!(remaining = batches.len() - idx - 1, "[reconcile] fatal exchange error, aborting run");
                break;
            }
        }

        if totals.updated + totals.inserted > 0 {
            self.gateway.invalidate_orders();
            self.gateway.invalidate_account();
        }
        let purged = self.gateway.purge_expired();

        let report = ReconcileReport {
            started_at,
            finished_at: Utc::now(),
            duration_ms: timer.elapsed().as_millis() as u64,
            instruments: instruments.len(),
            batches: batches.len(),
            checked: totals.checked,
            updated: totals.updated,
            inserted: totals.inserted,
            failed,
            aborted,
        };
        info!(
            instruments = report.instruments,
            checked = report.checked,
            updated = report.updated,
            inserted = report.inserted,
            failed = report.failed.len(),
            aborted = report.aborted,
            duration_ms = report.duration_ms,
            purged,
            "[reconcile] run complete"
        );
        *self.last_report.lock() = Some(report.clone());
        Ok(Some(report))
    }

    async fn reconcile_instrument(&self, instrument: &str) -> EngineResult<InstrumentOutcome> {
        let open_rows = self.store.query(&OrderFilter::default().instrument(instrument).open()).await?;
        let live = self.fetch_history(instrument, &open_rows).await?;
        let live_by_id: AHashMap<u64, _> = live.iter().map(|o| (o.order_id, o)).collect();

        let mut outcome = InstrumentOutcome { checked: open_rows.len(), ..Default::default() };

        for mut row in open_rows {
            match live_by_id.get(&row.exchange_order_id) {
                Some(live) if row.differs_from(live) => {
                    debug!(
                        order_id = row.exchange_order_id,
                        from = %row.status,
                        to = %live.status,
                        "[reconcile] exchange state changed"
                    );
                    row.apply_exchange(live, self.fee_rate);
                    self.store.update(row).await?;
                    outcome.updated += 1;
                }
                Some(_) => {}
                None => {
                    debug!(
                        order_id = row.exchange_order_id,
                        %instrument,
                        "[reconcile] open row not in exchange window"
                    );
                }
            }
        }

        for order in &live {
            if self.store.get(order.order_id).await?.is_none() {
                debug!(
                    order_id = order.order_id,
                    %instrument,
                    status = %order.status,
                    "[reconcile] mirroring unknown order"
                );
                self.store.insert(Order::from_exchange(order, self.fee_rate)).await?;
                outcome.inserted += 1;
            }
        }

        Ok(outcome)
    }

    /// Order history from the oldest open row onward, following full pages
    /// by order id so every open row is covered in one run.
    async fn fetch_history(&self, instrument: &str, open_rows: &[Order]) -> EngineResult<Vec<ExchangeOrder>> {
        let mut query = OrderQuery { limit: Some(HISTORY_LIMIT), ..OrderQuery::for_instrument(instrument) };
        match open_rows.iter().map(|o| o.exchange_order_id).min() {
            Some(oldest) => query.from_order_id = Some(oldest),
            None => {
                query.start_time = Some(Utc::now() - ChronoDuration::hours(self.config.lookback_hours as i64));
            }
        }

        let mut history = Vec::new();
        for _ in 0..MAX_HISTORY_PAGES {
            let page = self.gateway.api().all_orders(&query).await?;
            let full = page.len() >= HISTORY_LIMIT as usize;
            let last = page.iter().map(|o| o.order_id).max();
            history.extend(page);
            match last {
                Some(last) if full => {
                    query.from_order_id = Some(last + 1);
                    query.start_time = None;
                }
                _ => return Ok(history),
            }
        }
        warn!(
            %instrument,
            pages = MAX_HISTORY_PAGES,
            "[reconcile] history page cap reached, rest left for the next run"
        );
        Ok(history)
    }

    /// Start the periodic schedule. The first run happens immediately;
    /// ticks missed while a run is in progress are dropped.
    ///
    /// Aborting the returned handle stops the schedule.
    pub fn spawn_scheduler(self: &Arc<Self>) -> JoinHandle<()> {
        let job = Arc::clone(self);
        let period = job.config.interval();
        info!(interval_secs = period.as_secs(), "[reconcile] scheduler started");

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = job.run_once().await {
                    warn!("[reconcile] run failed: {e}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mirror_core::config::CacheConfig;
    use mirror_core::error::ExchangeError;
    use mirror_core::{OrderRequest, OrderStatus, Side};
    use mirror_exchange::ExchangeApi;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::store::MemoryOrderStore;
    use crate::testing::ScriptedExchange;

    struct Fixture {
        exchange: Arc<ScriptedExchange>,
        store: Arc<MemoryOrderStore>,
        job: Arc<Reconciler>,
    }

    fn fixture(config: ReconcileConfig) -> Fixture {
        let exchange = Arc::new(ScriptedExchange::new());
        let store = Arc::new(MemoryOrderStore::new());
        let gateway = Arc::new(CachedGateway::new(exchange.clone(), CacheConfig::default(), Duration::from_secs(30)));
        let job = Arc::new(Reconciler::new(gateway, store.clone(), config, dec!(0.001)));
        Fixture { exchange, store, job }
    }

    fn quick() -> ReconcileConfig {
        ReconcileConfig { batch_delay_ms: 0, ..Default::default() }
    }

    async fn mirrored_limit(fx: &Fixture, instrument: &str) -> u64 {
        let request = OrderRequest::limit(instrument, Side::Buy, dec!(1), dec!(100));
        let live = fx.exchange.place_order(&request).await.unwrap();
        fx.store.insert(Order::from_exchange(&live, dec!(0.001))).await.unwrap();
        live.order_id
    }

    #[tokio::test]
    async fn converges_in_one_run_then_idles() {
        let fx = fixture(quick());
        let id = mirrored_limit(&fx, "BTCUSDT").await;
        fx.exchange.set_status(id, OrderStatus::Filled, dec!(1));

        let first = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!((first.checked, first.updated, first.inserted), (1, 1, 0));

        let row = fx.store.get(id).await.unwrap().unwrap();
        let live = fx.exchange.order(id).unwrap();
        assert_eq!(row.status, OrderStatus::Filled);
        assert!(!row.differs_from(&live));
        assert_eq!(row.fee, dec!(0.1), "fee estimated from quote amount");

        let events = fx.store.event_count();
        let second = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!(second.mutations(), 0);
        assert_eq!(fx.store.event_count(), events);
    }

    #[tokio::test]
    async fn partial_fill_then_fill_is_tracked() {
        let fx = fixture(quick());
        let id = mirrored_limit(&fx, "BTCUSDT").await;

        fx.exchange.set_status(id, OrderStatus::PartiallyFilled, dec!(0.4));
        fx.job.run_once().await.unwrap();
        assert_eq!(fx.store.get(id).await.unwrap().unwrap().executed_quantity, dec!(0.4));

        fx.exchange.set_status(id, OrderStatus::Filled, dec!(1));
        let report = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(fx.store.history(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn unknown_exchange_orders_are_inserted() {
        let fx = fixture(ReconcileConfig { instruments: vec!["ETHUSDT".into()], ..quick() });
        let id = fx.exchange.external_order("ETHUSDT", Side::Sell, dec!(2), dec!(3000));

        let report = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(fx.store.get(id).await.unwrap().unwrap().instrument, "ETHUSDT");

        let again = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!(again.mutations(), 0);
    }

    #[tokio::test]
    async fn failing_instrument_is_skipped() {
        let fx = fixture(quick());
        let btc = mirrored_limit(&fx, "BTCUSDT").await;
        let eth = mirrored_limit(&fx, "ETHUSDT").await;
        fx.exchange.set_status(btc, OrderStatus::Canceled, dec!(0));
        fx.exchange.set_status(eth, OrderStatus::Canceled, dec!(0));
        fx.exchange.failing_instruments.lock().push("BTCUSDT".into());

        let report = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].instrument, "BTCUSDT");
        assert_eq!(report.failed[0].kind, Some(ErrorKind::UpstreamUnavailable));
        assert!(!report.aborted);
        assert_eq!(fx.store.get(btc).await.unwrap().unwrap().status, OrderStatus::New);
    }

    #[tokio::test]
    async fn open_row_past_the_first_history_page_converges() {
        let fx = fixture(quick());
        let resting = mirrored_limit(&fx, "BTCUSDT").await;
        for _ in 0..HISTORY_LIMIT {
            let id = fx.exchange.external_order("BTCUSDT", Side::Sell, dec!(1), dec!(200));
            fx.exchange.set_status(id, OrderStatus::Canceled, dec!(0));
        }
        let recent = mirrored_limit(&fx, "BTCUSDT").await;
        fx.exchange.set_status(recent, OrderStatus::Filled, dec!(1));

        let report = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!((report.checked, report.updated, report.inserted), (2, 1, HISTORY_LIMIT as usize));
        assert_eq!(fx.exchange.all_orders_calls.load(Ordering::SeqCst), 2);
        assert_eq!(fx.store.get(recent).await.unwrap().unwrap().status, OrderStatus::Filled);
        assert_eq!(fx.store.get(resting).await.unwrap().unwrap().status, OrderStatus::New);

        let again = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!(again.mutations(), 0);
    }

    #[tokio::test]
    async fn rejected_credentials_abort_remaining_batches() {
        let fx = fixture(ReconcileConfig { batch_size: 1, ..quick() });
        for instrument in ["AAAUSDT", "BBBUSDT", "CCCUSDT"] {
            mirrored_limit(&fx, instrument).await;
        }
        *fx.exchange.history_error.lock() = Some(ExchangeError::Unauthorized("bad key".into()));

        let report = fx.job.run_once().await.unwrap().unwrap();
        assert!(report.aborted);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, Some(ErrorKind::Unauthorized));
        assert_eq!(fx.exchange.all_orders_calls.load(Ordering::SeqCst), 1);
        assert!(!fx.job.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn instruments_are_fetched_in_batches() {
        let fx = fixture(ReconcileConfig { batch_size: 2, batch_delay_ms: 1000, ..Default::default() });
        for instrument in ["AAAUSDT", "BBBUSDT", "CCCUSDT", "DDDUSDT", "EEEUSDT"] {
            mirrored_limit(&fx, instrument).await;
        }

        let report = fx.job.run_once().await.unwrap().unwrap();
        assert_eq!(report.instruments, 5);
        assert_eq!(report.batches, 3);
        assert_eq!(fx.exchange.all_orders_calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn overlapping_trigger_is_skipped() {
        let fx = fixture(quick());
        fx.job.running.store(true, Ordering::SeqCst);
        assert!(fx.job.run_once().await.unwrap().is_none());

        fx.job.running.store(false, Ordering::SeqCst);
        assert!(fx.job.run_once().await.unwrap().is_some());
        assert!(!fx.job.is_running());
        assert!(fx.job.last_report().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_on_interval_until_aborted() {
        let fx = fixture(ReconcileConfig { interval_secs: 60, instruments: vec!["BTCUSDT".into()], ..quick() });
        let handle = fx.job.spawn_scheduler();

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(fx.exchange.all_orders_calls.load(Ordering::SeqCst), 3);

        handle.abort();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fx.exchange.all_orders_calls.load(Ordering::SeqCst), 3);
    }
}
