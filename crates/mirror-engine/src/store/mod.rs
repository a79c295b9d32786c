//! Order mirror persistence.
//!
//! The store is an append-only log of order snapshots. Every insert or
//! update appends an [`OrderEvent`]; the current row for an order id is the
//! event with the highest `seq`. Nothing is ever deleted.
//!
//! ```text
//! seq  order_id  status
//! 1    101       NEW        ◄─ placement
//! 2    102       NEW        ◄─ placement (same batch as 1 for a bracket)
//! 3    101       FILLED     ◄─ reconciliation      latest(101) = seq 3
//! ```
//!
//! Two implementations share [`EventLog`]: [`MemoryOrderStore`] and the
//! JSON-lines [`FileOrderStore`], which replays its file on open.

mod file;
mod log;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirror_core::{ExchangeOrder, Order, OrderStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::file::FileOrderStore;
pub use self::log::EventLog;
pub use self::memory::MemoryOrderStore;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One persisted snapshot of an order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    pub seq: u64,
    pub recorded_at: DateTime<Utc>,
    pub order: Order,
}

/// Row filter for [`OrderStore::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub instrument: Option<String>,
    /// Any of these statuses; empty means any status.
    pub statuses: Vec<OrderStatus>,
    pub oco_list_id: Option<i64>,
    /// Inclusive lower bound on `created_at`.
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_to: Option<DateTime<Utc>>,
}

impl OrderFilter {
    pub fn instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    pub fn status(mut self, status: OrderStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Rows the exchange may still change.
    pub fn open(self) -> Self {
        self.status(OrderStatus::New).status(OrderStatus::PartiallyFilled)
    }

    pub fn oco_list(mut self, list_id: i64) -> Self {
        self.oco_list_id = Some(list_id);
        self
    }

    pub fn created_between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.created_from = from;
        self.created_to = to;
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.instrument.as_ref().is_none_or(|i| *i == order.instrument)
            && (self.statuses.is_empty() || self.statuses.contains(&order.status))
            && self.oco_list_id.is_none_or(|id| order.oco_list_id == Some(id))
            && self.created_from.is_none_or(|from| order.created_at >= from)
            && self.created_to.is_none_or(|to| order.created_at < to)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} is already mirrored")]
    Duplicate(u64),

    #[error("order {0} is not mirrored")]
    NotFound(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt event log at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Persistent home of the mirrored order rows.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Add a new row; fails with [`StoreError::Duplicate`] if the id exists.
    async fn insert(&self, order: Order) -> StoreResult<()>;

    /// Add several new rows, all or none.
    async fn insert_many(&self, orders: Vec<Order>) -> StoreResult<()>;

    /// Record a new snapshot of an existing row.
    async fn update(&self, order: Order) -> StoreResult<()>;

    /// Latest snapshot of one row.
    async fn get(&self, exchange_order_id: u64) -> StoreResult<Option<Order>>;

    /// Latest snapshots matching `filter`, oldest first.
    async fn query(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>>;

    /// Instruments with at least one non-terminal row, sorted.
    async fn open_instruments(&self) -> StoreResult<Vec<String>>;

    /// Every snapshot of one row, oldest first.
    async fn history(&self, exchange_order_id: u64) -> StoreResult<Vec<OrderEvent>>;
}

/// Mirror one exchange report: refresh the existing row, or insert it if the
/// order was never seen.
pub async fn upsert_from_exchange(
    store: &dyn OrderStore,
    live: &ExchangeOrder,
    fee_rate: Decimal,
) -> StoreResult<Order> {
    match store.get(live.order_id).await? {
        Some(mut row) => {
            row.apply_exchange(live, fee_rate);
            store.update(row.clone()).await?;
            Ok(row)
        }
        None => {
            let row = Order::from_exchange(live, fee_rate);
            store.insert(row.clone()).await?;
            Ok(row)
        }
    }
}
