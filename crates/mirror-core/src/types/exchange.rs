//! Typed exchange payloads and request structs.
//!
//! Every endpoint the adapter talks to has its own response shape here; the
//! adapter validates raw JSON into these at the boundary so nothing above it
//! handles untyped values.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{OrderKind, OrderStatus, Side};
use crate::error::{ExchangeError, ExchangeResult};

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// One asset line of the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Account snapshot; zero balances are dropped by the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub can_trade: bool,
    pub balances: Vec<Balance>,
    pub update_time: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Rolling 24h ticker statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_percent: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub close_time: DateTime<Utc>,
}

/// One candlestick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

/// Trading rules summary for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub oco_allowed: bool,
}

/// Exchange metadata (the slow-changing, hour-cached kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeInfo {
    pub server_time: DateTime<Utc>,
    pub symbols: Vec<SymbolInfo>,
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// An order exactly as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    /// Linked order list id; `None` for standalone orders.
    pub order_list_id: Option<i64>,
    pub side: Side,
    pub kind: OrderKind,
    pub status: OrderStatus,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub cumulative_quote_qty: Decimal,
    /// Sum of fill commissions, present only on full placement responses.
    pub commission: Option<Decimal>,
    pub time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

/// A linked order list (OCO) as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcoList {
    pub order_list_id: i64,
    pub symbol: String,
    pub list_status: String,
    pub orders: Vec<ExchangeOrder>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A new single order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
    /// Limit price; required for `Limit` and `StopLimit`.
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Trigger price; required for `StopLimit`.
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(instrument: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            kind: OrderKind::Market,
            quantity,
            price: None,
            stop_price: None,
            client_order_id: None,
        }
    }

    pub fn limit(instrument: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self { kind: OrderKind::Limit, price: Some(price), ..Self::market(instrument, side, quantity) }
    }

    /// Local sanity checks; the exchange applies its own filters afterwards.
    pub fn validate(&self) -> ExchangeResult<()> {
        if self.instrument.trim().is_empty() {
            return Err(ExchangeError::invalid("instrument is empty"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(ExchangeError::invalid(format!("quantity must be positive, got {}", self.quantity)));
        }
        let positive = |v: Option<Decimal>| v.is_some_and(|p| p > Decimal::ZERO);
        match self.kind {
            OrderKind::Market if self.price.is_some() => {
                Err(ExchangeError::invalid("market orders take no price"))
            }
            OrderKind::Market => Ok(()),
            OrderKind::Limit if !positive(self.price) => {
                Err(ExchangeError::invalid("limit orders need a positive price"))
            }
            OrderKind::Limit => Ok(()),
            OrderKind::StopLimit if !positive(self.price) || !positive(self.stop_price) => {
                Err(ExchangeError::invalid("stop-limit orders need positive price and stop price"))
            }
            OrderKind::StopLimit => Ok(()),
        }
    }
}

/// A one-cancels-other exit pair for an existing position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcoRequest {
    pub instrument: String,
    /// Side of both exit legs (opposite to the entry).
    pub side: Side,
    pub quantity: Decimal,
    /// Limit price of the take-profit leg.
    pub take_profit_price: Decimal,
    /// Trigger price of the stop-loss leg.
    pub stop_price: Decimal,
    /// Limit price of the stop-loss leg once triggered.
    pub stop_limit_price: Decimal,
    #[serde(default)]
    pub list_client_order_id: Option<String>,
}

/// Filter for historical order queries.
///
/// With `from_order_id` set the exchange returns orders with an id greater
/// than or equal to it, oldest first, which is how long histories are paged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderQuery {
    pub instrument: String,
    #[serde(default)]
    pub from_order_id: Option<u64>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl OrderQuery {
    pub fn for_instrument(instrument: impl Into<String>) -> Self {
        Self { instrument: instrument.into(), from_order_id: None, start_time: None, end_time: None, limit: None }
    }

    /// Stable textual form used inside cache keys.
    pub fn cache_fragment(&self) -> String {
        let ms = |t: Option<DateTime<Utc>>| t.map(|t| t.timestamp_millis().to_string()).unwrap_or_default();
        format!(
            "{}:{}:{}:{}:{}",
            self.instrument,
            self.from_order_id.map(|id| id.to_string()).unwrap_or_default(),
            ms(self.start_time),
            ms(self.end_time),
            self.limit.map(|l| l.to_string()).unwrap_or_default()
        )
    }
}
