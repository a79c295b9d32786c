//! FIFO matching of filled orders into closed trades.
//!
//! Per instrument, FILLED rows are replayed in fill-time order. BUY fills
//! open lots; each SELL fill consumes lots from the front of the queue,
//! emitting one [`ClosedTrade`] per (lot, sell) overlap:
//!
//! ```text
//! BUY 1.0@100  BUY 1.0@110  SELL 1.5@120
//!   lots: [1.0@100, 1.0@110]
//!   sell 1.5 → 1.0 from lot #1  (pnl 20)
//!            → 0.5 from lot #2  (pnl  5), 0.5@110 stays open
//! ```
//!
//! Fees are pro-rated by matched quantity on both legs. SELL quantity beyond
//! the open lots (a position opened before the mirror existed) is skipped.
//! Matching is a pure function of the ledger and is recomputed on every call.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mirror_core::time_util::duration_label;
use mirror_core::{ClosedTrade, Order, OrderStatus, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EngineResult;
use crate::store::{OrderFilter, OrderStore};

/// Exit-time window for trade queries. Open-ended on absent bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive.
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| t >= from) && self.to.is_none_or(|to| t < to)
    }
}

struct Lot<'a> {
    order: &'a Order,
    price: Decimal,
    filled: Decimal,
    remaining: Decimal,
}

/// Match every FILLED row in `orders` (other statuses are ignored).
///
/// Output is sorted by exit time, most recent first.
pub fn match_trades(orders: &[Order]) -> Vec<ClosedTrade> {
    let mut by_instrument: BTreeMap<&str, Vec<&Order>> = BTreeMap::new();
    for order in orders.iter().filter(|o| o.status == OrderStatus::Filled) {
        if order.fill_price() <= Decimal::ZERO || order.filled_quantity() <= Decimal::ZERO {
            warn!(
                order_id = order.exchange_order_id,
                instrument = %order.instrument,
                "[matcher] skipping filled order without a usable price or quantity"
            );
            continue;
        }
        by_instrument.entry(order.instrument.as_str()).or_default().push(order);
    }

    let mut trades = Vec::new();
    for (instrument, mut fills) in by_instrument {
        fills.sort_by_key(|o| o.updated_at);
        let before = trades.len();
        match_instrument(&fills, &mut trades);
        debug!(instrument, fills = fills.len(), trades = trades.len() - before, "[matcher] instrument matched");
    }

    trades.sort_by(|a, b| b.exit_time.cmp(&a.exit_time));
    trades
}

fn match_instrument(fills: &[&Order], trades: &mut Vec<ClosedTrade>) {
    let mut lots: VecDeque<Lot<'_>> = VecDeque::new();

    for &fill in fills {
        let price = fill.fill_price();
        let filled = fill.filled_quantity();

        match fill.side {
            Side::Buy => lots.push_back(Lot { order: fill, price, filled, remaining: filled }),
            Side::Sell => {
                let mut to_close = filled;
                while to_close > Decimal::ZERO {
                    let Some(lot) = lots.front_mut() else {
                        debug!(
                            order_id = fill.exchange_order_id,
                            unmatched = %to_close,
                            "[matcher] sell exceeds open lots, remainder skipped"
                        );
                        break;
                    };

                    let matched = to_close.min(lot.remaining);
                    let fees = lot.order.fee * matched / lot.filled + fill.fee * matched / filled;
                    let pnl = (price - lot.price) * matched - fees;
                    // Dust lots can round the cost basis to zero.
                    let pnl_percent =
                        pnl.checked_div(lot.price * matched).map_or(Decimal::ZERO, |r| r * Decimal::ONE_HUNDRED);
                    trades.push(ClosedTrade {
                        instrument: fill.instrument.clone(),
                        entry_order_id: lot.order.exchange_order_id,
                        exit_order_id: fill.exchange_order_id,
                        entry_price: lot.price,
                        exit_price: price,
                        quantity: matched,
                        realized_pnl: pnl,
                        realized_pnl_percent: pnl_percent,
                        fees,
                        entry_time: lot.order.updated_at,
                        exit_time: fill.updated_at,
                        duration_label: duration_label(lot.order.updated_at, fill.updated_at),
                    });

                    lot.remaining -= matched;
                    to_close -= matched;
                    if lot.remaining <= Decimal::ZERO {
                        lots.pop_front();
                    }
                }
            }
        }
    }
}

/// Closed-trade view over the mirror store.
pub struct TradeMatcher {
    store: Arc<dyn OrderStore>,
}

impl TradeMatcher {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Rematch the whole ledger, then filter by exit time and truncate.
    pub async fn closed_trades(
        &self,
        limit: Option<usize>,
        range: Option<TimeRange>,
    ) -> EngineResult<Vec<ClosedTrade>> {
        let filled = self.store.query(&OrderFilter::default().status(OrderStatus::Filled)).await?;
        let mut trades = match_trades(&filled);
        if let Some(range) = range {
            trades.retain(|t| range.contains(t.exit_time));
        }
        if let Some(limit) = limit {
            trades.truncate(limit);
        }
        Ok(trades)
    }
}
