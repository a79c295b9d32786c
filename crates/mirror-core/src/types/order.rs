//! The mirrored order row.
//!
//! An [`Order`] is the local, eventually-consistent copy of what the exchange
//! knows about one order. The exchange owns `status`, `executed_quantity`, and
//! `cumulative_quote_amount`; everything else is fixed at creation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{OcoLeg, OrderKind, OrderStatus, Side};
use super::exchange::ExchangeOrder;

/// A mirrored order or bracket leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned order id (the mirror's primary key).
    pub exchange_order_id: u64,
    /// Locally generated id, stable across re-syncs.
    pub local_id: Uuid,
    pub instrument: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
    /// Limit price; zero for market orders.
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub executed_quantity: Decimal,
    pub cumulative_quote_amount: Decimal,
    pub status: OrderStatus,
    /// Commission in quote terms (reported, or estimated from the fee rate).
    pub fee: Decimal,
    pub created_at: DateTime<Utc>,
    /// Last exchange-side update; for filled orders this is the fill time.
    pub updated_at: DateTime<Utc>,
    pub oco_list_id: Option<i64>,
    pub oco_leg: Option<OcoLeg>,
}

impl Order {
    /// Build a mirror row from an exchange report.
    ///
    /// Orders that belong to a list get their leg from the order kind:
    /// stop-limit is the stop-loss, anything else the take-profit.
    pub fn from_exchange(live: &ExchangeOrder, fee_rate: Decimal) -> Self {
        let oco_leg = live.order_list_id.map(|_| match live.kind {
            OrderKind::StopLimit => OcoLeg::StopLoss,
            _ => OcoLeg::TakeProfit,
        });

        Self {
            exchange_order_id: live.order_id,
            local_id: Uuid::new_v4(),
            instrument: live.symbol.clone(),
            side: live.side,
            kind: live.kind,
            quantity: live.orig_qty,
            price: live.price,
            stop_price: live.stop_price,
            executed_quantity: live.executed_qty,
            cumulative_quote_amount: live.cumulative_quote_qty,
            status: live.status,
            fee: fee_of(live, fee_rate),
            created_at: live.time,
            updated_at: live.update_time,
            oco_list_id: live.order_list_id,
            oco_leg,
        }
    }

    /// Whether the exchange's view differs from this row in any field the
    /// exchange owns.
    pub fn differs_from(&self, live: &ExchangeOrder) -> bool {
        self.status != live.status
            || self.executed_quantity != live.executed_qty
            || self.cumulative_quote_amount != live.cumulative_quote_qty
    }

    /// Copy the exchange-owned fields from `live` into this row.
    pub fn apply_exchange(&mut self, live: &ExchangeOrder, fee_rate: Decimal) {
        self.status = live.status;
        self.executed_quantity = live.executed_qty;
        self.cumulative_quote_amount = live.cumulative_quote_qty;
        self.fee = fee_of(live, fee_rate);
        if live.update_time > self.updated_at {
            self.updated_at = live.update_time;
        }
    }

    /// Average execution price, falling back to the limit price.
    ///
    /// Market orders report a zero price, so the average is the only usable
    /// figure for them.
    pub fn fill_price(&self) -> Decimal {
        if self.executed_quantity > Decimal::ZERO && self.cumulative_quote_amount > Decimal::ZERO {
            self.cumulative_quote_amount / self.executed_quantity
        } else {
            self.price
        }
    }

    /// Quantity that actually traded; a FILLED row with no reported execution
    /// is taken at its full size.
    pub fn filled_quantity(&self) -> Decimal {
        if self.executed_quantity > Decimal::ZERO {
            self.executed_quantity
        } else if self.status == OrderStatus::Filled {
            self.quantity
        } else {
            Decimal::ZERO
        }
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}

fn fee_of(live: &ExchangeOrder, fee_rate: Decimal) -> Decimal {
    live.commission.unwrap_or(live.cumulative_quote_qty * fee_rate)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::time_util::from_ms;

    fn live(kind: OrderKind, list: Option<i64>) -> ExchangeOrder {
        ExchangeOrder {
            symbol: "BTCUSDT".into(),
            order_id: 42,
            client_order_id: "c42".into(),
            order_list_id: list,
            side: Side::Sell,
            kind,
            status: OrderStatus::New,
            price: dec!(70000),
            stop_price: None,
            orig_qty: dec!(0.5),
            executed_qty: dec!(0),
            cumulative_quote_qty: dec!(0),
            commission: None,
            time: from_ms(1_000),
            update_time: from_ms(1_000),
        }
    }

    #[test]
    fn legs_follow_order_kind() {
        let tp = Order::from_exchange(&live(OrderKind::Limit, Some(7)), dec!(0.001));
        let sl = Order::from_exchange(&live(OrderKind::StopLimit, Some(7)), dec!(0.001));
        let plain = Order::from_exchange(&live(OrderKind::Limit, None), dec!(0.001));
        assert_eq!(tp.oco_leg, Some(OcoLeg::TakeProfit));
        assert_eq!(sl.oco_leg, Some(OcoLeg::StopLoss));
        assert_eq!(plain.oco_leg, None);
    }

    #[test]
    fn apply_exchange_fill() {
        let mut row = Order::from_exchange(&live(OrderKind::Limit, None), dec!(0.001));
        let mut filled = live(OrderKind::Limit, None);
        filled.status = OrderStatus::Filled;
        filled.executed_qty = dec!(0.5);
        filled.cumulative_quote_qty = dec!(35000);
        filled.update_time = from_ms(5_000);

        assert!(row.differs_from(&filled));
        row.apply_exchange(&filled, dec!(0.001));
        assert!(!row.differs_from(&filled));
        assert_eq!(row.status, OrderStatus::Filled);
        assert_eq!(row.fee, dec!(35));
        assert_eq!(row.updated_at, from_ms(5_000));
        assert_eq!(row.fill_price(), dec!(70000));
    }

    #[test]
    fn market_fill_price_uses_average() {
        let mut m = live(OrderKind::Market, None);
        m.price = dec!(0);
        m.status = OrderStatus::Filled;
        m.executed_qty = dec!(2);
        m.cumulative_quote_qty = dec!(201);
        m.commission = Some(dec!(0.2));
        let row = Order::from_exchange(&m, dec!(0.001));
        assert_eq!(row.fill_price(), dec!(100.5));
        assert_eq!(row.fee, dec!(0.2));
    }
}
