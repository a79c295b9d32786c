//! Scripted in-memory exchange for engine tests.

use std::sync::atomic::{AtomicU32, Ordering};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use mirror_core::error::{ExchangeError, ExchangeResult};
use mirror_core::time_util::{from_ms, now_ms};
use mirror_core::{
    AccountBalance, Balance, ExchangeInfo, ExchangeOrder, Kline, OcoList, OcoRequest, OrderKind, OrderQuery,
    OrderRequest, OrderStatus, Side, Ticker,
};
use mirror_exchange::ExchangeApi;
use parking_lot::Mutex;
use rust_decimal::Decimal;

/// Fixed epoch for hand-built ledgers.
pub const T0_MS: i64 = 1_700_000_000_000;

#[derive(Default)]
struct State {
    orders: AHashMap<u64, ExchangeOrder>,
    prices: AHashMap<String, Decimal>,
    next_order_id: u64,
    next_list_id: i64,
    /// Simulated clock, starting at wall time and advanced one second per
    /// exchange-side change.
    clock_ms: i64,
}

/// Exchange fake with scripted prices, failures, and external changes.
pub struct ScriptedExchange {
    state: Mutex<State>,
    /// Error returned by the next `place_oco` call.
    pub oco_error: Mutex<Option<ExchangeError>>,
    /// Instruments whose `all_orders` fails.
    pub failing_instruments: Mutex<Vec<String>>,
    /// Error returned by every `all_orders` call while set.
    pub history_error: Mutex<Option<ExchangeError>>,
    pub all_orders_calls: AtomicU32,
    pub ticker_calls: AtomicU32,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_order_id: 1000,
                next_list_id: 1,
                clock_ms: now_ms() / 1_000 * 1_000,
                ..Default::default()
            }),
            oco_error: Mutex::new(None),
            failing_instruments: Mutex::new(Vec::new()),
            history_error: Mutex::new(None),
            all_orders_calls: AtomicU32::new(0),
            ticker_calls: AtomicU32::new(0),
        }
    }

    pub fn set_price(&self, instrument: &str, price: Decimal) {
        self.state.lock().prices.insert(instrument.to_owned(), price);
    }

    pub fn order(&self, order_id: u64) -> Option<ExchangeOrder> {
        self.state.lock().orders.get(&order_id).cloned()
    }

    /// Simulate a change made on the exchange (fill, manual cancel, ...).
    pub fn set_status(&self, order_id: u64, status: OrderStatus, executed: Decimal) {
        let mut state = self.state.lock();
        state.clock_ms += 1_000;
        let now = from_ms(state.clock_ms);
        if let Some(order) = state.orders.get_mut(&order_id) {
            let price = if order.price.is_zero() { order.stop_price.unwrap_or_default() } else { order.price };
            order.status = status;
            order.executed_qty = executed;
            order.cumulative_quote_qty = executed * price;
            order.update_time = now;
        }
    }

    /// An order placed outside this process (e.g. in the exchange's UI).
    pub fn external_order(&self, instrument: &str, side: Side, quantity: Decimal, price: Decimal) -> u64 {
        let mut state = self.state.lock();
        let order = Self::new_order(&mut state, instrument, side, OrderKind::Limit, quantity, price, None, None);
        let id = order.order_id;
        state.orders.insert(id, order);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn new_order(
        state: &mut State,
        instrument: &str,
        side: Side,
        kind: OrderKind,
        quantity: Decimal,
        price: Decimal,
        stop_price: Option<Decimal>,
        list_id: Option<i64>,
    ) -> ExchangeOrder {
        state.next_order_id += 1;
        state.clock_ms += 1_000;
        let now = from_ms(state.clock_ms);
        ExchangeOrder {
            symbol: instrument.to_owned(),
            order_id: state.next_order_id,
            client_order_id: format!("scripted-{}", state.next_order_id),
            order_list_id: list_id,
            side,
            kind,
            status: OrderStatus::New,
            price,
            stop_price,
            orig_qty: quantity,
            executed_qty: Decimal::ZERO,
            cumulative_quote_qty: Decimal::ZERO,
            commission: None,
            time: now,
            update_time: now,
        }
    }

    fn list(state: &State, list_id: i64, instrument: &str, status: &str) -> OcoList {
        let mut orders: Vec<ExchangeOrder> =
            state.orders.values().filter(|o| o.order_list_id == Some(list_id)).cloned().collect();
        orders.sort_by_key(|o| o.order_id);
        OcoList { order_list_id: list_id, symbol: instrument.to_owned(), list_status: status.to_owned(), orders }
    }
}

#[async_trait]
impl ExchangeApi for ScriptedExchange {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        Ok(from_ms(self.state.lock().clock_ms))
    }

    async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        Ok(ExchangeInfo { server_time: from_ms(self.state.lock().clock_ms), symbols: Vec::new() })
    }

    async fn ticker_24h(&self, instrument: &str) -> ExchangeResult<Ticker> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock();
        let price = state
            .prices
            .get(instrument)
            .copied()
            .ok_or_else(|| ExchangeError::invalid(format!("unknown symbol {instrument}")))?;
        Ok(Ticker {
            symbol: instrument.to_owned(),
            last_price: price,
            price_change_percent: Decimal::ZERO,
            high_price: price,
            low_price: price,
            volume: Decimal::ZERO,
            quote_volume: Decimal::ZERO,
            close_time: from_ms(state.clock_ms),
        })
    }

    async fn klines(&self, _instrument: &str, _interval: &str, _limit: u32) -> ExchangeResult<Vec<Kline>> {
        Ok(Vec::new())
    }

    async fn account(&self) -> ExchangeResult<AccountBalance> {
        Ok(AccountBalance {
            can_trade: true,
            balances: vec![Balance { asset: "USDT".into(), free: Decimal::new(10_000, 0), locked: Decimal::ZERO }],
            update_time: from_ms(self.state.lock().clock_ms),
        })
    }

    async fn open_orders(&self, instrument: Option<&str>) -> ExchangeResult<Vec<ExchangeOrder>> {
        let state = self.state.lock();
        let mut orders: Vec<ExchangeOrder> = state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal() && instrument.is_none_or(|i| o.symbol == i))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.order_id);
        Ok(orders)
    }

    async fn all_orders(&self, query: &OrderQuery) -> ExchangeResult<Vec<ExchangeOrder>> {
        self.all_orders_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_instruments.lock().contains(&query.instrument) {
            return Err(ExchangeError::upstream("HTTP 503"));
        }
        if let Some(err) = self.history_error.lock().clone() {
            return Err(err);
        }
        let state = self.state.lock();
        let mut orders: Vec<ExchangeOrder> = state
            .orders
            .values()
            .filter(|o| o.symbol == query.instrument)
            .filter(|o| query.from_order_id.is_none_or(|id| o.order_id >= id))
            .filter(|o| query.start_time.is_none_or(|t| o.time >= t))
            .filter(|o| query.end_time.is_none_or(|t| o.time <= t))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.order_id);
        // Anchored queries return the oldest page, unanchored ones the newest.
        let limit = query.limit.unwrap_or(500).min(1000) as usize;
        if query.from_order_id.is_some() || query.start_time.is_some() {
            orders.truncate(limit);
        } else if orders.len() > limit {
            orders.drain(..orders.len() - limit);
        }
        Ok(orders)
    }

    /// Market orders fill immediately at the scripted price; limit orders rest.
    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<ExchangeOrder> {
        request.validate()?;
        let mut state = self.state.lock();
        let market = state.prices.get(&request.instrument).copied().unwrap_or_default();
        let price = request.price.unwrap_or(Decimal::ZERO);
        let mut order = Self::new_order(
            &mut state,
            &request.instrument,
            request.side,
            request.kind,
            request.quantity,
            price,
            request.stop_price,
            None,
        );
        if request.kind == OrderKind::Market {
            order.status = OrderStatus::Filled;
            order.executed_qty = request.quantity;
            order.cumulative_quote_qty = request.quantity * market;
        }
        state.orders.insert(order.order_id, order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, instrument: &str, order_id: u64) -> ExchangeResult<ExchangeOrder> {
        let mut state = self.state.lock();
        state.clock_ms += 1_000;
        let now = from_ms(state.clock_ms);
        match state.orders.get_mut(&order_id) {
            Some(order) if order.symbol == instrument && !order.status.is_terminal() => {
                order.status = OrderStatus::Canceled;
                order.update_time = now;
                Ok(order.clone())
            }
            _ => Err(ExchangeError::invalid("HTTP 400 code -2011: Unknown order sent.")),
        }
    }

    async fn place_oco(&self, request: &OcoRequest) -> ExchangeResult<OcoList> {
        if let Some(err) = self.oco_error.lock().take() {
            return Err(err);
        }
        let mut state = self.state.lock();
        state.next_list_id += 1;
        let list_id = state.next_list_id;
        let stop = Self::new_order(
            &mut state,
            &request.instrument,
            request.side,
            OrderKind::StopLimit,
            request.quantity,
            request.stop_limit_price,
            Some(request.stop_price),
            Some(list_id),
        );
        let take = Self::new_order(
            &mut state,
            &request.instrument,
            request.side,
            OrderKind::Limit,
            request.quantity,
            request.take_profit_price,
            None,
            Some(list_id),
        );
        state.orders.insert(stop.order_id, stop);
        state.orders.insert(take.order_id, take);
        Ok(Self::list(&state, list_id, &request.instrument, "EXECUTING"))
    }

    async fn cancel_oco(&self, instrument: &str, order_list_id: i64) -> ExchangeResult<OcoList> {
        let mut state = self.state.lock();
        state.clock_ms += 1_000;
        let now = from_ms(state.clock_ms);
        let mut found = false;
        for order in state.orders.values_mut().filter(|o| o.order_list_id == Some(order_list_id)) {
            found = true;
            if !order.status.is_terminal() {
                order.status = OrderStatus::Canceled;
                order.update_time = now;
            }
        }
        if !found {
            return Err(ExchangeError::invalid("HTTP 400 code -2011: Unknown order list sent."));
        }
        Ok(Self::list(&state, order_list_id, instrument, "ALL_DONE"))
    }
}

/// Start of the scripted clock plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    from_ms(T0_MS) + Duration::seconds(secs)
}
