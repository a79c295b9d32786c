//! Binance REST response shapes and their conversion to typed payloads.
//!
//! Raw structs mirror the JSON exactly (including Binance's
//! `cummulativeQuoteQty` spelling); `into_*` methods validate enums and
//! normalize optional fields. Anything unexpected becomes
//! `UpstreamUnavailable`, since a payload we cannot read is an upstream fault.

use mirror_core::error::{ExchangeError, ExchangeResult};
use mirror_core::time_util::{from_ms, now_ms};
use mirror_core::{
    AccountBalance, Balance, ExchangeInfo, ExchangeOrder, Kline, OcoList, OrderKind, OrderStatus, Side,
    SymbolInfo, Ticker,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Deserialize a response body, mapping failure to `UpstreamUnavailable`.
pub fn decode<T: DeserializeOwned>(what: &str, value: serde_json::Value) -> ExchangeResult<T> {
    serde_json::from_value(value).map_err(|e| ExchangeError::upstream(format!("malformed {what} payload: {e}")))
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

pub fn parse_side(raw: &str) -> ExchangeResult<Side> {
    match raw {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(ExchangeError::upstream(format!("unknown order side `{other}`"))),
    }
}

/// Binance order types onto the three kinds the mirror tracks. Triggered
/// market types count as market, triggered limit types as stop-limit.
pub fn parse_kind(raw: &str) -> ExchangeResult<OrderKind> {
    match raw {
        "MARKET" | "STOP_LOSS" | "TAKE_PROFIT" => Ok(OrderKind::Market),
        "LIMIT" | "LIMIT_MAKER" => Ok(OrderKind::Limit),
        "STOP_LOSS_LIMIT" | "TAKE_PROFIT_LIMIT" => Ok(OrderKind::StopLimit),
        other => Err(ExchangeError::upstream(format!("unknown order type `{other}`"))),
    }
}

pub fn parse_status(raw: &str) -> ExchangeResult<OrderStatus> {
    match raw {
        "NEW" | "PENDING_NEW" => Ok(OrderStatus::New),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "PENDING_CANCEL" => Ok(OrderStatus::Canceled),
        "REJECTED" => Ok(OrderStatus::Rejected),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        other => Err(ExchangeError::upstream(format!("unknown order status `{other}`"))),
    }
}

/// Wire name of an order kind for placement.
pub fn kind_param(kind: OrderKind) -> &'static str {
    match kind {
        OrderKind::Market => "MARKET",
        OrderKind::Limit => "LIMIT",
        OrderKind::StopLimit => "STOP_LOSS_LIMIT",
    }
}

/// Decimal rendered without trailing zeros, as Binance expects.
pub fn decimal_param(value: Decimal) -> String {
    value.normalize().to_string()
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFill {
    pub price: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
}

/// Order as returned by `/order`, `/openOrders`, `/allOrders`, and inside
/// order-list reports.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrder {
    pub symbol: String,
    pub order_id: u64,
    #[serde(default = "no_list")]
    pub order_list_id: i64,
    pub client_order_id: String,
    pub price: Decimal,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty")]
    pub cumulative_quote_qty: Decimal,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub update_time: Option<i64>,
    #[serde(default)]
    pub transact_time: Option<i64>,
    #[serde(default)]
    pub fills: Vec<RawFill>,
}

fn no_list() -> i64 {
    -1
}

impl RawOrder {
    pub fn into_order(self) -> ExchangeResult<ExchangeOrder> {
        let commission = self.quote_commission();
        let created = self.time.or(self.transact_time).unwrap_or_else(now_ms);
        let updated = self.update_time.or(self.transact_time).unwrap_or(created);

        Ok(ExchangeOrder {
            side: parse_side(&self.side)?,
            kind: parse_kind(&self.order_type)?,
            status: parse_status(&self.status)?,
            order_list_id: (self.order_list_id >= 0).then_some(self.order_list_id),
            stop_price: self.stop_price.filter(|p| !p.is_zero()),
            commission,
            time: from_ms(created),
            update_time: from_ms(updated),
            symbol: self.symbol,
            order_id: self.order_id,
            client_order_id: self.client_order_id,
            price: self.price,
            orig_qty: self.orig_qty,
            executed_qty: self.executed_qty,
            cumulative_quote_qty: self.cumulative_quote_qty,
        })
    }

    /// Sum of fill commissions in quote terms.
    ///
    /// Commission paid in the quote asset counts as-is; in the base asset it
    /// is converted at the fill price. Any third asset (fee discounts paid in
    /// another token) makes the total unknown, and the caller falls back to
    /// the configured rate.
    fn quote_commission(&self) -> Option<Decimal> {
        if self.fills.is_empty() {
            return None;
        }
        let mut total = Decimal::ZERO;
        for fill in &self.fills {
            if self.symbol.ends_with(fill.commission_asset.as_str()) {
                total += fill.commission;
            } else if self.symbol.starts_with(fill.commission_asset.as_str()) {
                total += fill.commission * fill.price;
            } else {
                return None;
            }
        }
        Some(total)
    }
}

pub fn into_orders(raw: Vec<RawOrder>) -> ExchangeResult<Vec<ExchangeOrder>> {
    raw.into_iter().map(RawOrder::into_order).collect()
}

/// Order list (OCO) placement or cancellation response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOrderList {
    pub order_list_id: i64,
    pub symbol: String,
    pub list_order_status: String,
    #[serde(default)]
    pub order_reports: Vec<RawOrder>,
}

impl RawOrderList {
    pub fn into_list(self) -> ExchangeResult<OcoList> {
        let list_id = self.order_list_id;
        let mut orders = into_orders(self.order_reports)?;
        // Reports always belong to the list even if a leg omits the id.
        for order in &mut orders {
            order.order_list_id.get_or_insert(list_id);
        }
        Ok(OcoList { order_list_id: list_id, symbol: self.symbol, list_status: self.list_order_status, orders })
    }
}

// ---------------------------------------------------------------------------
// Account and market data
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAccount {
    pub can_trade: bool,
    pub update_time: i64,
    pub balances: Vec<Balance>,
}

impl RawAccount {
    pub fn into_balance(self) -> AccountBalance {
        AccountBalance {
            can_trade: self.can_trade,
            balances: self.balances.into_iter().filter(|b| !b.total().is_zero()).collect(),
            update_time: from_ms(self.update_time),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTicker {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change_percent: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub close_time: i64,
}

impl RawTicker {
    pub fn into_ticker(self) -> Ticker {
        Ticker {
            symbol: self.symbol,
            last_price: self.last_price,
            price_change_percent: self.price_change_percent,
            high_price: self.high_price,
            low_price: self.low_price,
            volume: self.volume,
            quote_volume: self.quote_volume,
            close_time: from_ms(self.close_time),
        }
    }
}

/// Klines arrive as positional arrays:
/// `[openTime, open, high, low, close, volume, closeTime, ...]`.
pub fn parse_klines(rows: Vec<Vec<serde_json::Value>>) -> ExchangeResult<Vec<Kline>> {
    rows.into_iter().map(|row| parse_kline(&row)).collect()
}

fn parse_kline(row: &[serde_json::Value]) -> ExchangeResult<Kline> {
    if row.len() < 7 {
        return Err(ExchangeError::upstream(format!("kline row has {} fields, expected at least 7", row.len())));
    }
    let time = |i: usize| {
        row[i]
            .as_i64()
            .map(from_ms)
            .ok_or_else(|| ExchangeError::upstream(format!("kline field {i} is not a timestamp")))
    };
    let num = |i: usize| -> ExchangeResult<Decimal> {
        row[i]
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ExchangeError::upstream(format!("kline field {i} is not a decimal string")))
    };
    Ok(Kline {
        open_time: time(0)?,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
        close_time: time(6)?,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSymbol {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    #[serde(default)]
    pub oco_allowed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawExchangeInfo {
    pub server_time: i64,
    pub symbols: Vec<RawSymbol>,
}

impl RawExchangeInfo {
    pub fn into_info(self) -> ExchangeInfo {
        ExchangeInfo {
            server_time: from_ms(self.server_time),
            symbols: self
                .symbols
                .into_iter()
                .map(|s| SymbolInfo {
                    symbol: s.symbol,
                    status: s.status,
                    base_asset: s.base_asset,
                    quote_asset: s.quote_asset,
                    oco_allowed: s.oco_allowed,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServerTime {
    pub server_time: i64,
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    fn sample_order() -> serde_json::Value {
        json!({
            "symbol": "BTCUSDT",
            "orderId": 28,
            "orderListId": -1,
            "clientOrderId": "6gCrw2kRUAF9CvJDGP16IP",
            "price": "0.00000000",
            "origQty": "0.50000000",
            "executedQty": "0.50000000",
            "cummulativeQuoteQty": "32500.00000000",
            "status": "FILLED",
            "timeInForce": "GTC",
            "type": "MARKET",
            "side": "BUY",
            "stopPrice": "0.00000000",
            "time": 1_700_000_000_000i64,
            "updateTime": 1_700_000_000_500i64
        })
    }

    #[test]
    fn order_from_query_response() {
        let raw: RawOrder = decode("order", sample_order()).unwrap();
        let order = raw.into_order().unwrap();

        assert_eq!(order.order_id, 28);
        assert_eq!(order.order_list_id, None);
        assert_eq!(order.kind, OrderKind::Market);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.stop_price, None, "zero stop price means none");
        assert_eq!(order.cumulative_quote_qty, dec!(32500));
        assert_eq!(order.commission, None);
        assert_eq!(order.update_time.timestamp_millis(), 1_700_000_000_500);
    }

    #[test]
    fn placement_fills_give_quote_commission() {
        let mut value = sample_order();
        value["transactTime"] = json!(1_700_000_000_100i64);
        value["fills"] = json!([
            {"price": "65000", "qty": "0.25", "commission": "16.25", "commissionAsset": "USDT"},
            {"price": "65000", "qty": "0.25", "commission": "0.00025", "commissionAsset": "BTC"}
        ]);
        let order = decode::<RawOrder>("order", value).unwrap().into_order().unwrap();
        assert_eq!(order.commission, Some(dec!(32.5)));

        let mut value = sample_order();
        value["fills"] = json!([{"price": "65000", "qty": "0.5", "commission": "0.01", "commissionAsset": "BNB"}]);
        let order = decode::<RawOrder>("order", value).unwrap().into_order().unwrap();
        assert_eq!(order.commission, None, "third-asset commission falls back to the rate");
    }

    #[test]
    fn unknown_status_is_upstream_fault() {
        let mut value = sample_order();
        value["status"] = json!("MYSTERY");
        let err = decode::<RawOrder>("order", value).unwrap().into_order().unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn order_list_assigns_ids_to_reports() {
        let mut leg = sample_order();
        leg["type"] = json!("STOP_LOSS_LIMIT");
        leg["status"] = json!("NEW");
        leg["orderListId"] = json!(-1);
        let value = json!({
            "orderListId": 77,
            "contingencyType": "OCO",
            "listStatusType": "EXEC_STARTED",
            "listOrderStatus": "EXECUTING",
            "symbol": "BTCUSDT",
            "orderReports": [leg]
        });
        let list = decode::<RawOrderList>("order list", value).unwrap().into_list().unwrap();
        assert_eq!(list.orders[0].order_list_id, Some(77));
        assert_eq!(list.orders[0].kind, OrderKind::StopLimit);
    }

    #[test]
    fn account_drops_empty_balances() {
        let value = json!({
            "canTrade": true,
            "updateTime": 1_700_000_000_000i64,
            "balances": [
                {"asset": "BTC", "free": "0.5", "locked": "0.1"},
                {"asset": "LTC", "free": "0.00000000", "locked": "0.00000000"}
            ]
        });
        let account = decode::<RawAccount>("account", value).unwrap().into_balance();
        assert_eq!(account.balances.len(), 1);
        assert_eq!(account.balances[0].total(), dec!(0.6));
    }

    #[test]
    fn klines_from_arrays() {
        let rows: Vec<Vec<serde_json::Value>> = serde_json::from_value(json!([
            [1_700_000_000_000i64, "1.0", "2.0", "0.5", "1.5", "100", 1_700_000_059_999i64, "150", 10, "50", "75", "0"]
        ]))
        .unwrap();
        let klines = parse_klines(rows).unwrap();
        assert_eq!(klines[0].close, dec!(1.5));
        assert!(parse_klines(vec![vec![json!(1)]]).is_err());
    }

    #[test]
    fn decimal_params_drop_trailing_zeros() {
        assert_eq!(decimal_param(dec!(0.50000000)), "0.5");
        assert_eq!(decimal_param(dec!(65000.00)), "65000");
    }
}
