//! Binance Spot adapter.
//!
//! Implements [`ExchangeApi`](crate::ExchangeApi) on top of the REST
//! [`SpotClient`]:
//!
//! ```text
//! BinanceExchange
//! ├── SpotClient     (HMAC signing, recvWindow, clock offset, retries)
//! │   └── ServerClock
//! └── wire           (raw JSON → typed payloads)
//! ```
//!
//! All methods take `&self` and are safe to call from multiple tasks
//! concurrently.

pub mod auth;
pub mod classify;
pub mod clock;
pub mod config;
pub mod spot;
pub mod wire;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mirror_core::error::{ExchangeError, ExchangeResult};
use mirror_core::time_util::from_ms;
use mirror_core::{
    AccountBalance, ExchangeInfo, ExchangeOrder, Kline, OcoList, OcoRequest, OrderKind, OrderQuery, OrderRequest,
    Ticker,
};
use reqwest::Method;
use tracing::{info, warn};

use self::config::BinanceConfig;
use self::spot::{Params, SpotClient};
use self::wire::{RawAccount, RawExchangeInfo, RawOrder, RawOrderList, RawTicker, decimal_param, decode};
use crate::{ExchangeApi, KLINE_INTERVALS};

/// Binance Spot exchange adapter.
pub struct BinanceExchange {
    spot: SpotClient,
}

impl BinanceExchange {
    /// Build the adapter. Credentials are not checked here; signed calls
    /// without them fail with `NotConfigured`.
    pub fn new(config: &BinanceConfig) -> ExchangeResult<Self> {
        if !config.has_credentials() {
            warn!("[binance] no API credentials configured, only public endpoints will work");
        }
        Ok(Self { spot: SpotClient::new(config)? })
    }

    pub fn spot(&self) -> &SpotClient {
        &self.spot
    }
}

fn check_instrument(instrument: &str) -> ExchangeResult<()> {
    let valid = !instrument.is_empty() && instrument.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if valid { Ok(()) } else { Err(ExchangeError::invalid(format!("malformed instrument `{instrument}`"))) }
}

fn order_params(request: &OrderRequest) -> Params {
    let mut params: Params = vec![
        ("symbol", request.instrument.clone()),
        ("side", request.side.as_str().to_owned()),
        ("type", wire::kind_param(request.kind).to_owned()),
        ("quantity", decimal_param(request.quantity)),
        ("newOrderRespType", "FULL".to_owned()),
    ];
    if request.kind != OrderKind::Market {
        params.push(("timeInForce", "GTC".to_owned()));
    }
    if let Some(price) = request.price {
        params.push(("price", decimal_param(price)));
    }
    if let Some(stop) = request.stop_price {
        params.push(("stopPrice", decimal_param(stop)));
    }
    if let Some(cid) = &request.client_order_id {
        params.push(("newClientOrderId", cid.clone()));
    }
    params
}

fn oco_params(request: &OcoRequest) -> Params {
    let mut params: Params = vec![
        ("symbol", request.instrument.clone()),
        ("side", request.side.as_str().to_owned()),
        ("quantity", decimal_param(request.quantity)),
        ("price", decimal_param(request.take_profit_price)),
        ("stopPrice", decimal_param(request.stop_price)),
        ("stopLimitPrice", decimal_param(request.stop_limit_price)),
        ("stopLimitTimeInForce", "GTC".to_owned()),
        ("newOrderRespType", "FULL".to_owned()),
    ];
    if let Some(cid) = &request.list_client_order_id {
        params.push(("listClientOrderId", cid.clone()));
    }
    params
}

#[async_trait]
impl ExchangeApi for BinanceExchange {
    fn name(&self) -> &str {
        "binance"
    }

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        Ok(from_ms(self.spot.server_time_ms().await?))
    }

    async fn exchange_info(&self) -> ExchangeResult<ExchangeInfo> {
        let body = self.spot.public_get("/api/v3/exchangeInfo", Vec::new()).await?;
        Ok(decode::<RawExchangeInfo>("exchange info", body)?.into_info())
    }

    async fn ticker_24h(&self, instrument: &str) -> ExchangeResult<Ticker> {
        check_instrument(instrument)?;
        let body = self.spot.public_get("/api/v3/ticker/24hr", vec![("symbol", instrument.to_owned())]).await?;
        Ok(decode::<RawTicker>("ticker", body)?.into_ticker())
    }

    async fn klines(&self, instrument: &str, interval: &str, limit: u32) -> ExchangeResult<Vec<Kline>> {
        check_instrument(instrument)?;
        if !KLINE_INTERVALS.contains(&interval) {
            return Err(ExchangeError::invalid(format!("unsupported kline interval `{interval}`")));
        }
        if !(1..=1000).contains(&limit) {
            return Err(ExchangeError::invalid(format!("kline limit must be 1..=1000, got {limit}")));
        }
        let params = vec![
            ("symbol", instrument.to_owned()),
            ("interval", interval.to_owned()),
            ("limit", limit.to_string()),
        ];
        let body = self.spot.public_get("/api/v3/klines", params).await?;
        wire::parse_klines(decode("klines", body)?)
    }

    async fn account(&self) -> ExchangeResult<AccountBalance> {
        let body = self.spot.signed_get("/api/v3/account", vec![("omitZeroBalances", "true".to_owned())]).await?;
        Ok(decode::<RawAccount>("account", body)?.into_balance())
    }

    async fn open_orders(&self, instrument: Option<&str>) -> ExchangeResult<Vec<ExchangeOrder>> {
        let mut params = Vec::new();
        if let Some(symbol) = instrument {
            check_instrument(symbol)?;
            params.push(("symbol", symbol.to_owned()));
        }
        let body = self.spot.signed_get("/api/v3/openOrders", params).await?;
        wire::into_orders(decode("open orders", body)?)
    }

    async fn all_orders(&self, query: &OrderQuery) -> ExchangeResult<Vec<ExchangeOrder>> {
        check_instrument(&query.instrument)?;
        let mut params = vec![("symbol", query.instrument.clone())];
        if let Some(id) = query.from_order_id {
            params.push(("orderId", id.to_string()));
        }
        if let Some(start) = query.start_time {
            params.push(("startTime", start.timestamp_millis().to_string()));
        }
        if let Some(end) = query.end_time {
            params.push(("endTime", end.timestamp_millis().to_string()));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.min(1000).to_string()));
        }
        let body = self.spot.signed_get("/api/v3/allOrders", params).await?;
        wire::into_orders(decode("order history", body)?)
    }

    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<ExchangeOrder> {
        request.validate()?;
        check_instrument(&request.instrument)?;
        let body = self.spot.signed_write(Method::POST, "/api/v3/order", order_params(request)).await?;
        let order = decode::<RawOrder>("order", body)?.into_order()?;
        info!(
            "[binance] order placed: {} {} {:?} qty={} status={} id={}",
            order.symbol, order.side, order.kind, order.orig_qty, order.status, order.order_id
        );
        Ok(order)
    }

    async fn cancel_order(&self, instrument: &str, order_id: u64) -> ExchangeResult<ExchangeOrder> {
        check_instrument(instrument)?;
        let params = vec![("symbol", instrument.to_owned()), ("orderId", order_id.to_string())];
        let body = self.spot.signed_write(Method::DELETE, "/api/v3/order", params).await?;
        let order = decode::<RawOrder>("canceled order", body)?.into_order()?;
        info!("[binance] order canceled: {} id={}", order.symbol, order.order_id);
        Ok(order)
    }

    async fn place_oco(&self, request: &OcoRequest) -> ExchangeResult<OcoList> {
        check_instrument(&request.instrument)?;
        let body = self.spot.signed_write(Method::POST, "/api/v3/order/oco", oco_params(request)).await?;
        let list = decode::<RawOrderList>("order list", body)?.into_list()?;
        info!(
            "[binance] OCO placed: {} {} qty={} tp={} sl={} list={}",
            list.symbol,
            request.side,
            request.quantity,
            request.take_profit_price,
            request.stop_price,
            list.order_list_id
        );
        Ok(list)
    }

    async fn cancel_oco(&self, instrument: &str, order_list_id: i64) -> ExchangeResult<OcoList> {
        check_instrument(instrument)?;
        let params = vec![("symbol", instrument.to_owned()), ("orderListId", order_list_id.to_string())];
        let body = self.spot.signed_write(Method::DELETE, "/api/v3/orderList", params).await?;
        let list = decode::<RawOrderList>("canceled order list", body)?.into_list()?;
        info!("[binance] OCO canceled: {} list={}", list.symbol, list.order_list_id);
        Ok(list)
    }
}
