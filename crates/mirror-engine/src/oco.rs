//! Bracket (OCO) placement and cancellation.
//!
//! A bracket is a take-profit limit and a stop-loss stop-limit on the exit
//! side of a filled entry, submitted as one exchange order list so that
//! whichever fills first cancels the other.
//!
//! ```text
//!            long entry (exit SELL)          short entry (exit BUY)
//!   price ▲  ── take_profit                  ── stop_loss
//!         │  ·· current                      ·· current
//!         │  ── stop_loss                    ── take_profit
//!         │  ── stop limit (below trigger)
//! ```
//!
//! The mirror rows for both legs are written together, and only after the
//! exchange has accepted the list.

use std::sync::Arc;

use mirror_core::config::TradingConfig;
use mirror_core::error::{ExchangeError, ExchangeResult};
use mirror_core::{OcoLeg, OcoList, OcoRequest, Order, Side};
use mirror_exchange::CachedGateway;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::price::PriceSource;
use crate::store::{OrderStore, upsert_from_exchange};

/// A bracket request for an existing filled entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BracketRequest {
    pub instrument: String,
    /// Side of the entry being protected; the legs go on the opposite side.
    pub entry_side: Side,
    pub quantity: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    #[serde(default)]
    pub client_list_id: Option<String>,
}

impl BracketRequest {
    pub fn exit_side(&self) -> Side {
        self.entry_side.opposite()
    }
}

/// The two mirrored legs of one order list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OcoGroup {
    pub order_list_id: i64,
    pub instrument: String,
    pub take_profit: Order,
    pub stop_loss: Order,
}

impl OcoGroup {
    /// Pair up two rows by leg. `None` unless there is exactly one of each.
    pub fn from_legs(order_list_id: i64, instrument: &str, legs: Vec<Order>) -> Option<Self> {
        if legs.len() != 2 {
            return None;
        }
        let mut take_profit = None;
        let mut stop_loss = None;
        for leg in legs {
            match leg.oco_leg {
                Some(OcoLeg::TakeProfit) => take_profit = Some(leg),
                Some(OcoLeg::StopLoss) => stop_loss = Some(leg),
                None => return None,
            }
        }
        Some(Self {
            order_list_id,
            instrument: instrument.to_owned(),
            take_profit: take_profit?,
            stop_loss: stop_loss?,
        })
    }

    pub fn into_orders(self) -> [Order; 2] {
        [self.take_profit, self.stop_loss]
    }
}

/// Check bracket levels against the current price.
pub fn validate_bracket(request: &BracketRequest, current: Decimal) -> ExchangeResult<()> {
    if request.quantity <= Decimal::ZERO {
        return Err(ExchangeError::invalid(format!("quantity must be positive, got {}", request.quantity)));
    }
    if request.take_profit <= Decimal::ZERO || request.stop_loss <= Decimal::ZERO {
        return Err(ExchangeError::invalid("take-profit and stop-loss must be positive"));
    }
    let (tp, sl) = (request.take_profit, request.stop_loss);
    let ordered = match request.exit_side() {
        Side::Sell => tp > current && current > sl,
        Side::Buy => tp < current && current < sl,
    };
    if !ordered {
        let expected = match request.exit_side() {
            Side::Sell => "take_profit > current > stop_loss",
            Side::Buy => "take_profit < current < stop_loss",
        };
        return Err(ExchangeError::invalid(format!(
            "bracket for {} {} entry needs {expected}; got tp={tp} current={current} sl={sl}",
            request.instrument, request.entry_side
        )));
    }
    Ok(())
}

/// Limit price for the stop leg: `offset_bps` beyond the trigger, on the
/// side that keeps the order marketable once triggered.
///
/// Rounded to the trigger's precision (at least two places), away from the
/// trigger.
pub fn stop_limit_price(exit_side: Side, stop: Decimal, offset_bps: u32) -> Decimal {
    let offset = Decimal::from(offset_bps) / Decimal::from(10_000);
    let scale = stop.scale().max(2);
    let limit = match exit_side {
        Side::Sell => (stop * (Decimal::ONE - offset)).round_dp_with_strategy(scale, RoundingStrategy::ToZero),
        Side::Buy => (stop * (Decimal::ONE + offset)).round_dp_with_strategy(scale, RoundingStrategy::AwayFromZero),
    };
    limit.normalize()
}

/// Places and cancels brackets, keeping the mirror in step.
pub struct OcoManager {
    gateway: Arc<CachedGateway>,
    store: Arc<dyn OrderStore>,
    prices: Arc<dyn PriceSource>,
    trading: TradingConfig,
}

impl OcoManager {
    pub fn new(
        gateway: Arc<CachedGateway>,
        store: Arc<dyn OrderStore>,
        prices: Arc<dyn PriceSource>,
        trading: TradingConfig,
    ) -> Self {
        Self { gateway, store, prices, trading }
    }

    /// Validate, submit one order list, then mirror both legs atomically.
    ///
    /// On any exchange error nothing is written.
    pub async fn place_bracket(&self, request: &BracketRequest) -> EngineResult<OcoGroup> {
        let current = self.prices.reference_price(&request.instrument).await?;
        validate_bracket(request, current)?;

        let exit_side = request.exit_side();
        let oco = OcoRequest {
            instrument: request.instrument.clone(),
            side: exit_side,
            quantity: request.quantity,
            take_profit_price: request.take_profit,
            stop_price: request.stop_loss,
            stop_limit_price: stop_limit_price(exit_side, request.stop_loss, self.trading.stop_limit_offset_bps),
            list_client_order_id: request.client_list_id.clone(),
        };

        let list = self.gateway.api().place_oco(&oco).await?;
        self.gateway.invalidate_orders();

        let group = self.group_from_list(&list).ok_or_else(|| {
            warn!(
                list = list.order_list_id,
                legs = list.orders.len(),
                "[oco] exchange accepted the list but the response is not a TP/SL pair; reconciliation will mirror it"
            );
            ExchangeError::upstream(format!(
                "order list {} response is not a take-profit/stop-loss pair",
                list.order_list_id
            ))
        })?;

        if let Err(e) = self.store.insert_many(group.clone().into_orders().to_vec()).await {
            error!(list = list.order_list_id, "[oco] bracket placed but not mirrored: {e}");
            return Err(e.into());
        }

        info!(
            instrument = %request.instrument,
            list = group.order_list_id,
            side = %exit_side,
            qty = %request.quantity,
            tp = %request.take_profit,
            sl = %request.stop_loss,
            stop_limit = %oco.stop_limit_price,
            "[oco] bracket placed"
        );
        Ok(group)
    }

    /// Cancel an order list and mark its legs with the exchange-reported
    /// state. The mirror is only touched after the exchange confirms.
    pub async fn cancel_bracket(&self, instrument: &str, order_list_id: i64) -> EngineResult<OcoGroup> {
        let list = self.gateway.api().cancel_oco(instrument, order_list_id).await?;
        self.gateway.invalidate_orders();
        self.gateway.invalidate_account();

        let mut legs = Vec::with_capacity(list.orders.len());
        for live in &list.orders {
            legs.push(upsert_from_exchange(self.store.as_ref(), live, self.trading.fee_rate).await?);
        }

        info!(instrument, list = order_list_id, status = %list.list_status, "[oco] bracket canceled");
        OcoGroup::from_legs(order_list_id, instrument, legs).ok_or_else(|| {
            EngineError::Exchange(ExchangeError::upstream(format!(
                "order list {order_list_id} cancel response is not a take-profit/stop-loss pair"
            )))
        })
    }

    fn group_from_list(&self, list: &OcoList) -> Option<OcoGroup> {
        let legs = list.orders.iter().map(|o| Order::from_exchange(o, self.trading.fee_rate)).collect();
        OcoGroup::from_legs(list.order_list_id, &list.symbol, legs)
    }
}
