//! # mirror-engine
//!
//! The order mirror and everything that keeps it honest:
//!
//! - [`store`]: append-only order event log (memory or JSON lines)
//! - [`oco`]: bracket placement and cancellation
//! - [`reconcile`]: scheduled convergence with the exchange
//! - [`matcher`]: FIFO closed-trade P&L
//! - [`service`]: the caller-facing [`MirrorService`]

pub mod error;
pub mod matcher;
pub mod oco;
pub mod price;
pub mod reconcile;
pub mod service;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{EngineError, EngineResult};
pub use matcher::{TimeRange, TradeMatcher, match_trades};
pub use oco::{BracketRequest, OcoGroup, OcoManager};
pub use price::{PriceSource, TickerPriceSource};
pub use reconcile::{ReconcileReport, Reconciler};
pub use service::{MirrorService, MirrorSettings, MirrorStats};
pub use store::{FileOrderStore, MemoryOrderStore, OrderFilter, OrderStore};
