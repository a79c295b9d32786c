//! Core data types: enums, typed exchange payloads, mirrored orders, and
//! closed trades.
//!
//! Prices and quantities are `rust_decimal::Decimal` throughout so P&L sums
//! are exact.

pub mod enums;
pub mod exchange;
pub mod order;
pub mod trade;

pub use enums::*;
pub use exchange::*;
pub use order::*;
pub use trade::*;
