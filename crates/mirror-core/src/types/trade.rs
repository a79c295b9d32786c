//! Closed-trade records produced by FIFO matching.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One matched BUY → SELL slice with its realized result.
///
/// Derived data: never stored, recomputed from the mirror on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub instrument: String,
    pub entry_order_id: u64,
    pub exit_order_id: u64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// Price difference times quantity, net of both legs' pro-rated fees.
    pub realized_pnl: Decimal,
    /// `realized_pnl` relative to the entry notional, in percent.
    pub realized_pnl_percent: Decimal,
    pub fees: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub duration_label: String,
}

impl std::fmt::Display for ClosedTrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trade({} {}@{} -> {} pnl={} ({}%) held {})",
            self.instrument,
            self.quantity,
            self.entry_price,
            self.exit_price,
            self.realized_pnl.round_dp(8),
            self.realized_pnl_percent.round_dp(2),
            self.duration_label,
        )
    }
}
