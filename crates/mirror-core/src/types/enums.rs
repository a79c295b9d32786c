//! Enumerations shared by the mirror, the exchange adapter, and the matcher.
//!
//! Serialized names are the exchange's upper-case spellings (`BUY`,
//! `PARTIALLY_FILLED`, ...) so mirror log files read the same as exchange
//! responses.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Order side
// ---------------------------------------------------------------------------

/// Buy or sell direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side that closes a position opened on `self`.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Order kind
// ---------------------------------------------------------------------------

/// Order kind as the mirror records it.
///
/// Exchange-specific variants (limit-maker, take-profit-limit, ...) are folded
/// into these three by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    Limit,
    StopLimit,
}

// ---------------------------------------------------------------------------
// Order status
// ---------------------------------------------------------------------------

/// Order status. The exchange is the source of truth for this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Terminal statuses never change again on the exchange side.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::New | Self::PartiallyFilled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OCO leg
// ---------------------------------------------------------------------------

/// Which half of a bracket an order is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OcoLeg {
    /// Limit order on the profit side of the market.
    TakeProfit,
    /// Stop-limit order on the loss side of the market.
    StopLoss,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
    }

    #[test]
    fn wire_names() {
        assert_eq!(serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap(), "\"PARTIALLY_FILLED\"");
        assert_eq!(serde_json::to_string(&OcoLeg::TakeProfit).unwrap(), "\"TAKE_PROFIT\"");
        assert_eq!(serde_json::to_string(&OrderKind::StopLimit).unwrap(), "\"STOP_LIMIT\"");
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }
}
