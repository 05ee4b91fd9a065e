// =============================================================================
// Shared types used across the SpreadHawk arbitrage engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Side of an order or position leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// The reverse side, used for compensation orders.
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized order status.
///
/// Venues report status as free-form strings; adapters map them through
/// [`OrderStatus::from_venue`] so the engine never branches on raw strings.
/// Anything unrecognized becomes `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Unknown,
}

impl OrderStatus {
    /// Map a venue-reported status string, case-insensitively.
    ///
    /// Both "filled" and "closed" count as a complete fill; several venues
    /// report executed market orders as closed rather than filled.
    pub fn from_venue(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "new" | "open" | "live" | "pending" => Self::New,
            "partially_filled" | "partial_fill" | "partial-fill" => Self::PartiallyFilled,
            "filled" | "closed" => Self::Filled,
            "cancelled" | "canceled" => Self::Cancelled,
            "rejected" | "expired" => Self::Rejected,
            _ => Self::Unknown,
        }
    }

    /// True when the venue reports the order as fully executed.
    pub fn is_filled(self) -> bool {
        self == Self::Filled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PartiallyFilled => "partially_filled",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A venue order response, normalized at the adapter boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity_requested: f64,
    /// Executed quantity, when the venue reports it.
    pub quantity_filled: Option<f64>,
    /// Average fill price; 0.0 when the venue does not report fills.
    pub avg_price: f64,
    pub status: OrderStatus,
}

/// Balance snapshot for a single asset on a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub used: f64,
}

impl Balance {
    pub fn new(asset: impl Into<String>, free: f64, used: f64) -> Self {
        Self {
            asset: asset.into(),
            free,
            used,
        }
    }

    pub fn total(&self) -> f64 {
        self.free + self.used
    }
}

/// A single price observation emitted by a venue stream.
#[derive(Debug, Clone)]
pub struct PriceUpdate {
    pub symbol: String,
    pub price: f64,
    pub timestamp_ms: Option<i64>,
}

/// Arbitrage scenario: spot-vs-perp (A) or perp-vs-perp (B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    A,
    B,
}

impl Scenario {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            _ => None,
        }
    }
}

impl std::fmt::Display for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_status_mapping_is_case_insensitive() {
        assert_eq!(OrderStatus::from_venue("FILLED"), OrderStatus::Filled);
        assert_eq!(OrderStatus::from_venue("Closed"), OrderStatus::Filled);
        assert_eq!(OrderStatus::from_venue("new"), OrderStatus::New);
        assert_eq!(OrderStatus::from_venue("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(
            OrderStatus::from_venue("PARTIALLY_FILLED"),
            OrderStatus::PartiallyFilled
        );
    }

    #[test]
    fn unknown_status_strings_map_to_unknown() {
        assert_eq!(OrderStatus::from_venue("weird"), OrderStatus::Unknown);
        assert_eq!(OrderStatus::from_venue(""), OrderStatus::Unknown);
        assert!(!OrderStatus::from_venue("weird").is_filled());
    }

    #[test]
    fn opposite_side_round_trips() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
        assert_eq!(OrderSide::Buy.opposite().opposite(), OrderSide::Buy);
    }

    #[test]
    fn scenario_parses_both_cases() {
        assert_eq!(Scenario::parse("a"), Some(Scenario::A));
        assert_eq!(Scenario::parse("B"), Some(Scenario::B));
        assert_eq!(Scenario::parse("c"), None);
    }
}
