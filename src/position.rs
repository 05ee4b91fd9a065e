// =============================================================================
// Position — two-leg hedged position and its lifecycle transitions
// =============================================================================
//
// Life-cycle:
//   Pending -> Opened -> Closing -> Closed
//   Error is terminal and reachable from any non-terminal state.
//
// Leg A is always the buy leg and leg B the sell leg, by construction.
// Scenario B decides at creation time which venue is cheap and assigns the
// buy leg there. Pure data, no I/O: the coordinator drives transitions.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{OrderSide, Scenario};

/// Position lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Pending,
    Opened,
    Closing,
    Closed,
    Error,
}

impl PositionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Opened => "opened",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }

}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An arbitrage position: a pair of hedged legs on two venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub scenario: Scenario,
    pub venue_a: String,
    pub symbol_a: String,
    pub side_a: OrderSide,
    pub qty_a: f64,
    pub venue_b: String,
    pub symbol_b: String,
    pub side_b: OrderSide,
    pub qty_b: f64,
    pub entry_price_a: f64,
    pub entry_price_b: f64,
    pub entry_spread: f64,
    pub order_id_a: Option<String>,
    pub order_id_b: Option<String>,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_spread: Option<f64>,
    pub pnl: Option<f64>,
}

impl Position {
    /// Create a pending position. Leg A buys, leg B sells.
    pub fn new(
        scenario: Scenario,
        venue_a: impl Into<String>,
        symbol_a: impl Into<String>,
        qty_a: f64,
        venue_b: impl Into<String>,
        symbol_b: impl Into<String>,
        qty_b: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario,
            venue_a: venue_a.into(),
            symbol_a: symbol_a.into(),
            side_a: OrderSide::Buy,
            qty_a,
            venue_b: venue_b.into(),
            symbol_b: symbol_b.into(),
            side_b: OrderSide::Sell,
            qty_b,
            entry_price_a: 0.0,
            entry_price_b: 0.0,
            entry_spread: 0.0,
            order_id_a: None,
            order_id_b: None,
            status: PositionStatus::Pending,
            created_at: Utc::now(),
            opened_at: None,
            closed_at: None,
            exit_spread: None,
            pnl: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Opened
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    // -------------------------------------------------------------------------
    // Lifecycle transitions
    // -------------------------------------------------------------------------

    /// Record confirmed entry fills: Pending -> Opened.
    pub fn mark_opened(&mut self, entry_price_a: f64, entry_price_b: f64) {
        self.entry_price_a = entry_price_a;
        self.entry_price_b = entry_price_b;
        self.entry_spread = self.spread_between(entry_price_a, entry_price_b);
        self.opened_at = Some(Utc::now());
        self.status = PositionStatus::Opened;
    }

    /// Record confirmed exit fills: Closing -> Closed. Computes exit spread
    /// and PnL; PnL is defined only in this state.
    pub fn mark_closed(&mut self, exit_price_a: f64, exit_price_b: f64) {
        self.exit_spread = Some(self.spread_between(exit_price_a, exit_price_b));
        self.pnl = Some(self.calculate_pnl(exit_price_a, exit_price_b));
        self.closed_at = Some(Utc::now());
        self.status = PositionStatus::Closed;
    }

    /// Terminal error state; compensation is the coordinator's concern.
    pub fn mark_error(&mut self) {
        self.status = PositionStatus::Error;
    }

    // -------------------------------------------------------------------------
    // Derived values
    // -------------------------------------------------------------------------

    /// Spread between the two leg prices, per scenario convention:
    /// scenario A is (a - b) / b, scenario B is (b - a) / a.
    pub fn spread_between(&self, price_a: f64, price_b: f64) -> f64 {
        match self.scenario {
            Scenario::A => {
                if price_b == 0.0 {
                    0.0
                } else {
                    (price_a - price_b) / price_b
                }
            }
            Scenario::B => {
                if price_a == 0.0 {
                    0.0
                } else {
                    (price_b - price_a) / price_a
                }
            }
        }
    }

    /// PnL of the closed hedge. Leg A is long and leg B short in both
    /// scenarios, so a single identity applies:
    ///
    ///   pnl = (exit_a - entry_a) * qty_a + (entry_b - exit_b) * qty_b
    fn calculate_pnl(&self, exit_price_a: f64, exit_price_b: f64) -> f64 {
        let leg_a = (exit_price_a - self.entry_price_a) * self.qty_a;
        let leg_b = (self.entry_price_b - exit_price_b) * self.qty_b;
        leg_a + leg_b
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_a_position() -> Position {
        Position::new(Scenario::A, "binance", "BTCUSDT", 1.0, "okx", "BTCUSDT", 1.0)
    }

    #[test]
    fn new_position_is_pending_with_fixed_sides() {
        let pos = scenario_a_position();
        assert_eq!(pos.status, PositionStatus::Pending);
        assert_eq!(pos.side_a, OrderSide::Buy);
        assert_eq!(pos.side_b, OrderSide::Sell);
        assert!(pos.order_id_a.is_none());
        assert!(pos.pnl.is_none());
    }

    #[test]
    fn mark_opened_sets_prices_spread_and_timestamp() {
        let mut pos = scenario_a_position();
        pos.mark_opened(48000.0, 46000.0);

        assert_eq!(pos.status, PositionStatus::Opened);
        assert!(pos.is_open());
        assert_eq!(pos.entry_price_a, 48000.0);
        assert_eq!(pos.entry_price_b, 46000.0);
        assert!((pos.entry_spread - (48000.0 - 46000.0) / 46000.0).abs() < 1e-12);
        assert!(pos.opened_at.is_some());
    }

    #[test]
    fn mark_closed_computes_long_a_pnl() {
        let mut pos = scenario_a_position();
        pos.mark_opened(48000.0, 46000.0);
        pos.status = PositionStatus::Closing;
        pos.mark_closed(46500.0, 46400.0);

        assert!(pos.is_closed());
        // Long leg A loses (46500 - 48000), short leg B gains (46000 - 46400 reversed).
        let expected = (46500.0 - 48000.0) * 1.0 + (46000.0 - 46400.0) * 1.0;
        assert!((pos.pnl.unwrap() - expected).abs() < 1e-9);
        assert!(pos.exit_spread.is_some());
        assert!(pos.closed_at.is_some());
    }

    #[test]
    fn scenario_b_uses_same_pnl_identity() {
        let mut pos =
            Position::new(Scenario::B, "bybit", "BTCUSDT", 0.5, "okx", "BTCUSDT", 0.5);
        // Leg A bought cheap at 100, leg B sold expensive at 107.
        pos.mark_opened(100.0, 107.0);
        pos.status = PositionStatus::Closing;
        pos.mark_closed(103.0, 104.0);

        let expected = (103.0 - 100.0) * 0.5 + (107.0 - 104.0) * 0.5;
        assert!((pos.pnl.unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn spread_convention_differs_per_scenario() {
        let pos_a = scenario_a_position();
        assert!((pos_a.spread_between(104.0, 100.0) - 0.04).abs() < 1e-12);

        let pos_b =
            Position::new(Scenario::B, "bybit", "BTCUSDT", 1.0, "okx", "BTCUSDT", 1.0);
        assert!((pos_b.spread_between(100.0, 104.0) - 0.04).abs() < 1e-12);
    }

    #[test]
    fn zero_price_spread_is_zero() {
        let pos = scenario_a_position();
        assert_eq!(pos.spread_between(100.0, 0.0), 0.0);
        let pos_b =
            Position::new(Scenario::B, "bybit", "BTCUSDT", 1.0, "okx", "BTCUSDT", 1.0);
        assert_eq!(pos_b.spread_between(0.0, 100.0), 0.0);
    }

    #[test]
    fn mark_error_is_terminal_from_any_state() {
        let mut pending = scenario_a_position();
        pending.mark_error();
        assert_eq!(pending.status, PositionStatus::Error);

        let mut opened = scenario_a_position();
        opened.mark_opened(100.0, 99.0);
        opened.mark_error();
        assert_eq!(opened.status, PositionStatus::Error);
        assert!(!opened.is_open());
    }
}
