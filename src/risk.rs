// =============================================================================
// Risk Gate — pre-trade checks and execution validation
// =============================================================================
//
// Three checks run, in order, before any order is placed:
//   1. Open-position limit, counted from the history store (survives restarts).
//   2. Leverage setup on perpetual symbols, best-effort.
//   3. Quote-currency balance sufficiency against margin requirement.
//
// The gate also owns the execution validation predicate the coordinator
// applies to every venue order response.
// =============================================================================

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TradingSettings;
use crate::exchanges::{VenueClient, VenueError};
use crate::history::HistoryStore;
use crate::types::{Order, OrderSide};

/// Relative fill-quantity tolerance accepted as "executed as intended".
pub const QTY_TOLERANCE: f64 = 0.01;

/// Quote asset whose balance backs both legs.
const DEFAULT_QUOTE_ASSET: &str = "USDT";

/// Symbol substrings marking a perpetual/swap instrument.
const DEFAULT_PERP_MARKERS: &[&str] = &["PERP", "SWAP"];

/// Fallback order quantity when no price is known for sizing.
const FALLBACK_QUANTITY: f64 = 0.001;

/// Typed pre-trade and validation failures.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("Insufficient {asset} balance on {venue}: required {required:.2}, available {available:.2}")]
    InsufficientBalance {
        venue: String,
        asset: String,
        required: f64,
        available: f64,
    },

    #[error("Maximum positions limit reached: {current}/{max}")]
    MaxPositionsReached { current: usize, max: u32 },

    #[error("execution discrepancy on {venue}: {detail}")]
    ExecutionDiscrepancy { venue: String, detail: String },

    #[error("balance check failed on {venue}: {source}")]
    BalanceUnavailable { venue: String, source: VenueError },
}

/// Enforces risk rules for order execution.
pub struct RiskGate {
    history: Arc<HistoryStore>,
    leverage: f64,
    max_positions: u32,
    fixed_order_size: f64,
    quote_asset: String,
    perp_markers: Vec<String>,
}

impl RiskGate {
    pub fn new(trading: &TradingSettings, history: Arc<HistoryStore>) -> Self {
        Self {
            history,
            leverage: trading.leverage,
            max_positions: trading.max_positions,
            fixed_order_size: trading.fixed_order_size,
            quote_asset: DEFAULT_QUOTE_ASSET.to_string(),
            perp_markers: DEFAULT_PERP_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    // -------------------------------------------------------------------------
    // Pre-trade checks
    // -------------------------------------------------------------------------

    /// Reject when `current_positions` already meets the configured cap.
    /// With max_positions = 0 every entry is blocked.
    pub fn check_position_limit(&self, current_positions: usize) -> Result<(), RiskError> {
        if current_positions >= self.max_positions as usize {
            return Err(RiskError::MaxPositionsReached {
                current: current_positions,
                max: self.max_positions,
            });
        }
        Ok(())
    }

    /// Set leverage on the venue when the symbol looks perpetual.
    ///
    /// Best-effort: failures (including venues without the operation) are
    /// logged and never block the trade.
    pub async fn set_leverage_if_needed(&self, client: &dyn VenueClient, symbol: &str) {
        let upper = symbol.to_uppercase();
        let is_perpetual = self.perp_markers.iter().any(|m| upper.contains(m));
        if !is_perpetual {
            return;
        }

        match client.set_leverage(self.leverage, Some(symbol)).await {
            Ok(()) => {
                debug!(venue = client.name(), symbol, leverage = self.leverage, "leverage set");
            }
            Err(e) => {
                warn!(
                    venue = client.name(),
                    symbol,
                    error = %e,
                    "failed to set leverage, continuing"
                );
            }
        }
    }

    /// Verify the quote balance covers `quantity * price / leverage`.
    ///
    /// Without a price hint the requirement cannot be estimated; the check
    /// is skipped with a warning. An insufficient balance is recorded to
    /// history before the error is returned.
    pub async fn check_balance_sufficiency(
        &self,
        client: &dyn VenueClient,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price_hint: Option<f64>,
    ) -> Result<(), RiskError> {
        let venue = client.name().to_string();

        let Some(price) = price_hint.filter(|p| *p > 0.0) else {
            warn!(venue = %venue, symbol, "no price hint for balance check, skipping");
            return Ok(());
        };

        let balance = client
            .get_balance(&self.quote_asset)
            .await
            .map_err(|source| RiskError::BalanceUnavailable {
                venue: venue.clone(),
                source,
            })?;
        let available = balance.free;

        // Margin requirement: both buy and sell legs consume quote margin
        // on perpetuals, scaled down by leverage.
        let required = (quantity * price) / self.leverage;

        if available < required {
            self.history
                .record_insufficient_balance(&venue, symbol, required, available);
            return Err(RiskError::InsufficientBalance {
                venue,
                asset: self.quote_asset.clone(),
                required,
                available,
            });
        }

        debug!(
            venue = %venue,
            side = %side,
            required,
            available,
            "balance check passed"
        );
        Ok(())
    }

    /// Current open-position count from the durable event log.
    pub fn open_position_count(&self) -> Result<usize, anyhow::Error> {
        self.history.count_open_positions()
    }

    // -------------------------------------------------------------------------
    // Sizing
    // -------------------------------------------------------------------------

    /// Order quantity from the fixed quote-denominated order size.
    pub fn order_quantity(&self, price_hint: Option<f64>) -> f64 {
        match price_hint.filter(|p| *p > 0.0) {
            Some(price) => self.fixed_order_size / price,
            None => {
                warn!("no price for quantity calculation, using fallback");
                FALLBACK_QUANTITY
            }
        }
    }

    // -------------------------------------------------------------------------
    // Execution validation
    // -------------------------------------------------------------------------

    /// Check that an order response matches the intended execution: status
    /// fully filled and, when the venue reports fills, quantity within
    /// tolerance of the request.
    pub fn validate_execution(
        &self,
        venue: &str,
        order: &Order,
        expected_quantity: f64,
    ) -> Result<(), RiskError> {
        if !order.status.is_filled() {
            return Err(RiskError::ExecutionDiscrepancy {
                venue: venue.to_string(),
                detail: format!(
                    "order {} not confirmed as filled: status={}",
                    order.order_id, order.status
                ),
            });
        }

        if let Some(filled) = order.quantity_filled {
            if expected_quantity > 0.0 {
                let rel_diff = (filled - expected_quantity).abs() / expected_quantity;
                if rel_diff > QTY_TOLERANCE {
                    return Err(RiskError::ExecutionDiscrepancy {
                        venue: venue.to_string(),
                        detail: format!(
                            "order {} quantity mismatch: expected={expected_quantity}, filled={filled}",
                            order.order_id
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for RiskGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskGate")
            .field("leverage", &self.leverage)
            .field("max_positions", &self.max_positions)
            .field("fixed_order_size", &self.fixed_order_size)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderStatus;
    use tempfile::tempdir;

    fn gate(max_positions: u32, leverage: f64) -> (RiskGate, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let history = Arc::new(HistoryStore::new(dir.path()).unwrap());
        let trading = TradingSettings {
            leverage,
            max_positions,
            fixed_order_size: 100.0,
        };
        (RiskGate::new(&trading, history), dir)
    }

    fn filled_order(quantity_filled: Option<f64>) -> Order {
        Order {
            order_id: "1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            quantity_requested: 1.0,
            quantity_filled,
            avg_price: 100.0,
            status: OrderStatus::Filled,
        }
    }

    #[test]
    fn position_limit_blocks_at_cap() {
        let (gate, _dir) = gate(2, 1.0);
        assert!(gate.check_position_limit(0).is_ok());
        assert!(gate.check_position_limit(1).is_ok());
        let err = gate.check_position_limit(2).unwrap_err();
        assert!(err.to_string().contains("Maximum positions"));
    }

    #[test]
    fn zero_max_positions_blocks_every_entry() {
        let (gate, _dir) = gate(0, 1.0);
        assert!(matches!(
            gate.check_position_limit(0),
            Err(RiskError::MaxPositionsReached { .. })
        ));
    }

    #[test]
    fn order_quantity_divides_fixed_size_by_price() {
        let (gate, _dir) = gate(1, 1.0);
        assert!((gate.order_quantity(Some(50000.0)) - 0.002).abs() < 1e-12);
        assert_eq!(gate.order_quantity(None), FALLBACK_QUANTITY);
        assert_eq!(gate.order_quantity(Some(0.0)), FALLBACK_QUANTITY);
    }

    #[test]
    fn validation_accepts_filled_within_tolerance() {
        let (gate, _dir) = gate(1, 1.0);
        assert!(gate
            .validate_execution("binance", &filled_order(Some(1.0)), 1.0)
            .is_ok());
        // 0.5% off is inside the 1% tolerance.
        assert!(gate
            .validate_execution("binance", &filled_order(Some(0.995)), 1.0)
            .is_ok());
        // Unknown fill quantity passes on status alone.
        assert!(gate
            .validate_execution("binance", &filled_order(None), 1.0)
            .is_ok());
    }

    #[test]
    fn validation_rejects_unfilled_status() {
        let (gate, _dir) = gate(1, 1.0);
        let mut order = filled_order(Some(1.0));
        order.status = OrderStatus::New;
        let err = gate.validate_execution("binance", &order, 1.0).unwrap_err();
        assert!(matches!(err, RiskError::ExecutionDiscrepancy { .. }));
    }

    #[test]
    fn validation_rejects_quantity_off_by_more_than_tolerance() {
        let (gate, _dir) = gate(1, 1.0);
        let err = gate
            .validate_execution("binance", &filled_order(Some(0.9)), 1.0)
            .unwrap_err();
        assert!(err.to_string().contains("quantity mismatch"));
    }

    #[test]
    fn balance_requirement_scales_with_leverage() {
        // required = qty * price / leverage: 1.0 * 50000 / 3 ~ 16666.67
        let required: f64 = (1.0 * 50000.0) / 3.0;
        assert!((required - 16666.67).abs() < 0.01);
    }
}
