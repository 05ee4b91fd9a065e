// =============================================================================
// Order Coordinator — two-leg execution state machine with compensation
// =============================================================================
//
// Goal: either both legs end filled with the intended side and quantity, or
// the position is left flat on both venues and marked error. Market orders
// on two venues cannot be committed atomically, so every unhappy branch
// compensates forward: cancel the unconfirmed leg (best-effort) and flatten
// whatever may have executed with a reverse-side market order.
//
// A compensating order may itself fail or partially fill. That outcome is
// recorded honestly and the position stays in error; manual intervention is
// the designed fallback, the coordinator never loops trying to reconcile.
//
// All steps run sequentially: a concurrent leg-B placement before leg A is
// validated would make the cleanup logic ambiguous. Every venue and history
// call is an await point, so other positions and stream tasks interleave.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::exchanges::VenueClient;
use crate::history::HistoryStore;
use crate::position::Position;
use crate::risk::RiskGate;
use crate::types::{OrderSide, Scenario};

/// Coordinates entry and exit of two-leg hedged positions.
pub struct OrderCoordinator {
    risk: RiskGate,
    history: Arc<HistoryStore>,
    /// Snapshots of currently open positions, keyed by id. The durable
    /// truth is the history store; this is the hot in-memory view.
    active: RwLock<HashMap<Uuid, Position>>,
}

impl OrderCoordinator {
    pub fn new(risk: RiskGate, history: Arc<HistoryStore>) -> Self {
        Self {
            risk,
            history,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn risk(&self) -> &RiskGate {
        &self.risk
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    /// Create a pending position and record its creation.
    pub fn create_position(
        &self,
        scenario: Scenario,
        venue_a: &str,
        symbol_a: &str,
        qty_a: f64,
        venue_b: &str,
        symbol_b: &str,
        qty_b: f64,
    ) -> Position {
        let position = Position::new(scenario, venue_a, symbol_a, qty_a, venue_b, symbol_b, qty_b);
        self.history.record_position_created(&position);
        info!(
            position_id = %position.id,
            scenario = %scenario,
            venue_a,
            venue_b,
            "position created"
        );
        position
    }

    /// Snapshot of currently open positions.
    pub fn active_positions(&self) -> Vec<Position> {
        self.active.read().values().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Entry
    // -------------------------------------------------------------------------

    /// Run the entry state machine. Returns whether the position opened.
    ///
    /// Any unhappy branch records its events, compensates where orders may
    /// live on a venue, marks the position error, and returns false; errors
    /// never propagate to the strategy.
    pub async fn entry_order(
        &self,
        position: &mut Position,
        client_a: &dyn VenueClient,
        client_b: &dyn VenueClient,
        price_hint_a: Option<f64>,
        price_hint_b: Option<f64>,
    ) -> bool {
        info!(position_id = %position.id, "placing entry orders");

        // --- Pre-trade gates (no orders yet, nothing to compensate) ------
        let open_count = match self.risk.open_position_count() {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "open-position count unavailable, using in-memory view");
                self.active.read().len()
            }
        };
        if let Err(e) = self.risk.check_position_limit(open_count) {
            warn!(position_id = %position.id, error = %e, "entry blocked");
            return self.fail_position(position, &e.to_string());
        }

        self.risk
            .set_leverage_if_needed(client_a, &position.symbol_a)
            .await;
        self.risk
            .set_leverage_if_needed(client_b, &position.symbol_b)
            .await;

        if let Err(e) = self
            .risk
            .check_balance_sufficiency(
                client_a,
                &position.symbol_a,
                position.side_a,
                position.qty_a,
                price_hint_a,
            )
            .await
        {
            warn!(position_id = %position.id, error = %e, "entry blocked");
            return self.fail_position(position, &e.to_string());
        }
        if let Err(e) = self
            .risk
            .check_balance_sufficiency(
                client_b,
                &position.symbol_b,
                position.side_b,
                position.qty_b,
                price_hint_b,
            )
            .await
        {
            warn!(position_id = %position.id, error = %e, "entry blocked");
            return self.fail_position(position, &e.to_string());
        }

        // --- Leg A -------------------------------------------------------
        let order_a = match client_a
            .place_market_order(&position.symbol_a, position.side_a, position.qty_a)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                // Nothing reached a venue; no compensation needed.
                self.history.record_order_failed(
                    position,
                    position.side_a,
                    position.qty_a,
                    &e.to_string(),
                );
                return self.fail_position(position, &format!("leg A placement failed: {e}"));
            }
        };
        position.order_id_a = Some(order_a.order_id.clone());
        self.history.record_order_placed(
            position,
            position.side_a,
            position.qty_a,
            order_a.avg_price,
            order_a.status,
            &order_a.order_id,
        );
        debug!(
            position_id = %position.id,
            order_id = %order_a.order_id,
            status = %order_a.status,
            "leg A placed"
        );

        if let Err(e) = self
            .risk
            .validate_execution(client_a.name(), &order_a, position.qty_a)
        {
            // Leg A may be resting or partially filled: cancel then flatten.
            self.cleanup_order(
                client_a,
                position,
                &position.symbol_a.clone(),
                position.side_a,
                position.qty_a,
                &order_a.order_id,
                "entry leg A unconfirmed",
            )
            .await;
            return self.fail_position(position, &e.to_string());
        }

        // --- Leg B -------------------------------------------------------
        let order_b = match client_b
            .place_market_order(&position.symbol_b, position.side_b, position.qty_b)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                // Leg A is confirmed filled; flatten it before erroring out.
                self.history.record_order_failed(
                    position,
                    position.side_b,
                    position.qty_b,
                    &e.to_string(),
                );
                self.hedge_order(
                    client_a,
                    position,
                    &position.symbol_a.clone(),
                    position.side_a,
                    position.qty_a,
                    &order_a.order_id,
                    "entry leg B placement failed",
                )
                .await;
                return self.fail_position(position, &format!("leg B placement failed: {e}"));
            }
        };
        position.order_id_b = Some(order_b.order_id.clone());
        self.history.record_order_placed(
            position,
            position.side_b,
            position.qty_b,
            order_b.avg_price,
            order_b.status,
            &order_b.order_id,
        );
        debug!(
            position_id = %position.id,
            order_id = %order_b.order_id,
            status = %order_b.status,
            "leg B placed"
        );

        if let Err(e) = self
            .risk
            .validate_execution(client_b.name(), &order_b, position.qty_b)
        {
            self.cleanup_order(
                client_b,
                position,
                &position.symbol_b.clone(),
                position.side_b,
                position.qty_b,
                &order_b.order_id,
                "entry leg B unconfirmed",
            )
            .await;
            self.hedge_order(
                client_a,
                position,
                &position.symbol_a.clone(),
                position.side_a,
                position.qty_a,
                &order_a.order_id,
                "entry leg B unconfirmed",
            )
            .await;
            return self.fail_position(position, &e.to_string());
        }

        // --- Both legs confirmed ------------------------------------------
        position.mark_opened(order_a.avg_price, order_b.avg_price);
        self.active.write().insert(position.id, position.clone());
        self.history.record_position_opened(position);

        info!(
            position_id = %position.id,
            entry_spread_pct = position.entry_spread * 100.0,
            "position opened"
        );
        true
    }

    // -------------------------------------------------------------------------
    // Exit
    // -------------------------------------------------------------------------

    /// Run the exit state machine on an open position. Returns whether the
    /// position closed.
    pub async fn exit_order(
        &self,
        position: &mut Position,
        client_a: &dyn VenueClient,
        client_b: &dyn VenueClient,
    ) -> bool {
        if position.order_id_a.is_none() || position.order_id_b.is_none() {
            error!(position_id = %position.id, "cannot exit: missing order ids");
            return false;
        }
        if !position.is_open() {
            debug!(position_id = %position.id, status = %position.status, "exit skipped");
            return false;
        }

        info!(position_id = %position.id, "closing position");
        position.status = crate::position::PositionStatus::Closing;

        let exit_side_a = position.side_a.opposite();
        let exit_side_b = position.side_b.opposite();

        // --- Exit leg A ---------------------------------------------------
        let exit_a = match client_a
            .place_market_order(&position.symbol_a, exit_side_a, position.qty_a)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                // Nothing placed on exit yet; the original hedge is intact
                // but the position can no longer be managed automatically.
                self.history.record_order_failed(
                    position,
                    exit_side_a,
                    position.qty_a,
                    &e.to_string(),
                );
                return self.fail_position(position, &format!("exit leg A placement failed: {e}"));
            }
        };
        self.history.record_order_placed(
            position,
            exit_side_a,
            position.qty_a,
            exit_a.avg_price,
            exit_a.status,
            &exit_a.order_id,
        );

        if let Err(e) = self
            .risk
            .validate_execution(client_a.name(), &exit_a, position.qty_a)
        {
            // Cancel the stray exit order and restore the leg-A side of the
            // hedge by reversing whatever may have filled.
            self.cleanup_order(
                client_a,
                position,
                &position.symbol_a.clone(),
                exit_side_a,
                position.qty_a,
                &exit_a.order_id,
                "exit leg A unconfirmed",
            )
            .await;
            return self.fail_position(position, &e.to_string());
        }

        // --- Exit leg B ---------------------------------------------------
        let exit_b = match client_b
            .place_market_order(&position.symbol_b, exit_side_b, position.qty_b)
            .await
        {
            Ok(order) => order,
            Err(e) => {
                // Exit-A filled: re-open leg A in its original direction to
                // restore the hedge before erroring out.
                self.history.record_order_failed(
                    position,
                    exit_side_b,
                    position.qty_b,
                    &e.to_string(),
                );
                self.hedge_order(
                    client_a,
                    position,
                    &position.symbol_a.clone(),
                    exit_side_a,
                    position.qty_a,
                    &exit_a.order_id,
                    "exit leg B placement failed",
                )
                .await;
                return self.fail_position(position, &format!("exit leg B placement failed: {e}"));
            }
        };
        self.history.record_order_placed(
            position,
            exit_side_b,
            position.qty_b,
            exit_b.avg_price,
            exit_b.status,
            &exit_b.order_id,
        );

        if let Err(e) = self
            .risk
            .validate_execution(client_b.name(), &exit_b, position.qty_b)
        {
            self.cleanup_order(
                client_b,
                position,
                &position.symbol_b.clone(),
                exit_side_b,
                position.qty_b,
                &exit_b.order_id,
                "exit leg B unconfirmed",
            )
            .await;
            self.hedge_order(
                client_a,
                position,
                &position.symbol_a.clone(),
                exit_side_a,
                position.qty_a,
                &exit_a.order_id,
                "exit leg B unconfirmed",
            )
            .await;
            return self.fail_position(position, &e.to_string());
        }

        // --- Both exits confirmed ----------------------------------------
        position.mark_closed(exit_a.avg_price, exit_b.avg_price);
        self.active.write().remove(&position.id);
        self.history.record_position_closed(position);

        info!(
            position_id = %position.id,
            exit_spread_pct = position.exit_spread.unwrap_or(0.0) * 100.0,
            pnl = position.pnl.unwrap_or(0.0),
            "position closed"
        );
        true
    }

    // -------------------------------------------------------------------------
    // Compensation
    // -------------------------------------------------------------------------

    /// Cancel a just-placed order (best-effort) and flatten any fill.
    async fn cleanup_order(
        &self,
        client: &dyn VenueClient,
        position: &Position,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        order_id: &str,
        reason: &str,
    ) {
        match client.cancel_order(order_id, Some(symbol)).await {
            Ok(_) => {
                self.history.record_order_cancelled(position, side, order_id);
            }
            Err(e) => {
                // The order may already be fully filled; the reverse order
                // below neutralizes it either way.
                debug!(order_id, error = %e, "cancel failed, proceeding to hedge");
            }
        }
        self.hedge_order(client, position, symbol, side, quantity, order_id, reason)
            .await;
    }

    /// Neutralize a possibly-executed order with a reverse-side market
    /// order, recorded as a rollback.
    async fn hedge_order(
        &self,
        client: &dyn VenueClient,
        position: &Position,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        original_order_id: &str,
        reason: &str,
    ) {
        let reverse = side.opposite();
        info!(
            position_id = %position.id,
            venue = client.name(),
            side = %reverse,
            quantity,
            original_order_id,
            "placing compensation order"
        );

        match client.place_market_order(symbol, reverse, quantity).await {
            Ok(order) => {
                self.history.record_order_rollback(
                    position,
                    reverse,
                    quantity,
                    order.avg_price,
                    order.status,
                    reason,
                    original_order_id,
                    &order.order_id,
                );
            }
            Err(e) => {
                self.history.record_order_failed(
                    position,
                    reverse,
                    quantity,
                    &format!("rollback of {original_order_id} failed: {e}"),
                );
                error!(
                    position_id = %position.id,
                    venue = client.name(),
                    original_order_id,
                    error = %e,
                    "compensation order failed. Manual intervention required"
                );
            }
        }
    }

    /// Record the error, flip the position to its terminal state, and drop
    /// it from the active view. Always returns false for caller ergonomics.
    fn fail_position(&self, position: &mut Position, message: &str) -> bool {
        self.history.record_position_error(position, message);
        position.mark_error();
        self.active.write().remove(&position.id);
        false
    }
}

impl std::fmt::Debug for OrderCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderCoordinator")
            .field("risk", &self.risk)
            .field("active_positions", &self.active.read().len())
            .finish()
    }
}
