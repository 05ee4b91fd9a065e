// =============================================================================
// Scenario A — spot vs futures arbitrage
// =============================================================================
//
// Entry: long futures + short spot when the futures premium reaches the
// entry threshold. Exit: close both legs when the spread narrows to the
// exit threshold.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, info};

use crate::exchanges::normalization::check_symbol_mismatch;
use crate::exchanges::VenueClient;
use crate::execution::OrderCoordinator;
use crate::position::Position;
use crate::spread::SpreadEngine;
use crate::types::Scenario;

pub struct ScenarioAStrategy {
    engine: Arc<SpreadEngine>,
    coordinator: Arc<OrderCoordinator>,
    current_position: Option<Position>,
}

impl ScenarioAStrategy {
    pub fn new(engine: Arc<SpreadEngine>, coordinator: Arc<OrderCoordinator>) -> Self {
        Self {
            engine,
            coordinator,
            current_position: None,
        }
    }

    pub fn current_position(&self) -> Option<&Position> {
        self.current_position.as_ref()
    }

    /// Evaluate the entry condition and open a position when it holds.
    /// Returns whether a position was opened on this tick.
    pub async fn check_entry(
        &mut self,
        futures_client: &Arc<dyn VenueClient>,
        spot_client: &Arc<dyn VenueClient>,
        futures_symbol: &str,
        spot_symbol: &str,
        entry_threshold: f64,
        entry_quantity: f64,
    ) -> bool {
        if self.current_position.is_some() {
            debug!("position already open, skipping entry check");
            return false;
        }

        let futures_price = self.engine.get_price(futures_client.name(), futures_symbol);
        let spot_price = self.engine.get_price(spot_client.name(), spot_symbol);
        let (Some(futures_price), Some(spot_price)) = (futures_price, spot_price) else {
            debug!(
                futures = ?futures_price,
                spot = ?spot_price,
                "missing prices, entry check disabled"
            );
            return false;
        };

        let calc = self.engine.scenario_a_spread(futures_price, spot_price);
        debug!(
            spread_pct = calc.spread * 100.0,
            threshold_pct = entry_threshold * 100.0,
            premium = %calc.premium_venue,
            "scenario A spread check"
        );

        if !self.engine.entry_ok(calc.spread, entry_threshold) {
            return false;
        }

        // Mismatched symbols are logged but do not gate the entry.
        check_symbol_mismatch(futures_symbol, spot_symbol);

        info!(
            spread_pct = calc.spread * 100.0,
            "scenario A entry signal: futures premium over spot"
        );

        let mut position = self.coordinator.create_position(
            Scenario::A,
            futures_client.name(),
            futures_symbol,
            entry_quantity,
            spot_client.name(),
            spot_symbol,
            entry_quantity,
        );

        let opened = self
            .coordinator
            .entry_order(
                &mut position,
                &**futures_client,
                &**spot_client,
                Some(futures_price),
                Some(spot_price),
            )
            .await;

        if opened {
            self.current_position = Some(position);
            true
        } else {
            false
        }
    }

    /// Evaluate the exit condition and close the live position when it
    /// holds. Returns whether the position was closed on this tick.
    pub async fn check_exit(
        &mut self,
        futures_client: &Arc<dyn VenueClient>,
        spot_client: &Arc<dyn VenueClient>,
        exit_threshold: f64,
    ) -> bool {
        let Some(position) = self.current_position.as_mut() else {
            return false;
        };
        if !position.is_open() {
            return false;
        }

        let futures_price = self
            .engine
            .get_price(futures_client.name(), &position.symbol_a);
        let spot_price = self.engine.get_price(spot_client.name(), &position.symbol_b);
        let (Some(futures_price), Some(spot_price)) = (futures_price, spot_price) else {
            debug!("missing prices, exit check disabled");
            return false;
        };

        let calc = self.engine.scenario_a_spread(futures_price, spot_price);
        debug!(
            spread_pct = calc.spread.abs() * 100.0,
            threshold_pct = exit_threshold * 100.0,
            "scenario A exit check"
        );

        if !self.engine.exit_ok(calc.spread, exit_threshold) {
            return false;
        }

        info!(
            spread_pct = calc.spread.abs() * 100.0,
            "scenario A exit signal: spread narrowed"
        );

        let closed = self
            .coordinator
            .exit_order(position, &**futures_client, &**spot_client)
            .await;

        if closed {
            self.current_position = None;
            return true;
        }
        // A failed exit that errored the position cannot be retried; leave
        // the strategy flat for the next opportunity.
        if !position.is_open() {
            self.current_position = None;
        }
        false
    }
}
