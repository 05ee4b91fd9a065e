// =============================================================================
// Scenario B — perp vs perp arbitrage across two venues
// =============================================================================
//
// Entry: long the cheap venue + short the expensive one when the spread
// reaches the entry threshold. Whichever venue quotes lower at entry time
// becomes leg A (buy); the other becomes leg B (sell).
// =============================================================================

use std::sync::Arc;

use tracing::{debug, info};

use crate::exchanges::normalization::check_symbol_mismatch;
use crate::exchanges::VenueClient;
use crate::execution::OrderCoordinator;
use crate::position::Position;
use crate::spread::SpreadEngine;
use crate::types::Scenario;

pub struct ScenarioBStrategy {
    engine: Arc<SpreadEngine>,
    coordinator: Arc<OrderCoordinator>,
    current_position: Option<Position>,
}

impl ScenarioBStrategy {
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
    pub async fn check_entry(
        &mut self,
        client_a: &Arc<dyn VenueClient>,
        client_b: &Arc<dyn VenueClient>,
        symbol_a: &str,
        symbol_b: &str,
        entry_threshold: f64,
        entry_quantity: f64,
    ) -> bool {
        if self.current_position.is_some() {
            debug!("position already open, skipping entry check");
            return false;
        }

        let price_a = self.engine.get_price(client_a.name(), symbol_a);
        let price_b = self.engine.get_price(client_b.name(), symbol_b);
        let (Some(price_a), Some(price_b)) = (price_a, price_b) else {
            debug!(
                venue_a = client_a.name(),
                venue_b = client_b.name(),
                "missing prices, entry check disabled"
            );
            return false;
        };

        let calc =
            self.engine
                .scenario_b_spread(price_a, price_b, client_a.name(), client_b.name());
        debug!(
            spread_pct = calc.spread * 100.0,
            threshold_pct = entry_threshold * 100.0,
            premium = %calc.premium_venue,
            "scenario B spread check"
        );

        if !self.engine.entry_ok(calc.spread, entry_threshold) {
            return false;
        }

        check_symbol_mismatch(symbol_a, symbol_b);

        info!(
            spread_pct = calc.spread * 100.0,
            premium = %calc.premium_venue,
            discount = %calc.discount_venue,
            "scenario B entry signal"
        );

        // The cheap venue takes the buy leg.
        let (long_client, long_symbol, short_client, short_symbol) = if price_a < price_b {
            (client_a, symbol_a, client_b, symbol_b)
        } else {
            (client_b, symbol_b, client_a, symbol_a)
        };

        let mut position = self.coordinator.create_position(
            Scenario::B,
            long_client.name(),
            long_symbol,
            entry_quantity,
            short_client.name(),
            short_symbol,
            entry_quantity,
        );

        let opened = self
            .coordinator
            .entry_order(
                &mut position,
                &**long_client,
                &**short_client,
                Some(calc.price_discount),
                Some(calc.price_premium),
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
    /// holds.
    pub async fn check_exit(
        &mut self,
        client_a: &Arc<dyn VenueClient>,
        client_b: &Arc<dyn VenueClient>,
        symbol_a: &str,
        symbol_b: &str,
        exit_threshold: f64,
    ) -> bool {
        let Some(position) = self.current_position.as_mut() else {
            return false;
        };
        if !position.is_open() {
            return false;
        }

        let price_a = self.engine.get_price(client_a.name(), symbol_a);
        let price_b = self.engine.get_price(client_b.name(), symbol_b);
        let (Some(price_a), Some(price_b)) = (price_a, price_b) else {
            debug!("missing prices, exit check disabled");
            return false;
        };

        let calc =
            self.engine
                .scenario_b_spread(price_a, price_b, client_a.name(), client_b.name());
        debug!(
            spread_pct = calc.spread * 100.0,
            threshold_pct = exit_threshold * 100.0,
            "scenario B exit check"
        );

        if !self.engine.exit_ok(calc.spread, exit_threshold) {
            return false;
        }

        info!(
            spread_pct = calc.spread * 100.0,
            "scenario B exit signal: spread narrowed"
        );

        // Legs may be swapped relative to the configured order; route each
        // exit to the venue that actually holds the leg.
        let (client_for_a, client_for_b) = if client_a.name() == position.venue_a {
            (client_a, client_b)
        } else {
            (client_b, client_a)
        };

        let closed = self
            .coordinator
            .exit_order(position, &**client_for_a, &**client_for_b)
            .await;

        if closed {
            self.current_position = None;
            return true;
        }
        if !position.is_open() {
            self.current_position = None;
        }
        false
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::spread::PriceKind;
    use crate::strategy::scenario_a::tests::{harness, MockVenue};
    use crate::types::OrderSide;

    #[tokio::test]
    async fn cheap_venue_takes_the_buy_leg() {
        let (engine, coordinator, _dir) = harness();
        let mut strategy = ScenarioBStrategy::new(engine.clone(), coordinator);

        let cheap = std::sync::Arc::new(MockVenue::new("bybit", 100.0));
        let expensive = std::sync::Arc::new(MockVenue::new("okx", 107.0));
        let client_a: Arc<dyn VenueClient> = cheap.clone();
        let client_b: Arc<dyn VenueClient> = expensive.clone();

        engine.update_price("bybit", "BTCUSDT", 100.0, PriceKind::Mark, None);
        engine.update_price("okx", "BTCUSDT", 107.0, PriceKind::Mark, None);

        let entered = strategy
            .check_entry(&client_a, &client_b, "BTCUSDT", "BTCUSDT", 0.05, 1.0)
            .await;
        assert!(entered);

        let position = strategy.current_position().unwrap();
        assert_eq!(position.venue_a, "bybit");
        assert_eq!(position.venue_b, "okx");
        assert_eq!(cheap.placed.lock()[0].1, OrderSide::Buy);
        assert_eq!(expensive.placed.lock()[0].1, OrderSide::Sell);
    }

    #[tokio::test]
    async fn leg_assignment_flips_when_the_other_venue_is_cheap() {
        let (engine, coordinator, _dir) = harness();
        let mut strategy = ScenarioBStrategy::new(engine.clone(), coordinator);

        let expensive = std::sync::Arc::new(MockVenue::new("bybit", 107.0));
        let cheap = std::sync::Arc::new(MockVenue::new("okx", 100.0));
        let client_a: Arc<dyn VenueClient> = expensive.clone();
        let client_b: Arc<dyn VenueClient> = cheap.clone();

        engine.update_price("bybit", "BTCUSDT", 107.0, PriceKind::Mark, None);
        engine.update_price("okx", "BTCUSDT", 100.0, PriceKind::Mark, None);

        let entered = strategy
            .check_entry(&client_a, &client_b, "BTCUSDT", "BTCUSDT", 0.05, 1.0)
            .await;
        assert!(entered);

        let position = strategy.current_position().unwrap();
        assert_eq!(position.venue_a, "okx");
        assert_eq!(position.venue_b, "bybit");
        assert_eq!(cheap.placed.lock()[0].1, OrderSide::Buy);
        assert_eq!(expensive.placed.lock()[0].1, OrderSide::Sell);
    }

    #[tokio::test]
    async fn entry_requires_threshold_spread() {
        let (engine, coordinator, _dir) = harness();
        let mut strategy = ScenarioBStrategy::new(engine.clone(), coordinator);

        let client_a: Arc<dyn VenueClient> = std::sync::Arc::new(MockVenue::new("bybit", 100.0));
        let client_b: Arc<dyn VenueClient> = std::sync::Arc::new(MockVenue::new("okx", 102.0));

        engine.update_price("bybit", "BTCUSDT", 100.0, PriceKind::Mark, None);
        engine.update_price("okx", "BTCUSDT", 102.0, PriceKind::Mark, None);

        // 2% spread against a 7% threshold.
        let entered = strategy
            .check_entry(&client_a, &client_b, "BTCUSDT", "BTCUSDT", 0.07, 1.0)
            .await;
        assert!(!entered);
    }

    #[tokio::test]
    async fn exit_routes_legs_to_the_venues_that_hold_them() {
        let (engine, coordinator, _dir) = harness();
        let mut strategy = ScenarioBStrategy::new(engine.clone(), coordinator);

        // Client B is the cheap venue, so the legs swap at creation.
        let expensive = std::sync::Arc::new(MockVenue::new("bybit", 107.0));
        let cheap = std::sync::Arc::new(MockVenue::new("okx", 100.0));
        let client_a: Arc<dyn VenueClient> = expensive.clone();
        let client_b: Arc<dyn VenueClient> = cheap.clone();

        engine.update_price("bybit", "BTCUSDT", 107.0, PriceKind::Mark, None);
        engine.update_price("okx", "BTCUSDT", 100.0, PriceKind::Mark, None);
        assert!(
            strategy
                .check_entry(&client_a, &client_b, "BTCUSDT", "BTCUSDT", 0.05, 1.0)
                .await
        );

        // Spread collapses; both venues converge at 103.
        engine.update_price("bybit", "BTCUSDT", 103.0, PriceKind::Mark, None);
        engine.update_price("okx", "BTCUSDT", 103.0, PriceKind::Mark, None);
        *expensive.fill_price.lock() = 103.0;
        *cheap.fill_price.lock() = 103.0;

        let closed = strategy
            .check_exit(&client_a, &client_b, "BTCUSDT", "BTCUSDT", 0.01)
            .await;
        assert!(closed);
        assert!(strategy.current_position().is_none());

        // The cheap venue held the buy leg, so its exit is a sell, and the
        // expensive venue's exit is a buy.
        let cheap_orders = cheap.placed.lock().clone();
        assert_eq!(cheap_orders.len(), 2);
        assert_eq!(cheap_orders[1].1, OrderSide::Sell);
        let expensive_orders = expensive.placed.lock().clone();
        assert_eq!(expensive_orders[1].1, OrderSide::Buy);
    }
}
