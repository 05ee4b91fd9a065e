// =============================================================================
// Runtime — wires streams, strategies and the coordinator together
// =============================================================================
//
// Task layout while running:
//   - one price-subscription task per (venue, symbol, kind), owned by the
//     supervisor
//   - this function's own strategy loop, ticking every 500 ms
//
// All tasks poll the shared shutdown signal and return promptly when it
// flips; the supervisor then drains its children within a bounded window
// and every venue client is closed.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Settings;
use crate::exchanges::VenueClient;
use crate::execution::OrderCoordinator;
use crate::history::HistoryStore;
use crate::position::PositionStatus;
use crate::risk::RiskGate;
use crate::spread::{PriceKind, SpreadEngine};
use crate::strategy::{ScenarioAStrategy, ScenarioBStrategy};
use crate::streams::PriceStreamSupervisor;
use crate::types::Scenario;

/// Strategy evaluation cadence.
const TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Quantity used when no price is available to size an order. Entries are
/// skipped without prices anyway, so this only seeds the first ticks.
const FALLBACK_QUANTITY: f64 = 0.001;

/// Run the arbitrage engine until the shutdown signal flips.
pub async fn run(
    settings: Settings,
    clients: HashMap<String, Arc<dyn VenueClient>>,
    shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!("runtime starting");

    let arb = settings.arbitrage.clone();
    if !arb.enabled {
        info!("arbitrage disabled, runtime stopped");
        return Ok(());
    }
    if arb.exchange_a.is_empty() || arb.exchange_b.is_empty() || arb.symbol.is_empty() {
        bail!("arbitrage is enabled but missing exchange_a/exchange_b/symbol configuration");
    }

    let client_a = clients
        .get(&arb.exchange_a)
        .with_context(|| format!("exchange client not initialized: {}", arb.exchange_a))?
        .clone();
    let client_b = clients
        .get(&arb.exchange_b)
        .with_context(|| format!("exchange client not initialized: {}", arb.exchange_b))?
        .clone();

    // --- Durable state -----------------------------------------------------
    let history = Arc::new(HistoryStore::new(Path::new("data"))?);

    // Positions survive restarts through the event log; anything still open
    // counts against the position limit and needs manual attention.
    let recovered = history.list_positions(Some(PositionStatus::Opened))?;
    if !recovered.is_empty() {
        for position in &recovered {
            warn!(
                position_id = %position.id,
                venue_a = %position.venue_a,
                venue_b = %position.venue_b,
                "recovered open position from history"
            );
        }
    }

    let engine = Arc::new(SpreadEngine::new());
    let risk = RiskGate::new(&settings.trading, history.clone());
    let coordinator = Arc::new(OrderCoordinator::new(risk, history.clone()));

    // --- Price subscriptions ------------------------------------------------
    let mut supervisor = PriceStreamSupervisor::new(engine.clone(), shutdown.clone());
    match arb.scenario {
        Scenario::A => {
            supervisor.subscribe(client_a.clone(), &arb.symbol, PriceKind::Mark);
            supervisor.subscribe(client_b.clone(), &arb.symbol, PriceKind::Spot);
        }
        Scenario::B => {
            supervisor.subscribe(client_a.clone(), &arb.symbol, PriceKind::Mark);
            supervisor.subscribe(client_b.clone(), &arb.symbol, PriceKind::Mark);
        }
    }
    info!(scenario = %arb.scenario, symbol = %arb.symbol, "price subscriptions launched");

    // --- Strategy loop ------------------------------------------------------
    let mut strategy_a = ScenarioAStrategy::new(engine.clone(), coordinator.clone());
    let mut strategy_b = ScenarioBStrategy::new(engine.clone(), coordinator.clone());

    let mut shutdown_rx = shutdown.clone();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => match arb.scenario {
                Scenario::A => {
                    let futures_price = engine.get_price(client_a.name(), &arb.symbol);
                    let spot_price = engine.get_price(client_b.name(), &arb.symbol);
                    let quantity = match spot_price.or(futures_price) {
                        Some(price) => coordinator.risk().order_quantity(Some(price)),
                        None => FALLBACK_QUANTITY,
                    };

                    if strategy_a.current_position().is_none() {
                        strategy_a
                            .check_entry(
                                &client_a,
                                &client_b,
                                &arb.symbol,
                                &arb.symbol,
                                arb.entry_threshold,
                                quantity,
                            )
                            .await;
                    } else {
                        strategy_a
                            .check_exit(&client_a, &client_b, arb.exit_threshold)
                            .await;
                    }
                }
                Scenario::B => {
                    let price_a = engine.get_price(client_a.name(), &arb.symbol);
                    let price_b = engine.get_price(client_b.name(), &arb.symbol);
                    let cheapest = match (price_a, price_b) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                    let quantity = match cheapest {
                        Some(price) => coordinator.risk().order_quantity(Some(price)),
                        None => FALLBACK_QUANTITY,
                    };

                    if strategy_b.current_position().is_none() {
                        strategy_b
                            .check_entry(
                                &client_a,
                                &client_b,
                                &arb.symbol,
                                &arb.symbol,
                                arb.entry_threshold,
                                quantity,
                            )
                            .await;
                    } else {
                        strategy_b
                            .check_exit(
                                &client_a,
                                &client_b,
                                &arb.symbol,
                                &arb.symbol,
                                arb.exit_threshold,
                            )
                            .await;
                    }
                }
            }
        }
    }

    // --- Teardown -----------------------------------------------------------
    info!("draining price subscriptions");
    supervisor.drain().await;
    for client in clients.values() {
        client.close().await;
    }

    info!("runtime stopped");
    Ok(())
}
