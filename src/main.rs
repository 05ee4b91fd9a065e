// =============================================================================
// SpreadHawk — cross-venue arbitrage execution engine, main entry point
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod config;
mod exchanges;
mod execution;
mod history;
mod position;
mod risk;
mod runtime;
mod spread;
mod streams;
mod strategy;
mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::exchanges::VenueClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match std::env::var("SPREADHAWK_LOG_LEVEL") {
            Ok(level) => EnvFilter::new(level),
            Err(_) => EnvFilter::new("info"),
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║            SpreadHawk — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 2. Configuration ─────────────────────────────────────────────────
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let settings = config::load_settings(config_path.as_deref())?;
    info!(settings = ?settings.redacted(), "configuration loaded");

    // ── 3. Venue clients ─────────────────────────────────────────────────
    let mut clients: HashMap<String, Arc<dyn VenueClient>> = HashMap::new();
    for (name, exchange) in &settings.exchanges {
        if !exchange.enabled {
            info!(venue = %name, "venue disabled, skipping");
            continue;
        }
        match exchanges::create_venue_client(name, exchange, &settings.proxy) {
            Ok(client) => {
                info!(venue = %name, "venue client initialised");
                clients.insert(name.clone(), client);
            }
            Err(e) => {
                error!(venue = %name, error = %e, "failed to initialise venue client");
            }
        }
    }

    // ── 4. Runtime ───────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut runtime_handle = tokio::spawn(runtime::run(settings, clients, shutdown_rx));

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::select! {
        result = &mut runtime_handle => {
            result??;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received, stopping gracefully");
            let _ = shutdown_tx.send(true);
            runtime_handle.await??;
        }
    }

    info!("spreadhawk shut down complete");
    Ok(())
}
