// =============================================================================
// Price Stream Supervisor — one task per (venue, symbol, kind) subscription
// =============================================================================
//
// Each subscription runs a long-lived task consuming the venue's price
// stream (push where the adapter supports it, 1-second REST polling
// otherwise) and writing every update into the spread engine's cache.
// A shared watch channel carries the shutdown signal: every task polls it
// at each loop turn and returns promptly when it flips.
//
// Ordering: none across subscriptions; within one subscription updates are
// delivered in observed order.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::exchanges::VenueClient;
use crate::spread::{PriceKind, SpreadEngine};

/// Backoff between reconnect attempts when a stream ends or errors.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Window allowed for children to drain after the shutdown signal flips.
const DRAIN_WINDOW: Duration = Duration::from_secs(5);

/// Owns the price subscription tasks and fans cancellation out to them.
pub struct PriceStreamSupervisor {
    engine: Arc<SpreadEngine>,
    shutdown: watch::Receiver<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl PriceStreamSupervisor {
    pub fn new(engine: Arc<SpreadEngine>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            engine,
            shutdown,
            handles: Vec::new(),
        }
    }

    /// Spawn the consumer task for one (venue, symbol, kind) subscription.
    pub fn subscribe(&mut self, client: Arc<dyn VenueClient>, symbol: &str, kind: PriceKind) {
        let engine = self.engine.clone();
        let mut shutdown = self.shutdown.clone();
        let symbol = symbol.to_string();

        let handle = tokio::spawn(async move {
            let venue = client.name().to_string();
            info!(venue = %venue, symbol = %symbol, kind = %kind, "price subscription started");

            loop {
                if *shutdown.borrow() {
                    break;
                }

                let mut stream = match kind {
                    PriceKind::Mark => client.stream_mark_price(&symbol),
                    PriceKind::Spot => client.stream_spot_price(&symbol),
                };

                loop {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            // A closed channel means the sender is gone; treat
                            // it as shutdown too.
                            if changed.is_err() || *shutdown.borrow() {
                                info!(venue = %venue, symbol = %symbol, "price subscription stopping");
                                return;
                            }
                        }
                        update = stream.next() => match update {
                            Some(update) => {
                                engine.update_price(
                                    &venue,
                                    &update.symbol,
                                    update.price,
                                    kind,
                                    update.timestamp_ms,
                                );
                            }
                            None => break,
                        }
                    }
                }

                warn!(venue = %venue, symbol = %symbol, "price stream ended, reconnecting");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        });

        self.handles.push(handle);
    }

    /// Await all children after the shutdown signal has been flipped,
    /// aborting any that outlive the drain window.
    pub async fn drain(self) {
        for mut handle in self.handles {
            if tokio::time::timeout(DRAIN_WINDOW, &mut handle).await.is_err() {
                debug!("subscription task exceeded drain window, aborting");
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for PriceStreamSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceStreamSupervisor")
            .field("subscriptions", &self.handles.len())
            .finish()
    }
}
