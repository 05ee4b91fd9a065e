// =============================================================================
// Venue adapters — the narrow contract every exchange integration implements
// =============================================================================
//
// The engine talks to venues exclusively through `Arc<dyn VenueClient>`;
// adapters are replaceable modules and the factory maps names to
// constructors. Price streams are plain `BoxStream`s: adapters with a
// WebSocket push feed override the stream methods, everything else inherits
// the 1-second REST polling default.
// =============================================================================

pub mod binance;
pub mod factory;
pub mod normalization;
pub mod okx;

pub use factory::create_venue_client;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use thiserror::Error;
use tracing::warn;

use crate::spread::PriceKind;
use crate::types::{Balance, Order, OrderSide, PriceUpdate};

/// Interval between REST polls when a venue has no push stream.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Per-request network timeout applied to every REST call.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by venue adapters.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{venue} API error ({status}): {body}")]
    Api {
        venue: String,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Unsupported(String),

    #[error("{0}")]
    InvalidRequest(String),
}

/// Contract for a single trading venue.
///
/// Implementations must be cheap to share (`Arc`) and safe to call from
/// multiple tasks; every method is an await point so the engine can
/// interleave positions and stream consumers.
impl std::fmt::Debug for dyn VenueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueClient").field("name", &self.name()).finish()
    }
}

#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Stable lowercase venue name ("binance", "okx", ...). Used as the
    /// cache key and recorded in history events.
    fn name(&self) -> &str;

    /// All non-zero asset balances on the account.
    async fn get_balances(&self) -> Result<Vec<Balance>, VenueError>;

    /// Balance for a single asset; a zero balance when the asset is absent.
    async fn get_balance(&self, asset: &str) -> Result<Balance, VenueError> {
        let balances = self.get_balances().await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .unwrap_or_else(|| Balance::new(asset.to_uppercase(), 0.0, 0.0)))
    }

    /// Place a market order and return the normalized venue response.
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<Order, VenueError>;

    /// Cancel an active order. Some venues require the symbol.
    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: Option<&str>,
    ) -> Result<Order, VenueError>;

    /// Set leverage for perpetual trading. Venues without the notion return
    /// `VenueError::Unsupported`.
    async fn set_leverage(&self, _leverage: f64, _symbol: Option<&str>) -> Result<(), VenueError> {
        Err(VenueError::Unsupported(format!(
            "{} does not support leverage adjustment",
            self.name()
        )))
    }

    /// Current mark price for `symbol`.
    async fn fetch_mark_price(&self, symbol: &str) -> Result<f64, VenueError>;

    /// Current spot price for `symbol`.
    async fn fetch_spot_price(&self, symbol: &str) -> Result<f64, VenueError>;

    /// Continuous mark price stream. Default: REST polling.
    fn stream_mark_price<'a>(&'a self, symbol: &str) -> BoxStream<'a, PriceUpdate> {
        poll_price_stream(self, symbol.to_string(), PriceKind::Mark)
    }

    /// Continuous spot price stream. Default: REST polling.
    fn stream_spot_price<'a>(&'a self, symbol: &str) -> BoxStream<'a, PriceUpdate> {
        poll_price_stream(self, symbol.to_string(), PriceKind::Spot)
    }

    /// Release any held connections. HTTP sessions close on drop, so the
    /// default is a no-op; adapters with persistent sockets override.
    async fn close(&self) {}
}

/// Infinite polling stream over `fetch_mark_price` / `fetch_spot_price`.
///
/// Errors are logged and retried on the next tick; the stream itself never
/// ends, so cancellation is the consumer's responsibility.
fn poll_price_stream<'a, C>(
    client: &'a C,
    symbol: String,
    kind: PriceKind,
) -> BoxStream<'a, PriceUpdate>
where
    C: VenueClient + ?Sized,
{
    Box::pin(stream::unfold(
        (symbol, true),
        move |(symbol, first)| async move {
            if !first {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            loop {
                let fetched = match kind {
                    PriceKind::Mark => client.fetch_mark_price(&symbol).await,
                    PriceKind::Spot => client.fetch_spot_price(&symbol).await,
                };
                match fetched {
                    Ok(price) => {
                        let update = PriceUpdate {
                            symbol: symbol.clone(),
                            price,
                            timestamp_ms: Some(chrono::Utc::now().timestamp_millis()),
                        };
                        return Some((update, (symbol, false)));
                    }
                    Err(e) => {
                        warn!(
                            venue = client.name(),
                            symbol = %symbol,
                            kind = %kind,
                            error = %e,
                            "price poll failed, retrying"
                        );
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
        },
    ))
}
