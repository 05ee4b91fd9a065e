// =============================================================================
// Binance adapter — HMAC-SHA256 signed REST plus mark-price WebSocket
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift against Binance servers.
// =============================================================================

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{VenueClient, VenueError, POLL_INTERVAL, REQUEST_TIMEOUT};
use crate::types::{Balance, Order, OrderSide, OrderStatus, PriceUpdate};

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Binance venue client. Spot endpoints serve balances, orders and spot
/// prices; the USD-M futures API serves leverage and mark prices.
#[derive(Clone)]
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    fapi_url: String,
    ws_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        sandbox: bool,
        proxy_url: Option<&str>,
    ) -> Result<Self, VenueError> {
        let api_key = api_key.into();
        let secret = api_secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(REQUEST_TIMEOUT);
        if let Some(url) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        let client = builder.build()?;

        let (base_url, fapi_url, ws_url) = if sandbox {
            (
                "https://testnet.binance.vision",
                "https://testnet.binancefuture.com",
                "wss://stream.binancefuture.com",
            )
        } else {
            (
                "https://api.binance.com",
                "https://fapi.binance.com",
                "wss://fstream.binance.com",
            )
        };

        debug!(sandbox, "BinanceClient initialised");

        Ok(Self {
            api_key,
            secret,
            base_url: base_url.to_string(),
            fapi_url: fapi_url.to_string(),
            ws_url: ws_url.to_string(),
            client,
        })
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature of `query`.
    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Full query string for a signed request (timestamp, recvWindow,
    /// signature appended).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    async fn request_json(
        &self,
        method: Method,
        url: String,
    ) -> Result<serde_json::Value, VenueError> {
        let resp = self.client.request(method, &url).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        let body: serde_json::Value =
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        if !status.is_success() {
            return Err(VenueError::Api {
                venue: "binance".to_string(),
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        Ok(body)
    }

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_f64(val: &serde_json::Value) -> Option<f64> {
        if let Some(s) = val.as_str() {
            s.parse().ok()
        } else {
            val.as_f64()
        }
    }

    fn order_from_response(body: &serde_json::Value, requested_qty: f64) -> Order {
        let executed = Self::parse_f64(&body["executedQty"]);
        let cum_quote = Self::parse_f64(&body["cummulativeQuoteQty"]);
        let avg_price = match (executed, cum_quote) {
            (Some(qty), Some(quote)) if qty > 0.0 => quote / qty,
            _ => 0.0,
        };
        let side = match body["side"].as_str().unwrap_or_default() {
            "SELL" => OrderSide::Sell,
            _ => OrderSide::Buy,
        };

        Order {
            order_id: body["orderId"]
                .as_u64()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            symbol: body["symbol"].as_str().unwrap_or_default().to_string(),
            side,
            quantity_requested: requested_qty,
            quantity_filled: executed,
            avg_price,
            status: OrderStatus::from_venue(body["status"].as_str().unwrap_or_default()),
        }
    }
}

#[async_trait]
impl VenueClient for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, VenueError> {
        let qs = self.signed_query("");
        let url = format!("{}/api/v3/account?{}", self.base_url, qs);
        let body = self.request_json(Method::GET, url).await?;

        let mut balances = Vec::new();
        for entry in body["balances"].as_array().into_iter().flatten() {
            let asset = entry["asset"].as_str().unwrap_or_default();
            let free = Self::parse_f64(&entry["free"]).unwrap_or(0.0);
            let locked = Self::parse_f64(&entry["locked"]).unwrap_or(0.0);
            if free > 0.0 || locked > 0.0 {
                balances.push(Balance::new(asset, free, locked));
            }
        }
        debug!(count = balances.len(), "balances retrieved");
        Ok(balances)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<Order, VenueError> {
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={quantity}",
            symbol.to_uppercase(),
            side.as_str().to_uppercase(),
        );
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        debug!(symbol, side = %side, quantity, "placing market order");
        let body = self.request_json(Method::POST, url).await?;

        let order = Self::order_from_response(&body, quantity);
        debug!(order_id = %order.order_id, status = %order.status, "order placed");
        Ok(order)
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: Option<&str>,
    ) -> Result<Order, VenueError> {
        let symbol = symbol.ok_or_else(|| {
            VenueError::InvalidRequest("binance requires symbol to cancel an order".to_string())
        })?;

        let params = format!("symbol={}&orderId={order_id}", symbol.to_uppercase());
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        debug!(symbol, order_id, "cancelling order");
        let body = self.request_json(Method::DELETE, url).await?;
        Ok(Self::order_from_response(&body, 0.0))
    }

    async fn set_leverage(&self, leverage: f64, symbol: Option<&str>) -> Result<(), VenueError> {
        let symbol = symbol.ok_or_else(|| {
            VenueError::InvalidRequest("binance requires symbol to set leverage".to_string())
        })?;

        let params = format!(
            "symbol={}&leverage={}",
            symbol.to_uppercase(),
            leverage as u32
        );
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/leverage?{}", self.fapi_url, qs);

        self.request_json(Method::POST, url).await?;
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    async fn fetch_mark_price(&self, symbol: &str) -> Result<f64, VenueError> {
        let url = format!(
            "{}/fapi/v1/premiumIndex?symbol={}",
            self.fapi_url,
            symbol.to_uppercase()
        );
        let body = self.request_json(Method::GET, url).await?;
        Self::parse_f64(&body["markPrice"]).ok_or_else(|| VenueError::Api {
            venue: "binance".to_string(),
            status: 200,
            body: "premiumIndex response missing markPrice".to_string(),
        })
    }

    async fn fetch_spot_price(&self, symbol: &str) -> Result<f64, VenueError> {
        let url = format!(
            "{}/api/v3/ticker/price?symbol={}",
            self.base_url,
            symbol.to_uppercase()
        );
        let body = self.request_json(Method::GET, url).await?;
        Self::parse_f64(&body["price"]).ok_or_else(|| VenueError::Api {
            venue: "binance".to_string(),
            status: 200,
            body: "ticker response missing price".to_string(),
        })
    }

    /// Mark prices via the futures WebSocket push stream; reconnects with a
    /// fixed backoff when the socket drops.
    fn stream_mark_price<'a>(&'a self, symbol: &str) -> BoxStream<'a, PriceUpdate> {
        type Socket = tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >;
        struct State {
            url: String,
            symbol: String,
            socket: Option<Socket>,
        }

        let state = State {
            url: format!("{}/ws/{}@markPrice@1s", self.ws_url, symbol.to_lowercase()),
            symbol: symbol.to_string(),
            socket: None,
        };

        Box::pin(stream::unfold(state, |mut st| async move {
            loop {
                if st.socket.is_none() {
                    match connect_async(&st.url).await {
                        Ok((socket, _response)) => {
                            info!(symbol = %st.symbol, "mark price socket connected");
                            st.socket = Some(socket);
                        }
                        Err(e) => {
                            warn!(symbol = %st.symbol, error = %e, "mark price socket connect failed");
                            tokio::time::sleep(POLL_INTERVAL).await;
                            continue;
                        }
                    }
                }

                let Some(socket) = st.socket.as_mut() else {
                    continue;
                };
                match socket.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(update) = parse_mark_price_event(&st.symbol, &text) {
                            return Some((update, st));
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(symbol = %st.symbol, error = %e, "mark price socket read error");
                        st.socket = None;
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                    None => {
                        warn!(symbol = %st.symbol, "mark price socket ended");
                        st.socket = None;
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
        }))
    }
}

/// Parse a markPriceUpdate event.
///
/// Expected shape:
/// ```json
/// { "e": "markPriceUpdate", "E": 1700000000000, "s": "BTCUSDT", "p": "37000.00" }
/// ```
fn parse_mark_price_event(symbol: &str, text: &str) -> Option<PriceUpdate> {
    let root: serde_json::Value = serde_json::from_str(text).ok()?;
    let price: f64 = root["p"].as_str()?.parse().ok()?;
    Some(PriceUpdate {
        symbol: symbol.to_string(),
        price,
        timestamp_ms: root["E"].as_i64(),
    })
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> BinanceClient {
        BinanceClient::new("key", "secret", false, None).unwrap()
    }

    #[test]
    fn signed_query_appends_signature() {
        let qs = client().signed_query("symbol=BTCUSDT");
        assert!(qs.starts_with("symbol=BTCUSDT&timestamp="));
        assert!(qs.contains("&recvWindow=5000"));
        assert!(qs.contains("&signature="));
    }

    #[test]
    fn signature_is_deterministic_hex() {
        let c = client();
        let sig = c.sign("symbol=BTCUSDT&timestamp=1");
        assert_eq!(sig, c.sign("symbol=BTCUSDT&timestamp=1"));
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn order_response_maps_fill_and_status() {
        let body: serde_json::Value = serde_json::from_str(
            r#"{
                "orderId": 42,
                "symbol": "BTCUSDT",
                "side": "SELL",
                "status": "FILLED",
                "executedQty": "0.10000000",
                "cummulativeQuoteQty": "5000.00000000"
            }"#,
        )
        .unwrap();

        let order = BinanceClient::order_from_response(&body, 0.1);
        assert_eq!(order.order_id, "42");
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.quantity_filled, Some(0.1));
        assert!((order.avg_price - 50000.0).abs() < 1e-9);
    }

    #[test]
    fn order_response_without_fills_has_zero_avg_price() {
        let body: serde_json::Value = serde_json::from_str(
            r#"{ "orderId": 7, "symbol": "BTCUSDT", "side": "BUY", "status": "NEW",
                 "executedQty": "0", "cummulativeQuoteQty": "0" }"#,
        )
        .unwrap();

        let order = BinanceClient::order_from_response(&body, 0.1);
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.avg_price, 0.0);
    }

    #[test]
    fn mark_price_event_parses_price_and_timestamp() {
        let update = parse_mark_price_event(
            "BTCUSDT",
            r#"{"e":"markPriceUpdate","E":1700000000000,"s":"BTCUSDT","p":"48123.45"}"#,
        )
        .unwrap();
        assert_eq!(update.price, 48123.45);
        assert_eq!(update.timestamp_ms, Some(1700000000000));

        assert!(parse_mark_price_event("BTCUSDT", "not json").is_none());
        assert!(parse_mark_price_event("BTCUSDT", r#"{"e":"other"}"#).is_none());
    }
}
