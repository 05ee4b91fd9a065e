// =============================================================================
// OKX adapter — base64 HMAC header signing with API passphrase
// =============================================================================

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::{VenueClient, VenueError, REQUEST_TIMEOUT};
use crate::types::{Balance, Order, OrderSide, OrderStatus};

type HmacSha256 = Hmac<Sha256>;

const BASE_URL: &str = "https://www.okx.com";

/// OKX venue client (v5 API).
#[derive(Clone)]
pub struct OkxClient {
    api_key: String,
    secret: String,
    passphrase: String,
    sandbox: bool,
    client: reqwest::Client,
}

impl OkxClient {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        passphrase: impl Into<String>,
        sandbox: bool,
        proxy_url: Option<&str>,
    ) -> Result<Self, VenueError> {
        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if let Some(url) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(url)?);
        }
        let client = builder.build()?;

        debug!(sandbox, "OkxClient initialised");

        Ok(Self {
            api_key: api_key.into(),
            secret: api_secret.into(),
            passphrase: passphrase.into(),
            sandbox,
            client,
        })
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// OKX signature: base64(HMAC-SHA256(timestamp + method + path + body)).
    fn sign_request(&self, method: &str, path: &str, body: &str) -> (String, String) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_secs()
            .to_string();
        let message = format!("{timestamp}{method}{path}{body}");

        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(message.as_bytes());
        let signature = BASE64.encode(mac.finalize().into_bytes());

        (timestamp, signature)
    }

    fn auth_headers(&self, timestamp: &str, signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let entries = [
            ("OK-ACCESS-KEY", self.api_key.as_str()),
            ("OK-ACCESS-SIGN", signature),
            ("OK-ACCESS-TIMESTAMP", timestamp),
            ("OK-ACCESS-PASSPHRASE", self.passphrase.as_str()),
            ("Content-Type", "application/json"),
        ];
        for (name, value) in entries {
            if let Ok(val) = HeaderValue::from_str(value) {
                headers.insert(name, val);
            }
        }
        if self.sandbox {
            headers.insert("x-simulated-trading", HeaderValue::from_static("1"));
        }
        headers
    }

    // -------------------------------------------------------------------------
    // Request plumbing
    // -------------------------------------------------------------------------

    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, VenueError> {
        let body_text = body.map(|b| b.to_string()).unwrap_or_default();
        let (timestamp, signature) = self.sign_request(method.as_str(), path, &body_text);
        let headers = self.auth_headers(&timestamp, &signature);

        let mut request = self
            .client
            .request(method, format!("{BASE_URL}{path}"))
            .headers(headers);
        if !body_text.is_empty() {
            request = request.body(body_text);
        }

        let resp = request.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        let parsed: serde_json::Value =
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        if !status.is_success() {
            return Err(VenueError::Api {
                venue: "okx".to_string(),
                status: status.as_u16(),
                body: parsed.to_string(),
            });
        }
        Ok(parsed)
    }

    async fn public_request(&self, path: &str) -> Result<serde_json::Value, VenueError> {
        let resp = self.client.get(format!("{BASE_URL}{path}")).send().await?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await?;
        if !status.is_success() {
            return Err(VenueError::Api {
                venue: "okx".to_string(),
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        Ok(body)
    }

    fn parse_f64(val: &serde_json::Value) -> Option<f64> {
        if let Some(s) = val.as_str() {
            s.parse().ok()
        } else {
            val.as_f64()
        }
    }

    /// First element of the v5 `data` array.
    fn first_data(body: &serde_json::Value) -> serde_json::Value {
        body["data"]
            .as_array()
            .and_then(|arr| arr.first())
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }
}

#[async_trait]
impl VenueClient for OkxClient {
    fn name(&self) -> &str {
        "okx"
    }

    async fn get_balances(&self) -> Result<Vec<Balance>, VenueError> {
        let body = self
            .signed_request(Method::GET, "/api/v5/account/balance", None)
            .await?;

        let mut balances = Vec::new();
        let account = Self::first_data(&body);
        for detail in account["details"].as_array().into_iter().flatten() {
            let asset = detail["ccy"].as_str().unwrap_or_default();
            let free = Self::parse_f64(&detail["availBal"]).unwrap_or(0.0);
            let frozen = Self::parse_f64(&detail["frozenBal"]).unwrap_or(0.0);
            if free > 0.0 || frozen > 0.0 {
                balances.push(Balance::new(asset, free, frozen));
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
        let body = serde_json::json!({
            "instId": symbol.to_uppercase(),
            "tdMode": "cash",
            "side": side.as_str(),
            "ordType": "market",
            "sz": quantity.to_string(),
        });

        debug!(symbol, side = %side, quantity, "placing market order");
        let resp = self
            .signed_request(Method::POST, "/api/v5/trade/order", Some(body))
            .await?;
        let placed = Self::first_data(&resp);
        let order_id = placed["ordId"].as_str().unwrap_or_default().to_string();
        if order_id.is_empty() {
            return Err(VenueError::Api {
                venue: "okx".to_string(),
                status: 200,
                body: resp.to_string(),
            });
        }

        // The placement response carries no execution detail; fetch the
        // order back to learn its state and fills.
        let detail_path = format!(
            "/api/v5/trade/order?instId={}&ordId={}",
            symbol.to_uppercase(),
            order_id
        );
        let (status, filled, avg_price) =
            match self.signed_request(Method::GET, &detail_path, None).await {
                Ok(detail_body) => {
                    let detail = Self::first_data(&detail_body);
                    (
                        OrderStatus::from_venue(detail["state"].as_str().unwrap_or_default()),
                        Self::parse_f64(&detail["accFillSz"]),
                        Self::parse_f64(&detail["avgPx"]).unwrap_or(0.0),
                    )
                }
                Err(e) => {
                    debug!(order_id = %order_id, error = %e, "order detail lookup failed");
                    (OrderStatus::Unknown, None, 0.0)
                }
            };

        Ok(Order {
            order_id,
            symbol: symbol.to_uppercase(),
            side,
            quantity_requested: quantity,
            quantity_filled: filled,
            avg_price,
            status,
        })
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: Option<&str>,
    ) -> Result<Order, VenueError> {
        let symbol = symbol.ok_or_else(|| {
            VenueError::InvalidRequest("okx requires symbol to cancel an order".to_string())
        })?;

        let body = serde_json::json!({
            "ordId": order_id,
            "instId": symbol.to_uppercase(),
        });

        debug!(symbol, order_id, "cancelling order");
        let resp = self
            .signed_request(Method::POST, "/api/v5/trade/cancel-order", Some(body))
            .await?;
        let cancelled = Self::first_data(&resp);

        Ok(Order {
            order_id: order_id.to_string(),
            symbol: symbol.to_uppercase(),
            side: OrderSide::Buy,
            quantity_requested: 0.0,
            quantity_filled: None,
            avg_price: 0.0,
            status: OrderStatus::from_venue(cancelled["state"].as_str().unwrap_or("cancelled")),
        })
    }

    async fn set_leverage(&self, leverage: f64, symbol: Option<&str>) -> Result<(), VenueError> {
        let symbol = symbol.ok_or_else(|| {
            VenueError::InvalidRequest("okx requires symbol to set leverage".to_string())
        })?;

        let body = serde_json::json!({
            "lever": (leverage as u32).to_string(),
            "mgnMode": "isolated",
            "instId": symbol.to_uppercase(),
        });

        self.signed_request(Method::POST, "/api/v5/account/set-leverage", Some(body))
            .await?;
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    async fn fetch_mark_price(&self, symbol: &str) -> Result<f64, VenueError> {
        let path = format!(
            "/api/v5/public/mark-price?instType=SWAP&instId={}",
            symbol.to_uppercase()
        );
        let body = self.public_request(&path).await?;
        Self::parse_f64(&Self::first_data(&body)["markPx"]).ok_or_else(|| VenueError::Api {
            venue: "okx".to_string(),
            status: 200,
            body: "mark-price response missing markPx".to_string(),
        })
    }

    async fn fetch_spot_price(&self, symbol: &str) -> Result<f64, VenueError> {
        let path = format!("/api/v5/market/ticker?instId={}", symbol.to_uppercase());
        let body = self.public_request(&path).await?;
        Self::parse_f64(&Self::first_data(&body)["last"]).ok_or_else(|| VenueError::Api {
            venue: "okx".to_string(),
            status: 200,
            body: "ticker response missing last price".to_string(),
        })
    }
}

impl std::fmt::Debug for OkxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OkxClient {
        OkxClient::new("key", "secret", "phrase", false, None).unwrap()
    }

    #[test]
    fn signature_covers_timestamp_method_path_body() {
        let c = client();
        let (ts, sig) = c.sign_request("POST", "/api/v5/trade/order", "{}");
        assert!(!ts.is_empty());
        // Base64 of a 32-byte digest is 44 characters.
        assert_eq!(sig.len(), 44);
        assert!(BASE64.decode(&sig).is_ok());
    }

    #[test]
    fn auth_headers_include_passphrase() {
        let c = client();
        let headers = c.auth_headers("1", "sig");
        assert_eq!(headers.get("OK-ACCESS-KEY").unwrap(), "key");
        assert_eq!(headers.get("OK-ACCESS-PASSPHRASE").unwrap(), "phrase");
        assert!(headers.get("x-simulated-trading").is_none());
    }

    #[test]
    fn sandbox_sets_simulated_trading_header() {
        let c = OkxClient::new("key", "secret", "phrase", true, None).unwrap();
        let headers = c.auth_headers("1", "sig");
        assert_eq!(headers.get("x-simulated-trading").unwrap(), "1");
    }

    #[test]
    fn first_data_unwraps_v5_envelope() {
        let body: serde_json::Value =
            serde_json::from_str(r#"{"code":"0","data":[{"ordId":"1"}]}"#).unwrap();
        assert_eq!(OkxClient::first_data(&body)["ordId"], "1");

        let empty: serde_json::Value = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(OkxClient::first_data(&empty).is_null());
    }
}
