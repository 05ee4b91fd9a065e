// =============================================================================
// Venue factory — maps configured venue names to client constructors
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use super::binance::BinanceClient;
use super::okx::OkxClient;
use super::VenueClient;
use crate::config::{ExchangeSettings, ProxySettings};

/// Venue names the factory can construct.
pub const SUPPORTED_VENUES: &[&str] = &["binance", "okx"];

/// Venues whose API requires a passphrase credential.
const REQUIRES_PASSPHRASE: &[&str] = &["okx"];

/// Build a venue client from its configuration block.
///
/// Fails when the venue is unknown, credentials are missing, or a required
/// passphrase is absent; these are configuration errors and fatal at startup.
pub fn create_venue_client(
    name: &str,
    settings: &ExchangeSettings,
    proxy: &ProxySettings,
) -> Result<Arc<dyn VenueClient>> {
    let name_lower = name.to_lowercase();

    if !SUPPORTED_VENUES.contains(&name_lower.as_str()) {
        bail!(
            "unsupported venue: {name}. Supported venues: {}",
            SUPPORTED_VENUES.join(", ")
        );
    }

    let credentials = settings
        .credentials
        .as_ref()
        .with_context(|| format!("venue {name} is missing credentials"))?;

    if REQUIRES_PASSPHRASE.contains(&name_lower.as_str()) && credentials.passphrase.is_none() {
        bail!("venue {name} requires a passphrase credential");
    }

    let proxy_url = proxy.proxy_url();

    let client: Arc<dyn VenueClient> = match name_lower.as_str() {
        "binance" => Arc::new(
            BinanceClient::new(
                credentials.api_key.clone(),
                credentials.api_secret.clone(),
                settings.sandbox,
                proxy_url.as_deref(),
            )
            .with_context(|| format!("failed to build {name} client"))?,
        ),
        "okx" => Arc::new(
            OkxClient::new(
                credentials.api_key.clone(),
                credentials.api_secret.clone(),
                credentials
                    .passphrase
                    .clone()
                    .unwrap_or_default(),
                settings.sandbox,
                proxy_url.as_deref(),
            )
            .with_context(|| format!("failed to build {name} client"))?,
        ),
        _ => unreachable!("checked against SUPPORTED_VENUES above"),
    };

    Ok(client)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeCredentials;

    fn settings_with_credentials(passphrase: Option<&str>) -> ExchangeSettings {
        ExchangeSettings {
            credentials: Some(ExchangeCredentials {
                api_key: "key".to_string(),
                api_secret: "secret".to_string(),
                passphrase: passphrase.map(|p| p.to_string()),
            }),
            ..ExchangeSettings::default()
        }
    }

    #[test]
    fn builds_supported_venues() {
        let proxy = ProxySettings::default();
        let binance =
            create_venue_client("binance", &settings_with_credentials(None), &proxy).unwrap();
        assert_eq!(binance.name(), "binance");

        let okx =
            create_venue_client("OKX", &settings_with_credentials(Some("phrase")), &proxy)
                .unwrap();
        assert_eq!(okx.name(), "okx");
    }

    #[test]
    fn unknown_venue_lists_supported_names() {
        let err = create_venue_client(
            "kraken",
            &settings_with_credentials(None),
            &ProxySettings::default(),
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unsupported venue"));
        assert!(msg.contains("binance"));
    }

    #[test]
    fn missing_credentials_fail() {
        let err = create_venue_client(
            "binance",
            &ExchangeSettings::default(),
            &ProxySettings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn okx_without_passphrase_fails() {
        let err = create_venue_client(
            "okx",
            &settings_with_credentials(None),
            &ProxySettings::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("passphrase"));
    }
}
