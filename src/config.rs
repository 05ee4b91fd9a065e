// =============================================================================
// Settings — YAML configuration with environment-variable overrides
// =============================================================================
//
// The configuration tree is loaded from a YAML file (default `config.yml`,
// overridable via SPREADHAWK_CONFIG). A missing file is treated as an empty
// mapping so the engine can boot entirely from environment overrides.
//
// Any environment variable prefixed with `SPREADHAWK_` encodes a path into
// the tree: double underscores separate path segments, and the value is
// parsed as a YAML scalar (bool / number / string). Example:
//
//   SPREADHAWK_TRADING__LEVERAGE=3       -> trading.leverage = 3
//   SPREADHAWK_ARBITRAGE__ENABLED=true   -> arbitrage.enabled = true
//
// SPREADHAWK_CONFIG and SPREADHAWK_LOG_LEVEL are reserved and never treated
// as overrides.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::info;

use crate::types::Scenario;

/// Environment variable prefix recognized for overrides.
pub const ENV_PREFIX: &str = "SPREADHAWK_";

/// Prefixed variable names that are reserved for process control.
const RESERVED_ENV_KEYS: &[&str] = &["CONFIG", "LOG_LEVEL"];

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_env() -> String {
    "dev".to_string()
}

fn default_leverage() -> f64 {
    1.0
}

fn default_max_positions() -> u32 {
    1
}

fn default_fixed_order_size() -> f64 {
    10.0
}

fn default_scenario() -> Scenario {
    Scenario::A
}

fn default_entry_threshold() -> f64 {
    0.05
}

fn default_exit_threshold() -> f64 {
    0.01
}

// =============================================================================
// Settings tree
// =============================================================================

/// Outbound HTTP proxy configuration, applied to every venue client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxySettings {
    /// Full proxy URL with credentials embedded, or `None` when disabled.
    pub fn proxy_url(&self) -> Option<String> {
        if !self.enabled {
            return None;
        }
        let url = self.url.as_deref()?;
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => {
                let (scheme, rest) = url.split_once("://").unwrap_or(("http", url));
                Some(format!("{scheme}://{user}:{pass}@{rest}"))
            }
            _ => Some(url.to_string()),
        }
    }
}

/// Sizing and exposure limits shared by both strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradingSettings {
    /// Leverage multiplier applied on perpetual venues. Must be > 0.
    #[serde(default = "default_leverage")]
    pub leverage: f64,

    /// Maximum number of simultaneously open positions.
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,

    /// Per-leg order size in quote currency. Quantity = size / price.
    #[serde(default = "default_fixed_order_size")]
    pub fixed_order_size: f64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            leverage: default_leverage(),
            max_positions: default_max_positions(),
            fixed_order_size: default_fixed_order_size(),
        }
    }
}

/// API credentials for one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeCredentials {
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub passphrase: Option<String>,
}

/// Per-venue configuration block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub credentials: Option<ExchangeCredentials>,
    /// Venue-specific options passed through to the adapter.
    #[serde(default)]
    pub options: HashMap<String, Value>,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sandbox: false,
            credentials: None,
            options: HashMap::new(),
        }
    }
}

/// The arbitrage strategy wiring: which venues, which symbol, which spread
/// thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArbitrageSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scenario")]
    pub scenario: Scenario,
    #[serde(default)]
    pub exchange_a: String,
    #[serde(default)]
    pub exchange_b: String,
    #[serde(default)]
    pub symbol: String,
    /// Spread magnitude required to open a position (fraction, 0.05 = 5%).
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,
    /// Spread magnitude at which an open position is closed.
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f64,
}

impl Default for ArbitrageSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            scenario: default_scenario(),
            exchange_a: String::new(),
            exchange_b: String::new(),
            symbol: String::new(),
            entry_threshold: default_entry_threshold(),
            exit_threshold: default_exit_threshold(),
        }
    }
}

/// Top-level settings tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub trading: TradingSettings,
    #[serde(default)]
    pub exchanges: HashMap<String, ExchangeSettings>,
    #[serde(default)]
    pub arbitrage: ArbitrageSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: default_env(),
            proxy: ProxySettings::default(),
            trading: TradingSettings::default(),
            exchanges: HashMap::new(),
            arbitrage: ArbitrageSettings::default(),
        }
    }
}

impl Settings {
    /// Reject configurations that would be unsafe to trade with.
    pub fn validate(&self) -> Result<()> {
        if self.trading.leverage <= 0.0 {
            bail!("trading.leverage must be > 0, got {}", self.trading.leverage);
        }
        if self.trading.fixed_order_size <= 0.0 {
            bail!(
                "trading.fixed_order_size must be > 0, got {}",
                self.trading.fixed_order_size
            );
        }
        if self.arbitrage.entry_threshold < 0.0 || self.arbitrage.exit_threshold < 0.0 {
            bail!("arbitrage thresholds must be non-negative");
        }
        Ok(())
    }

    /// A copy safe to log: credentials and proxy password are masked.
    pub fn redacted(&self) -> Settings {
        let mut copy = self.clone();
        for exchange in copy.exchanges.values_mut() {
            if let Some(creds) = exchange.credentials.as_mut() {
                creds.api_key = "***".to_string();
                creds.api_secret = "***".to_string();
                if creds.passphrase.is_some() {
                    creds.passphrase = Some("***".to_string());
                }
            }
        }
        if copy.proxy.password.is_some() {
            copy.proxy.password = Some("***".to_string());
        }
        copy
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Load settings from `config_path`, falling back to SPREADHAWK_CONFIG and
/// then `./config.yml`, and apply environment overrides on top.
pub fn load_settings(config_path: Option<&Path>) -> Result<Settings> {
    let path: PathBuf = match config_path {
        Some(p) => p.to_path_buf(),
        None => std::env::var(format!("{ENV_PREFIX}CONFIG"))
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.yml")),
    };

    let mut data = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let loaded: Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse YAML from {}", path.display()))?;
        match loaded {
            Value::Null => Value::Mapping(serde_yaml::Mapping::new()),
            Value::Mapping(_) => loaded,
            other => bail!("config root must be a mapping, got: {other:?}"),
        }
    } else {
        Value::Mapping(serde_yaml::Mapping::new())
    };

    apply_env_overrides(&mut data, std::env::vars());

    let settings: Settings =
        serde_yaml::from_value(data).context("invalid configuration")?;
    settings.validate()?;

    info!(path = %path.display(), env = %settings.env, "settings loaded");
    Ok(settings)
}

/// Merge `SPREADHAWK_*` variables into `data`.
///
/// Takes the variables as an iterator so tests can feed synthetic
/// environments without mutating the process.
pub fn apply_env_overrides(
    data: &mut Value,
    vars: impl IntoIterator<Item = (String, String)>,
) {
    for (key, raw_value) in vars {
        let Some(remainder) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        if RESERVED_ENV_KEYS.contains(&remainder) {
            continue;
        }

        let path: Vec<String> = remainder
            .split("__")
            .filter(|p| !p.is_empty())
            .map(|p| p.to_lowercase())
            .collect();
        if path.is_empty() {
            continue;
        }

        let value: Value =
            serde_yaml::from_str(&raw_value).unwrap_or(Value::String(raw_value));
        deep_set(data, &path, value);
    }
}

/// Set `value` at the nested `path`, creating intermediate mappings as
/// needed. Non-mapping intermediates are replaced.
fn deep_set(data: &mut Value, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut cursor = data;
    for key in parents {
        if !cursor.is_mapping() {
            *cursor = Value::Mapping(serde_yaml::Mapping::new());
        }
        let map = cursor.as_mapping_mut().expect("coerced to mapping above");
        let next = map
            .entry(Value::String(key.clone()))
            .or_insert_with(|| Value::Mapping(serde_yaml::Mapping::new()));
        if !next.is_mapping() {
            *next = Value::Mapping(serde_yaml::Mapping::new());
        }
        cursor = next;
    }

    if !cursor.is_mapping() {
        *cursor = Value::Mapping(serde_yaml::Mapping::new());
    }
    if let Some(map) = cursor.as_mapping_mut() {
        map.insert(Value::String(last.clone()), value);
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Settings {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn empty_mapping_yields_defaults() {
        let cfg = parse("{}");
        assert_eq!(cfg.env, "dev");
        assert!((cfg.trading.leverage - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.trading.max_positions, 1);
        assert!(!cfg.arbitrage.enabled);
        assert_eq!(cfg.arbitrage.scenario, Scenario::A);
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let result: std::result::Result<Settings, _> =
            serde_yaml::from_str("bogus: true");
        assert!(result.is_err());
    }

    #[test]
    fn env_override_sets_nested_scalar() {
        let mut data: Value = serde_yaml::from_str("trading:\n  leverage: 1").unwrap();
        apply_env_overrides(
            &mut data,
            vec![
                ("SPREADHAWK_TRADING__LEVERAGE".to_string(), "3".to_string()),
                ("SPREADHAWK_ARBITRAGE__ENABLED".to_string(), "true".to_string()),
                ("SPREADHAWK_ARBITRAGE__SYMBOL".to_string(), "BTCUSDT".to_string()),
            ],
        );
        let cfg: Settings = serde_yaml::from_value(data).unwrap();
        assert!((cfg.trading.leverage - 3.0).abs() < f64::EPSILON);
        assert!(cfg.arbitrage.enabled);
        assert_eq!(cfg.arbitrage.symbol, "BTCUSDT");
    }

    #[test]
    fn reserved_keys_are_not_overrides() {
        let mut data = Value::Mapping(serde_yaml::Mapping::new());
        apply_env_overrides(
            &mut data,
            vec![
                ("SPREADHAWK_CONFIG".to_string(), "elsewhere.yml".to_string()),
                ("SPREADHAWK_LOG_LEVEL".to_string(), "debug".to_string()),
                ("UNRELATED_VAR".to_string(), "1".to_string()),
            ],
        );
        let cfg: Settings = serde_yaml::from_value(data).unwrap();
        // Nothing should have been merged in.
        assert_eq!(cfg.env, "dev");
        assert!(cfg.exchanges.is_empty());
    }

    #[test]
    fn validate_rejects_non_positive_leverage() {
        let mut cfg = Settings::default();
        cfg.trading.leverage = 0.0;
        assert!(cfg.validate().is_err());
        cfg.trading.leverage = 2.0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn redacted_masks_secrets() {
        let cfg = parse(
            r#"
proxy:
  enabled: true
  url: http://proxy:8080
  username: u
  password: hunter2
exchanges:
  binance:
    credentials:
      api_key: key
      api_secret: secret
  okx:
    credentials:
      api_key: key
      api_secret: secret
      passphrase: phrase
"#,
        );
        let red = cfg.redacted();
        let binance = red.exchanges["binance"].credentials.as_ref().unwrap();
        assert_eq!(binance.api_key, "***");
        assert_eq!(binance.api_secret, "***");
        assert_eq!(binance.passphrase, None);
        let okx = red.exchanges["okx"].credentials.as_ref().unwrap();
        assert_eq!(okx.passphrase.as_deref(), Some("***"));
        assert_eq!(red.proxy.password.as_deref(), Some("***"));
        // Original is untouched.
        assert_eq!(cfg.proxy.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn proxy_url_embeds_credentials() {
        let proxy = ProxySettings {
            enabled: true,
            url: Some("http://proxy:8080".to_string()),
            username: Some("u".to_string()),
            password: Some("p".to_string()),
        };
        assert_eq!(proxy.proxy_url().as_deref(), Some("http://u:p@proxy:8080"));

        let disabled = ProxySettings::default();
        assert_eq!(disabled.proxy_url(), None);
    }
}
