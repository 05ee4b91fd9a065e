// =============================================================================
// Spread Engine — concurrent price cache and cross-venue spread math
// =============================================================================
//
// The cache holds the most recent observation per (venue, symbol) key.
// Writers are the per-subscription stream tasks, readers are the strategy
// loops; entries are independent so writers for different venues never
// contend. Last write wins per key; no ordering is guaranteed across keys.
// =============================================================================

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Which price the observation carries. The cache treats both identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceKind {
    Spot,
    Mark,
}

impl std::fmt::Display for PriceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spot => f.write_str("spot"),
            Self::Mark => f.write_str("mark"),
        }
    }
}

/// A single immutable price observation.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub price: f64,
    pub kind: PriceKind,
    pub venue: String,
    pub symbol: String,
    pub timestamp_ms: Option<i64>,
}

/// Result of a spread calculation. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadCalculation {
    /// Signed fraction, e.g. 0.05 = 5%.
    pub spread: f64,
    pub premium_venue: String,
    pub discount_venue: String,
    pub price_premium: f64,
    pub price_discount: f64,
}

/// Price cache plus the spread predicates both strategies poll.
pub struct SpreadEngine {
    prices: DashMap<String, PricePoint>,
}

impl SpreadEngine {
    pub fn new() -> Self {
        Self {
            prices: DashMap::new(),
        }
    }

    // -------------------------------------------------------------------------
    // Cache
    // -------------------------------------------------------------------------

    /// Unconditionally overwrite the cached price for (venue, symbol).
    pub fn update_price(
        &self,
        venue: &str,
        symbol: &str,
        price: f64,
        kind: PriceKind,
        timestamp_ms: Option<i64>,
    ) {
        self.prices.insert(
            Self::key(venue, symbol),
            PricePoint {
                price,
                kind,
                venue: venue.to_string(),
                symbol: symbol.to_string(),
                timestamp_ms,
            },
        );
    }

    /// Latest cached observation, or `None` when the key has never been seen.
    pub fn get_point(&self, venue: &str, symbol: &str) -> Option<PricePoint> {
        self.prices
            .get(&Self::key(venue, symbol))
            .map(|entry| entry.value().clone())
    }

    /// Latest cached price, or `None` when unknown.
    pub fn get_price(&self, venue: &str, symbol: &str) -> Option<f64> {
        self.get_point(venue, symbol).map(|p| p.price)
    }

    fn key(venue: &str, symbol: &str) -> String {
        format!("{venue}:{symbol}")
    }

    // -------------------------------------------------------------------------
    // Spread math
    // -------------------------------------------------------------------------

    /// Relative spread between two prices.
    ///
    /// With `premium_base` true the result is `(a - b) / b`, otherwise
    /// `(b - a) / a`. Either price at zero yields 0.0 (no signal).
    pub fn calculate_spread(&self, price_a: f64, price_b: f64, premium_base: bool) -> f64 {
        if price_a == 0.0 || price_b == 0.0 {
            return 0.0;
        }
        if premium_base {
            (price_a - price_b) / price_b
        } else {
            (price_b - price_a) / price_a
        }
    }

    /// Scenario A spread: futures premium over spot, signed.
    pub fn scenario_a_spread(&self, futures_price: f64, spot_price: f64) -> SpreadCalculation {
        let spread = self.calculate_spread(futures_price, spot_price, true);
        let (premium_venue, discount_venue) = if spread > 0.0 {
            ("futures", "spot")
        } else {
            ("spot", "futures")
        };

        SpreadCalculation {
            spread,
            premium_venue: premium_venue.to_string(),
            discount_venue: discount_venue.to_string(),
            price_premium: futures_price.max(spot_price),
            price_discount: futures_price.min(spot_price),
        }
    }

    /// Scenario B spread: (expensive - cheap) / cheap, always >= 0.
    pub fn scenario_b_spread(
        &self,
        price_a: f64,
        price_b: f64,
        venue_a: &str,
        venue_b: &str,
    ) -> SpreadCalculation {
        if price_a < price_b {
            SpreadCalculation {
                spread: self.calculate_spread(price_b, price_a, true),
                premium_venue: venue_b.to_string(),
                discount_venue: venue_a.to_string(),
                price_premium: price_b,
                price_discount: price_a,
            }
        } else {
            SpreadCalculation {
                spread: self.calculate_spread(price_a, price_b, true),
                premium_venue: venue_a.to_string(),
                discount_venue: venue_b.to_string(),
                price_premium: price_a,
                price_discount: price_b,
            }
        }
    }

    /// True when the spread magnitude has reached the entry threshold.
    pub fn entry_ok(&self, spread: f64, entry_threshold: f64) -> bool {
        spread.abs() >= entry_threshold
    }

    /// True when the spread magnitude has narrowed to the exit threshold.
    pub fn exit_ok(&self, spread: f64, exit_threshold: f64) -> bool {
        spread.abs() <= exit_threshold
    }
}

impl Default for SpreadEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SpreadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpreadEngine")
            .field("cached_keys", &self.prices.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_per_key() {
        let engine = SpreadEngine::new();
        engine.update_price("binance", "BTCUSDT", 48000.0, PriceKind::Mark, Some(1));
        engine.update_price("binance", "BTCUSDT", 48100.0, PriceKind::Mark, Some(2));
        engine.update_price("okx", "BTCUSDT", 47900.0, PriceKind::Mark, Some(3));

        let point = engine.get_point("binance", "BTCUSDT").unwrap();
        assert_eq!(point.price, 48100.0);
        assert_eq!(point.timestamp_ms, Some(2));
        assert_eq!(engine.get_price("okx", "BTCUSDT"), Some(47900.0));
    }

    #[test]
    fn unknown_key_reads_none() {
        let engine = SpreadEngine::new();
        assert!(engine.get_point("binance", "BTCUSDT").is_none());
        assert!(engine.get_price("binance", "BTCUSDT").is_none());
    }

    #[test]
    fn scenario_a_spread_is_exact() {
        let engine = SpreadEngine::new();
        let calc = engine.scenario_a_spread(48000.0, 46000.0);
        assert_eq!(calc.spread, (48000.0 - 46000.0) / 46000.0);
        assert_eq!(calc.premium_venue, "futures");
        assert_eq!(calc.discount_venue, "spot");
        assert_eq!(calc.price_premium, 48000.0);
        assert_eq!(calc.price_discount, 46000.0);
    }

    #[test]
    fn scenario_a_discount_flips_premium_venue() {
        let engine = SpreadEngine::new();
        let calc = engine.scenario_a_spread(45000.0, 46000.0);
        assert!(calc.spread < 0.0);
        assert_eq!(calc.premium_venue, "spot");
        assert_eq!(calc.discount_venue, "futures");
    }

    #[test]
    fn scenario_b_spread_is_non_negative_either_way() {
        let engine = SpreadEngine::new();

        let calc = engine.scenario_b_spread(100.0, 107.0, "bybit", "okx");
        assert!((calc.spread - 0.07).abs() < 1e-12);
        assert_eq!(calc.premium_venue, "okx");
        assert_eq!(calc.discount_venue, "bybit");

        let flipped = engine.scenario_b_spread(107.0, 100.0, "bybit", "okx");
        assert!((flipped.spread - 0.07).abs() < 1e-12);
        assert_eq!(flipped.premium_venue, "bybit");
        assert_eq!(flipped.discount_venue, "okx");
    }

    #[test]
    fn zero_denominator_yields_zero_spread() {
        let engine = SpreadEngine::new();
        assert_eq!(engine.calculate_spread(100.0, 0.0, true), 0.0);
        assert_eq!(engine.calculate_spread(0.0, 100.0, true), 0.0);
        assert_eq!(engine.scenario_a_spread(100.0, 0.0).spread, 0.0);
        // A zero spread never signals entry for any positive threshold.
        assert!(!engine.entry_ok(0.0, 0.01));
    }

    #[test]
    fn entry_and_exit_predicates_use_magnitude() {
        let engine = SpreadEngine::new();
        assert!(engine.entry_ok(0.05, 0.04));
        assert!(engine.entry_ok(-0.05, 0.04));
        assert!(!engine.entry_ok(0.03, 0.04));
        assert!(engine.exit_ok(0.004, 0.005));
        assert!(engine.exit_ok(-0.004, 0.005));
        assert!(!engine.exit_ok(0.02, 0.005));
    }
}
