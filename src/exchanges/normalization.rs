// =============================================================================
// Symbol normalization — canonical symbol form and base/quote extraction
// =============================================================================

use tracing::warn;

/// Quote assets recognized when a symbol carries no explicit separator.
/// Longest suffix wins, so "BUSD" is matched before "USD"-like fragments.
pub const DEFAULT_QUOTE_ASSETS: &[&str] = &["USDT", "USDC", "BUSD", "DAI", "TUSD", "USDD"];

/// Canonical symbol form: separators stripped, uppercased.
///
/// "BTC-USDT", "BTC/USDT" and "btcusdt" all normalize to "BTCUSDT".
/// Idempotent: normalizing a normalized symbol is a no-op.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .chars()
        .filter(|c| !matches!(c, '-' | '/' | ' '))
        .collect::<String>()
        .to_uppercase()
}

/// Split a symbol into (base, quote) using the default quote set.
pub fn extract_base_quote(symbol: &str) -> (String, String) {
    extract_base_quote_with(symbol, DEFAULT_QUOTE_ASSETS)
}

/// Split a symbol into (base, quote).
///
/// Explicit separators ("-" or "/") are honored first; otherwise the longest
/// matching quote suffix from `quote_assets` wins. A symbol with no
/// recognizable quote comes back as (symbol, "").
pub fn extract_base_quote_with(symbol: &str, quote_assets: &[&str]) -> (String, String) {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return (String::new(), String::new());
    }

    for sep in ['-', '/'] {
        if symbol.contains(sep) {
            let parts: Vec<&str> = symbol.split(sep).collect();
            if parts.len() == 2 {
                return (parts[0].trim().to_string(), parts[1].trim().to_string());
            }
        }
    }

    let mut quotes: Vec<&str> = quote_assets.to_vec();
    quotes.sort_by_key(|q| std::cmp::Reverse(q.len()));
    for quote in quotes {
        if let Some(base) = symbol.strip_suffix(quote) {
            if !base.is_empty() {
                return (base.to_string(), quote.to_string());
            }
        }
    }

    (symbol, String::new())
}

/// Warn when two symbols do not denote the same pair after normalization.
///
/// Returns whether they match. Callers treat a mismatch as advisory only;
/// entries proceed regardless.
pub fn check_symbol_mismatch(expected: &str, actual: &str) -> bool {
    let expected_normalized = normalize_symbol(expected);
    let actual_normalized = normalize_symbol(actual);

    if expected_normalized != actual_normalized {
        warn!(
            expected = %expected,
            actual = %actual,
            "symbol mismatch between legs ({expected_normalized} vs {actual_normalized})"
        );
        return false;
    }
    true
}
