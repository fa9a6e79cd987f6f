//! Shared symbol and quote tables for the broker adapter.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Deterministic quote table used in mock mode and as the last-resort
/// fallback when no market data is available.
pub const MOCK_PRICES: &[(&str, Decimal)] = &[
    ("AAPL", dec!(193.50)),
    ("MSFT", dec!(417.10)),
    ("GOOGL", dec!(175.20)),
    ("AMZN", dec!(151.94)),
    ("TSLA", dec!(248.42)),
    ("SPY", dec!(502.43)),
    ("NVDA", dec!(182.30)),
    ("BND", dec!(74.30)),
    ("JNJ", dec!(180.34)),
    ("KO", dec!(65.75)),
    ("PG", dec!(152.40)),
    ("QQQ", dec!(599.31)),
    ("VTI", dec!(327.55)),
    ("NTNX", dec!(61.20)),
    ("OKTA", dec!(92.45)),
];

pub const DEFAULT_PRICE: Decimal = dec!(100.00);

/// Human labels to tickers for loose symbol resolution.
pub const SYMBOL_LABELS: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("microsoft", "MSFT"),
    ("google", "GOOGL"),
    ("alphabet", "GOOGL"),
    ("amazon", "AMZN"),
    ("tesla", "TSLA"),
    ("nvidia", "NVDA"),
    ("nutanix", "NTNX"),
    ("okta", "OKTA"),
    ("johnson", "JNJ"),
    ("coca-cola", "KO"),
    ("coke", "KO"),
];

pub fn mock_price(symbol: &str) -> Decimal {
    MOCK_PRICES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(symbol))
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE)
}

/// Static resolution shared by mock mode and the live adapter's fallback:
/// exact tickers from the table, then label prefixes. None when nothing
/// matches unambiguously.
pub fn resolve_symbol_static(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    if MOCK_PRICES.iter().any(|(known, _)| *known == upper) {
        return Some(upper);
    }

    let lower = trimmed.to_ascii_lowercase();
    let mut matches = SYMBOL_LABELS
        .iter()
        .filter(|(label, _)| label.starts_with(&lower))
        .map(|(_, ticker)| *ticker)
        .collect::<Vec<_>>();
    matches.dedup();
    match matches.as_slice() {
        [only] => Some((*only).to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_price_table() {
        assert_eq!(mock_price("AAPL"), dec!(193.50));
        assert_eq!(mock_price("aapl"), dec!(193.50));
        assert_eq!(mock_price("ZZZZ"), DEFAULT_PRICE);
    }

    #[test]
    fn test_resolve_exact_ticker() {
        assert_eq!(resolve_symbol_static("msft").as_deref(), Some("MSFT"));
        assert_eq!(resolve_symbol_static("SPY").as_deref(), Some("SPY"));
    }

    #[test]
    fn test_resolve_label() {
        assert_eq!(resolve_symbol_static("Nutanix").as_deref(), Some("NTNX"));
        assert_eq!(resolve_symbol_static("apple").as_deref(), Some("AAPL"));
    }

    #[test]
    fn test_resolve_ambiguous_or_unknown_is_none() {
        assert_eq!(resolve_symbol_static(""), None);
        assert_eq!(resolve_symbol_static("consolidated widgets"), None);
        // "co" prefixes both coca-cola and coke but they agree on KO
        assert_eq!(resolve_symbol_static("co").as_deref(), Some("KO"));
        // "a" prefixes apple, alphabet and amazon: ambiguous
        assert_eq!(resolve_symbol_static("a"), None);
    }
}
