use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Trading pair containing a base and quote asset symbol.
///
/// eg/ `TradingPair { base: "btc", quote: "usdt" }`
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[display("{base}/{quote}")]
pub struct TradingPair {
    pub base: SmolStr,
    pub quote: SmolStr,
}

impl TradingPair {
    pub fn new<S>(base: S, quote: S) -> Self
    where
        S: Into<SmolStr>,
    {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Parse a `TradingPair` from a "BASE/QUOTE" symbol.
    ///
    /// Returns `None` if the symbol does not contain exactly one '/' separator
    /// with non-empty base and quote components.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let (base, quote) = symbol.split_once('/')?;
        if base.is_empty() || quote.is_empty() || quote.contains('/') {
            return None;
        }
        Some(Self::new(base, quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trading_pair_from_symbol() {
        struct TestCase {
            input: &'static str,
            expected: Option<TradingPair>,
        }

        let tests = vec![
            TestCase {
                // TC0: valid symbol
                input: "BTC/USDT",
                expected: Some(TradingPair::new("BTC", "USDT")),
            },
            TestCase {
                // TC1: missing separator
                input: "BTCUSDT",
                expected: None,
            },
            TestCase {
                // TC2: empty quote
                input: "BTC/",
                expected: None,
            },
            TestCase {
                // TC3: empty base
                input: "/USDT",
                expected: None,
            },
            TestCase {
                // TC4: multiple separators
                input: "BTC/USDT/ETH",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                TradingPair::from_symbol(test.input),
                test.expected,
                "TC{index} failed"
            );
        }
    }

    #[test]
    fn test_trading_pair_display() {
        assert_eq!(TradingPair::new("ETH", "USDT").to_string(), "ETH/USDT");
    }

    #[test]
    fn test_trading_pair_symbolic_equality() {
        assert_eq!(
            TradingPair::new("BTC", "USDT"),
            TradingPair::from_symbol("BTC/USDT").unwrap()
        );
        assert_ne!(TradingPair::new("BTC", "USDT"), TradingPair::new("BTC", "USD"));
    }
}
