#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::cognitive_complexity,
    unused_crate_dependencies,
    unused_extern_crates,
    clippy::unused_self,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # ZigQuant-Instrument
//! Core trading pair, candle and time data structures shared by every ZigQuant crate.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// [`TradingPair`](pair::TradingPair) and related naming utilities.
pub mod pair;

/// OHLCV [`Candle`](candle::Candle) model and [`Timeframe`](candle::Timeframe).
pub mod candle;

/// Wall-clock + monotonic sequence [`TimePoint`](time::TimePoint).
pub mod time;

/// [`Side`] of a trade, order, or position - Buy or Sell.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub enum Side {
    #[serde(alias = "buy", alias = "BUY", alias = "b")]
    Buy,
    #[serde(alias = "sell", alias = "SELL", alias = "s")]
    Sell,
}

impl Side {
    /// Opposite [`Side`].
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_inverse() {
        assert_eq!(Side::Buy.inverse(), Side::Sell);
        assert_eq!(Side::Sell.inverse(), Side::Buy);
    }

    #[test]
    fn test_side_de() {
        assert_eq!(
            serde_json::from_str::<Side>("\"buy\"").unwrap(),
            Side::Buy
        );
        assert_eq!(
            serde_json::from_str::<Side>("\"SELL\"").unwrap(),
            Side::Sell
        );
    }
}
