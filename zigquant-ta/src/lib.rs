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

//! # ZigQuant-TA
//! Technical analysis indicators computed over candle [`Series`](series::Series), plus the
//! [`IndicatorManager`](manager::IndicatorManager) memoisation layer (per-fingerprint
//! single-flight, LRU eviction, incremental append).
//!
//! All indicator arithmetic is [`rust_decimal::Decimal`] - conversion to floating point
//! happens only at observation boundaries.

use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};
use thiserror::Error;

/// Candle [`Series`](series::Series) with lazily attached indicator columns.
pub mod series;

/// Streaming indicator state machines and full-series column computation.
pub mod indicators;

/// [`IndicatorManager`](manager::IndicatorManager) - the per-fingerprint memoisation layer.
pub mod manager;

/// Structural indicator specification.
///
/// Together with a series identity this forms the cache fingerprint, and its
/// [`Display`] rendering names the columns an indicator attaches to a series
/// (eg/ "sma_20", "macd_12_26_9").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorSpec {
    #[display("sma_{period}")]
    Sma { period: usize },
    #[display("ema_{period}")]
    Ema { period: usize },
    #[display("rsi_{period}")]
    Rsi { period: usize },
    #[display("macd_{fast}_{slow}_{signal}")]
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    #[display("bollinger_{period}_{k}")]
    Bollinger { period: usize, k: Decimal },
}

impl IndicatorSpec {
    /// Cache/column name of this specification.
    pub fn name(&self) -> SmolStr {
        format_smolstr!("{self}")
    }

    /// Validate the parameter tuple.
    pub fn validate(&self) -> Result<(), TaError> {
        match *self {
            Self::Sma { period } | Self::Ema { period } | Self::Rsi { period } => {
                if period == 0 {
                    return Err(TaError::InvalidPeriod(self.name()));
                }
            }
            Self::Macd { fast, slow, signal } => {
                if fast == 0 || slow == 0 || signal == 0 || fast >= slow {
                    return Err(TaError::InvalidPeriod(self.name()));
                }
            }
            Self::Bollinger { period, k } => {
                if period < 2 || k <= Decimal::ZERO {
                    return Err(TaError::InvalidPeriod(self.name()));
                }
            }
        }
        Ok(())
    }

    /// Number of leading candles consumed before this indicator produces its
    /// first defined value.
    pub fn warmup(&self) -> usize {
        match *self {
            Self::Sma { period } | Self::Ema { period } => period - 1,
            // RSI needs `period` deltas, so `period + 1` candles.
            Self::Rsi { period } => period,
            // Signal line is an EMA over the MACD line, which itself warms up
            // after `slow` candles.
            Self::Macd { slow, signal, .. } => slow + signal - 2,
            Self::Bollinger { period, .. } => period - 1,
        }
    }
}

/// Errors produced by the indicator pipeline.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum TaError {
    #[error("invalid indicator period for {0}")]
    InvalidPeriod(SmolStr),

    #[error("series {0} has no attached column {1}")]
    ColumnMissing(SmolStr, SmolStr),
}
