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

//! # ZigQuant-Risk
//! Rolling-window risk metrics (historical VaR, drawdown, Sharpe/Sortino/Calmar),
//! and the threshold-rule alert core with its bounded alert history.

use chrono::{DateTime, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// Rolling window of realised returns and the summary metrics computed over it.
pub mod returns;

/// Risk-adjusted ratio calculations (Sharpe, Sortino, Calmar, profit factor, win rate).
pub mod ratio;

/// Peak-to-trough equity drawdown tracking.
pub mod drawdown;

/// Threshold-rule alert manager with bounded history and per-level counters.
pub mod alert;

/// A value paired with its observation time.
#[derive(
    Debug, Copy, Clone, PartialEq, PartialOrd, Default, Deserialize, Serialize, Constructor,
)]
pub struct Timed<T> {
    pub value: T,
    pub time: DateTime<Utc>,
}
