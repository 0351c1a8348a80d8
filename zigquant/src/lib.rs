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

//! # ZigQuant
//! Core execution substrate of the ZigQuant trading platform: the
//! [`EngineManager`](engine::EngineManager) lifecycle owner, the grid trading
//! state machine, the strategy runtime with its indicator pipeline, the
//! deterministic backtest engine, and the risk/alert core with its kill switch.
//!
//! ## Overview
//! - [`engine`] - worker registries, kill switch, system health.
//! - [`grid`] - per-grid worker trading a ladder of price levels.
//! - [`strategy`] - the polymorphic [`Strategy`](strategy::Strategy) capability
//!   and the bundled strategies.
//! - [`backtest`] - deterministic candle-by-candle replay on a bounded pool.
//! - [`risk`] - pre-submission risk gate and the sticky kill switch.

/// Engine manager: registries, kill switch, health.
pub mod engine;

/// Grid trading configuration, state machine and worker.
pub mod grid;

/// Strategy capability surface and bundled strategies.
pub mod strategy;

/// Live strategy worker.
pub mod strategy_worker;

/// Deterministic backtest engine and result types.
pub mod backtest;

/// Pre-submission risk gate, rolling risk metrics and the kill switch.
pub mod risk;

/// Candle feed abstraction.
pub mod data;

/// Engine configuration envelope.
pub mod config;

/// Engine-wide error taxonomy.
pub mod error;

/// Worker lifecycle plumbing shared by grid and strategy workers.
pub mod worker;

/// Engine identifier newtypes.
pub mod id;

/// Logging initialisation.
pub mod logging;

/// Prometheus exposition names and recording helpers.
pub mod metric;

#[cfg(test)]
pub(crate) mod test_utils;
