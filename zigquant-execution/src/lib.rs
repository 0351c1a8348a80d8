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

//! # ZigQuant-Execution
//! Order entity and lifecycle state machine, L2 [`OrderBook`](book::OrderBook), account
//! data structures, the polymorphic [`ExchangeClient`](client::ExchangeClient) capability
//! surface, and the in-memory [`PaperExchange`](paper::PaperExchange).

use crate::{balance::AssetBalance, position::Position};
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};

/// `Order` entity, identifiers, requests and the lifecycle state machine.
pub mod order;

/// Aggregated L2 order book with BBO, depth and slippage queries.
pub mod book;

/// Asset balances.
pub mod balance;

/// Signed instrument position.
pub mod position;

/// Exchange-side trade records.
pub mod trade;

/// [`ExchangeClient`](client::ExchangeClient) capability trait and order update events.
pub mod client;

/// Paper trading exchange matching client orders against the last quote.
pub mod paper;

/// Execution error taxonomy.
pub mod error;

/// Point-in-time account snapshot aggregating balances and positions.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Constructor)]
pub struct AccountSnapshot {
    pub balances: Vec<AssetBalance>,
    pub positions: Vec<Position>,
    pub time: DateTime<Utc>,
}
