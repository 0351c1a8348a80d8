use crate::{
    balance::AssetBalance,
    error::ExecutionError,
    order::{
        Fill, Order, OrderRequest,
        id::{ClientOrderId, OrderId},
        status::OrderStatus,
    },
    position::Position,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use tokio::sync::broadcast;
use zigquant_instrument::pair::TradingPair;

/// Top-of-book quote for a trading pair.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub time: DateTime<Utc>,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// Exchange-streamed change to an order.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum OrderUpdateKind {
    Fill(Fill),
    StatusChange(OrderStatus),
}

/// Order update event delivered to `subscribe_order_updates` subscribers.
///
/// Updates for one order are delivered in exchange-assigned order; fill events
/// may be duplicated and are de-duplicated by their fill id downstream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct OrderUpdate {
    pub cid: ClientOrderId,
    pub order_id: Option<OrderId>,
    pub pair: TradingPair,
    pub kind: OrderUpdateKind,
    pub time: DateTime<Utc>,
}

/// Polymorphic exchange capability surface consumed by grid and strategy
/// workers.
///
/// Implementations may be paper (in-memory matching against the last quote),
/// testnet, or mainnet; callers hold them behind `Arc<dyn ExchangeClient>` and
/// wrap every call in their own deadline via `tokio::time::timeout`.
#[async_trait]
pub trait ExchangeClient: Debug + Send + Sync {
    /// Best bid/ask for the pair. Fails with [`ExecutionError::NoMarketData`]
    /// when no quote is available.
    async fn best_bid_ask(&self, pair: &TradingPair) -> Result<Quote, ExecutionError>;

    /// Validate and submit an order, returning its accepted (or immediately
    /// filled) state.
    async fn submit_order(&self, request: OrderRequest) -> Result<Order, ExecutionError>;

    /// Cancel an active order by client order id.
    async fn cancel_order(&self, cid: &ClientOrderId) -> Result<Order, ExecutionError>;

    /// Current state of an order.
    async fn get_order(&self, cid: &ClientOrderId) -> Result<Order, ExecutionError>;

    /// All active orders, optionally filtered by pair.
    async fn open_orders(&self, pair: Option<&TradingPair>) -> Result<Vec<Order>, ExecutionError>;

    /// All non-flat positions.
    async fn positions(&self) -> Result<Vec<Position>, ExecutionError>;

    /// Account balances.
    async fn balances(&self) -> Result<Vec<AssetBalance>, ExecutionError>;

    /// Subscribe to streamed order updates.
    fn subscribe_order_updates(&self) -> broadcast::Receiver<OrderUpdate>;

    /// Whether the underlying transport is connected.
    fn is_connected(&self) -> bool;
}
