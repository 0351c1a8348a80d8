use crate::order::{id::ClientOrderId, status::OrderStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zigquant_instrument::pair::TradingPair;

/// Errors produced by exchange clients and the order lifecycle.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum ExecutionError {
    #[error("order validation failed: {0}")]
    Validation(String),

    #[error("no market data for {0}")]
    NoMarketData(TradingPair),

    #[error("order not found: {0}")]
    OrderNotFound(ClientOrderId),

    #[error("order already in terminal status {0}")]
    OrderAlreadyFinal(OrderStatus),

    #[error("invalid order status transition {from} -> {to}")]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("balance insufficient for {asset}: {reason}")]
    BalanceInsufficient { asset: String, reason: String },

    #[error("transient exchange error: {0}")]
    Transient(String),

    #[error("permanent exchange error: {0}")]
    Permanent(String),

    #[error("exchange request timed out")]
    Timeout,
}

impl ExecutionError {
    /// Whether retrying the failed operation can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout)
    }
}
