use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;
use zigquant_execution::error::ExecutionError;
use zigquant_instrument::pair::TradingPair;

/// Engine-wide error taxonomy.
///
/// Propagation policy:
/// - `Validation` and `AlreadyExists` surface at the manager API boundary unchanged.
/// - `ExchangeTransient` is retried within the worker with bounded backoff and
///   escalates to `ExchangePermanent` when the budget is exhausted.
/// - `InsufficientHistory` never surfaces to a user - it reads as "no signal yet".
/// - `RiskRejected` is counted into worker stats and raised as an info alert.
/// - `Timeout` during stop is non-fatal.
/// - Invariant violations are `Internal` and surface as critical alerts.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Error)]
pub enum EngineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(SmolStr),

    #[error("already exists: {0}")]
    AlreadyExists(SmolStr),

    #[error("insufficient history: index {index} requires {required} startup candles")]
    InsufficientHistory { index: usize, required: usize },

    #[error("no market data for {0}")]
    NoMarketData(TradingPair),

    #[error("transient exchange error: {0}")]
    ExchangeTransient(String),

    #[error("permanent exchange error: {0}")]
    ExchangePermanent(String),

    #[error("rejected by risk: {0}")]
    RiskRejected(String),

    #[error("kill switch active")]
    KillSwitchActive,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether a worker may retry the failed operation with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExchangeTransient(_) | Self::Timeout(_))
    }
}

impl From<ExecutionError> for EngineError {
    fn from(value: ExecutionError) -> Self {
        match value {
            ExecutionError::Validation(reason) => Self::Validation(reason),
            ExecutionError::NoMarketData(pair) => Self::NoMarketData(pair),
            ExecutionError::OrderNotFound(cid) => Self::NotFound(cid.0),
            ExecutionError::Transient(reason) => Self::ExchangeTransient(reason),
            ExecutionError::Timeout => Self::Timeout("exchange request".to_string()),
            ExecutionError::Permanent(reason) => Self::ExchangePermanent(reason),
            ExecutionError::OrderAlreadyFinal(status) => {
                Self::Validation(format!("order already in terminal status {status}"))
            }
            ExecutionError::InvalidTransition { from, to } => {
                Self::Internal(format!("invalid order status transition {from} -> {to}"))
            }
            ExecutionError::BalanceInsufficient { asset, reason } => {
                Self::Validation(format!("balance insufficient for {asset}: {reason}"))
            }
        }
    }
}

impl From<zigquant_ta::TaError> for EngineError {
    fn from(value: zigquant_ta::TaError) -> Self {
        Self::Validation(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_mapping() {
        assert!(matches!(
            EngineError::from(ExecutionError::Transient("reset".to_string())),
            EngineError::ExchangeTransient(_)
        ));
        assert!(matches!(
            EngineError::from(ExecutionError::NoMarketData(TradingPair::new("BTC", "USDT"))),
            EngineError::NoMarketData(_)
        ));
    }

    #[test]
    fn test_transient_partition() {
        assert!(EngineError::ExchangeTransient("x".to_string()).is_transient());
        assert!(EngineError::Timeout("x".to_string()).is_transient());
        assert!(!EngineError::KillSwitchActive.is_transient());
    }
}
