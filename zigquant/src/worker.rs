use crate::{
    error::EngineError,
    risk::{KillSwitch, RiskGate},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tokio::sync::oneshot;
use tracing::warn;
use zigquant_execution::error::ExecutionError;
use zigquant_risk::alert::AlertManager;

/// Per-order cancellation deadline during a worker stop.
pub const CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

/// Total stop deadline; remaining orders are logged and the worker still
/// terminates once it elapses.
pub const STOP_DEADLINE: Duration = Duration::from_secs(30);

/// Transient-error retry budget per tick.
pub const RETRY_BUDGET: u32 = 3;

/// Lifecycle status shared by grid and strategy workers.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Initializing,
    Running,
    Paused,
    Stopping,
    Stopped,
    Failed,
}

impl WorkerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Outcome of a worker stop.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct StopReport {
    pub orders_cancelled: u64,
    /// Orders whose cancellation failed or timed out; logged, never fatal.
    pub orders_failed: u64,
}

/// Weak back-reference handed to every worker.
///
/// Carries only the kill-switch atomic, the alert core and the risk gate -
/// the manager owns the worker, and the worker never prolongs the manager's
/// lifetime.
#[derive(Debug, Clone)]
pub struct ManagerHandle {
    pub kill_switch: Arc<KillSwitch>,
    pub alerts: Arc<AlertManager>,
    pub risk: Arc<RiskGate>,
}

impl ManagerHandle {
    /// Guard evaluated before any exchange submission.
    pub fn guard_submission(&self) -> Result<(), EngineError> {
        if self.kill_switch.is_active() {
            return Err(EngineError::KillSwitchActive);
        }
        Ok(())
    }
}

/// Control messages a worker drains ahead of each tick.
#[derive(Debug)]
pub enum WorkerCommand {
    Pause,
    Resume,
    Stop {
        cancel_orders: bool,
        respond: oneshot::Sender<StopReport>,
    },
}

/// Run an exchange operation with bounded exponential backoff.
///
/// Only transient errors are retried; after `RETRY_BUDGET` attempts the error
/// escalates to [`EngineError::ExchangePermanent`], which fails the worker.
pub async fn with_backoff<T, F, Fut>(operation: &str, mut call: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExecutionError>>,
{
    let mut delay = Duration::from_millis(100);

    for attempt in 1..=RETRY_BUDGET {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < RETRY_BUDGET => {
                warn!(%operation, attempt, %error, "transient exchange error, backing off");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(error) if error.is_transient() => {
                return Err(EngineError::ExchangePermanent(format!(
                    "{operation}: retry budget exhausted: {error}"
                )));
            }
            Err(error) => return Err(EngineError::from(error)),
        }
    }
    unreachable!("retry loop always returns")
}
