use crate::{
    backtest::BacktestRequest, error::EngineError, grid::GridConfig, risk::RiskConfig,
    strategy::registry::{self, StrategyRequest},
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use tracing::warn;
use zigquant_risk::alert::{AlertChannel, AlertManager, AlertRule, LogChannel};

fn default_channels() -> Vec<SmolStr> {
    vec![SmolStr::new("log")]
}

fn default_history_capacity() -> usize {
    zigquant_risk::alert::DEFAULT_ALERT_HISTORY
}

/// Alert subsystem configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlertConfig {
    /// Delivery channel names; unknown names are skipped with a warning.
    pub channels: Vec<SmolStr>,
    pub rules: Vec<AlertRule>,
    pub history_capacity: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            rules: Vec::new(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl AlertConfig {
    /// Build the alert core this configuration describes.
    pub fn build_manager(&self) -> AlertManager {
        let channels: Vec<Arc<dyn AlertChannel>> = self
            .channels
            .iter()
            .filter_map(|name| match name.as_str() {
                "log" => Some(Arc::new(LogChannel) as Arc<dyn AlertChannel>),
                unknown => {
                    warn!(channel = unknown, "unknown alert channel skipped");
                    None
                }
            })
            .collect();

        AlertManager::new(self.history_capacity, self.rules.clone(), channels)
    }
}

/// Configuration envelope consumed by the engine manager.
///
/// Every field has a default; unknown fields are a validation error at this
/// boundary.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub grid: Option<GridConfig>,
    pub backtest: Option<BacktestRequest>,
    pub strategy: Option<StrategyRequest>,
    pub risk: RiskConfig,
    pub alerts: AlertConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|error| EngineError::Validation(format!("invalid configuration: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(grid) = &self.grid {
            grid.validate()?;
        }
        if let Some(backtest) = &self.backtest {
            backtest.validate()?;
        }
        if let Some(strategy) = &self.strategy {
            // Building the strategy validates its name and parameters.
            registry::build(strategy)?;
        }
        Ok(())
    }
}
