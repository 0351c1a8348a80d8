use chrono::{DateTime, Utc};
use derive_more::Display;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::{debug, error, info, warn};

/// Default bounded alert history capacity.
pub const DEFAULT_ALERT_HISTORY: usize = 256;

/// Severity of an [`Alert`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Debug,
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertLevel {
    const ALL: [AlertLevel; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Critical,
        Self::Emergency,
    ];

    fn index(&self) -> usize {
        match self {
            Self::Debug => 0,
            Self::Info => 1,
            Self::Warning => 2,
            Self::Critical => 3,
            Self::Emergency => 4,
        }
    }
}

/// A raised alert.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Alert {
    pub id: u64,
    pub level: AlertLevel,
    pub title: SmolStr,
    pub message: String,
    pub source: SmolStr,
    pub time: DateTime<Utc>,
}

/// Comparison operator of an [`AlertRule`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
}

impl Comparison {
    fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterOrEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessOrEqual => value <= threshold,
        }
    }
}

/// Threshold rule mapping a named metric observation to an alert.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AlertRule {
    pub metric: SmolStr,
    pub comparison: Comparison,
    pub threshold: f64,
    pub level: AlertLevel,
    pub title: SmolStr,
}

/// Delivery channel for raised alerts.
pub trait AlertChannel: Send + Sync {
    fn dispatch(&self, alert: &Alert);
}

/// Channel writing alerts to the tracing log at their severity.
#[derive(Debug, Default)]
pub struct LogChannel;

impl AlertChannel for LogChannel {
    fn dispatch(&self, alert: &Alert) {
        match alert.level {
            AlertLevel::Debug => {
                debug!(source = %alert.source, title = %alert.title, "{}", alert.message)
            }
            AlertLevel::Info => {
                info!(source = %alert.source, title = %alert.title, "{}", alert.message)
            }
            AlertLevel::Warning => {
                warn!(source = %alert.source, title = %alert.title, "{}", alert.message)
            }
            AlertLevel::Critical | AlertLevel::Emergency => {
                error!(level = %alert.level, source = %alert.source, title = %alert.title, "{}", alert.message)
            }
        }
    }
}

/// Per-level monotonic alert counters.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct AlertCounts {
    pub debug: u64,
    pub info: u64,
    pub warning: u64,
    pub critical: u64,
    pub emergency: u64,
}

/// Alert core: threshold rules, bounded FIFO history and channel dispatch.
///
/// The history evicts oldest-first beyond its capacity; per-level counters are
/// monotonic and unaffected by eviction.
pub struct AlertManager {
    capacity: usize,
    rules: Vec<AlertRule>,
    channels: Vec<Arc<dyn AlertChannel>>,
    history: Mutex<VecDeque<Alert>>,
    counters: [AtomicU64; 5],
    next_id: AtomicU64,
}

impl std::fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertManager")
            .field("capacity", &self.capacity)
            .field("rules", &self.rules)
            .field("history_len", &self.history.lock().len())
            .finish()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new(DEFAULT_ALERT_HISTORY, Vec::new(), vec![Arc::new(LogChannel)])
    }
}

impl AlertManager {
    pub fn new(
        capacity: usize,
        rules: Vec<AlertRule>,
        channels: Vec<Arc<dyn AlertChannel>>,
    ) -> Self {
        Self {
            capacity: capacity.max(1),
            rules,
            channels,
            history: Mutex::new(VecDeque::new()),
            counters: Default::default(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Raise an alert directly, bypassing the rule set.
    pub fn raise(
        &self,
        level: AlertLevel,
        title: impl Into<SmolStr>,
        message: impl Into<String>,
        source: impl Into<SmolStr>,
    ) -> Alert {
        let alert = Alert {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            level,
            title: title.into(),
            message: message.into(),
            source: source.into(),
            time: Utc::now(),
        };

        self.counters[level.index()].fetch_add(1, Ordering::Relaxed);

        {
            let mut history = self.history.lock();
            history.push_back(alert.clone());
            if history.len() > self.capacity {
                history.pop_front();
            }
        }

        for channel in &self.channels {
            channel.dispatch(&alert);
        }

        alert
    }

    /// Evaluate a named metric observation against every configured rule,
    /// raising an alert per rule that fires. Returns the raised alerts.
    pub fn observe(&self, metric: &str, value: f64, source: impl Into<SmolStr>) -> Vec<Alert> {
        let source = source.into();
        let fired: Vec<AlertRule> = self
            .rules
            .iter()
            .filter(|rule| rule.metric == metric && rule.comparison.evaluate(value, rule.threshold))
            .cloned()
            .collect();

        fired
            .into_iter()
            .map(|rule| {
                self.raise(
                    rule.level,
                    rule.title.clone(),
                    format!("{metric} = {value} breached threshold {}", rule.threshold),
                    source.clone(),
                )
            })
            .collect()
    }

    /// Copy of the retained alert history, oldest first.
    pub fn history(&self) -> Vec<Alert> {
        self.history.lock().iter().cloned().collect()
    }

    /// Monotonic per-level counters.
    pub fn counts(&self) -> AlertCounts {
        let load = |level: AlertLevel| self.counters[level.index()].load(Ordering::Relaxed);
        AlertCounts {
            debug: load(AlertLevel::Debug),
            info: load(AlertLevel::Info),
            warning: load(AlertLevel::Warning),
            critical: load(AlertLevel::Critical),
            emergency: load(AlertLevel::Emergency),
        }
    }

    /// Total alerts raised across all levels.
    pub fn total(&self) -> u64 {
        AlertLevel::ALL
            .iter()
            .map(|level| self.counters[level.index()].load(Ordering::Relaxed))
            .sum()
    }
}
