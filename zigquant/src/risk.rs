use crate::{error::EngineError, metric};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;
use zigquant_risk::{
    drawdown::{DrawdownReport, DrawdownTracker},
    returns::{Confidence, ReturnsWindow},
};

/// Risk configuration consumed by the engine manager.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskConfig {
    pub enabled: bool,
    /// Rolling window length for VaR and ratio metrics.
    pub var_window: usize,
    /// Daily realised loss (fraction of reference capital) that rejects any
    /// further risk-increasing submissions until the date rolls over.
    pub max_daily_loss_pct: f64,
    /// Reference capital for the daily loss percentage.
    pub reference_capital: Decimal,
    /// Whether `start_backtest` is refused while the kill switch is active.
    pub refuse_backtests_on_kill: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            var_window: 100,
            max_daily_loss_pct: 0.05,
            reference_capital: Decimal::from(10_000),
            refuse_backtests_on_kill: true,
        }
    }
}

/// Sticky global trading stop.
///
/// The flag is an atomic observed by every worker before any exchange
/// submission; once set it refuses new trading starts until an explicit
/// [`KillSwitch::deactivate`].
#[derive(Debug, Default)]
pub struct KillSwitch {
    active: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%reason, "kill switch activated");
        *self.reason.lock() = Some(reason);
        self.active.store(true, Ordering::SeqCst);
        metric::record_kill_switch(true);
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        *self.reason.lock() = None;
        metric::record_kill_switch(false);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

/// Rolling risk metrics snapshot.
#[derive(Debug, Copy, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct RiskSummary {
    pub var_95: Option<f64>,
    pub var_99: Option<f64>,
    pub drawdown: DrawdownReport,
    pub daily_realised_pnl: f64,
}

#[derive(Debug)]
struct DailyLedger {
    date: NaiveDate,
    realised: Decimal,
}

/// Pre-submission risk gate shared by every live worker, plus the rolling
/// realised-return window behind the engine's risk metrics.
#[derive(Debug)]
pub struct RiskGate {
    config: RiskConfig,
    returns: Mutex<ReturnsWindow>,
    drawdown: Mutex<DrawdownTracker>,
    daily: Mutex<DailyLedger>,
}

impl RiskGate {
    pub fn new(config: RiskConfig) -> Self {
        let window = config.var_window.max(1);
        Self {
            config,
            returns: Mutex::new(ReturnsWindow::new(window)),
            drawdown: Mutex::new(DrawdownTracker::new()),
            daily: Mutex::new(DailyLedger {
                date: Utc::now().date_naive(),
                realised: Decimal::ZERO,
            }),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Gate a risk-increasing order submission.
    ///
    /// Rejections are [`EngineError::RiskRejected`]; they are counted into the
    /// caller's stats and must not be retried within the same tick.
    pub fn check_submission(&self) -> Result<(), EngineError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut daily = self.daily.lock();
        self.roll_date(&mut daily);

        let loss_limit = Decimal::try_from(self.config.max_daily_loss_pct)
            .unwrap_or_default()
            * self.config.reference_capital;
        if daily.realised < -loss_limit {
            return Err(EngineError::RiskRejected(format!(
                "daily realised loss {} beyond limit {}",
                daily.realised, loss_limit
            )));
        }
        Ok(())
    }

    /// Record realised PnL from a closed trade or grid round trip.
    pub fn record_realised(&self, pnl: Decimal) {
        {
            let mut daily = self.daily.lock();
            self.roll_date(&mut daily);
            daily.realised += pnl;
        }

        if !self.config.reference_capital.is_zero() {
            let as_return = (pnl / self.config.reference_capital)
                .to_f64()
                .unwrap_or(0.0);
            self.returns.lock().push(as_return);
        }
    }

    /// Observe an equity mark for drawdown tracking.
    pub fn record_equity(&self, equity: f64) {
        self.drawdown.lock().update(equity);
    }

    pub fn summary(&self) -> RiskSummary {
        // One lock at a time; nothing here needs a consistent cross-lock view.
        let (var_95, var_99) = {
            let returns = self.returns.lock();
            (
                returns.value_at_risk(Confidence::P95),
                returns.value_at_risk(Confidence::P99),
            )
        };
        let drawdown = self.drawdown.lock().report();
        let daily_realised_pnl = self.daily.lock().realised.to_f64().unwrap_or(0.0);

        RiskSummary {
            var_95,
            var_99,
            drawdown,
            daily_realised_pnl,
        }
    }

    /// Daily statistics reset when the UTC date rolls over.
    fn roll_date(&self, daily: &mut DailyLedger) {
        let today = Utc::now().date_naive();
        if daily.date != today {
            daily.date = today;
            daily.realised = Decimal::ZERO;
        }
    }
}
