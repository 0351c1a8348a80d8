//! Risk-adjusted performance ratios.
//!
//! Inputs are per-interval return statistics; annualisation multiplies by the
//! square root of the number of intervals per year (IID assumption).

/// Sharpe ratio: `(mean - risk_free) / std_dev * sqrt(annualisation)`.
///
/// A zero or non-finite standard deviation yields 0 - callers that care about
/// the distinction surface an explanatory message alongside.
pub fn sharpe(mean_return: f64, std_dev: f64, risk_free: f64, annualisation: f64) -> f64 {
    if std_dev == 0.0 || !std_dev.is_finite() {
        return 0.0;
    }
    (mean_return - risk_free) / std_dev * annualisation.sqrt()
}

/// Sortino ratio: Sharpe with the downside deviation as the risk measure.
pub fn sortino(mean_return: f64, downside_dev: f64, risk_free: f64, annualisation: f64) -> f64 {
    if downside_dev == 0.0 || !downside_dev.is_finite() {
        return 0.0;
    }
    (mean_return - risk_free) / downside_dev * annualisation.sqrt()
}

/// Calmar ratio: annualised return divided by maximum drawdown.
///
/// With no drawdown the ratio degenerates: positive returns map to
/// `INFINITY`, negative to `NEG_INFINITY`, zero to 0.
pub fn calmar(annualised_return: f64, max_drawdown: f64) -> f64 {
    if max_drawdown == 0.0 {
        return if annualised_return > 0.0 {
            f64::INFINITY
        } else if annualised_return < 0.0 {
            f64::NEG_INFINITY
        } else {
            0.0
        };
    }
    annualised_return / max_drawdown.abs()
}

/// Profit factor: gross profits over gross losses.
///
/// Reports the `INFINITY` sentinel when there are profits but no losses, and
/// 0 with no profits. Callers must tolerate the sentinel.
pub fn profit_factor(profits_gross_abs: f64, losses_gross_abs: f64) -> f64 {
    let profits = profits_gross_abs.abs();
    let losses = losses_gross_abs.abs();
    if losses == 0.0 {
        if profits == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        profits / losses
    }
}

/// Win rate: winning trades over total trades, 0 when there are no trades.
pub fn win_rate(wins: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        wins as f64 / total as f64
    }
}
