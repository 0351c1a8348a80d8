use crate::strategy::ExitReason;
use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::json;
use smol_str::SmolStr;
use zigquant_instrument::{Side, candle::Timeframe};
use zigquant_risk::{drawdown::DrawdownTracker, ratio};

/// One closed round trip of the backtest.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct TradeRecord {
    /// Direction of the position: `Buy` is a long round trip.
    pub side: Side,
    pub quantity: Decimal,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub exit_price: Decimal,
    /// Net of commissions.
    pub pnl: Decimal,
    pub fees: Decimal,
    pub exit_reason: ExitReason,
}

impl TradeRecord {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// One point of the per-bar equity curve.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct EquityPoint {
    pub time: DateTime<Utc>,
    pub equity: Decimal,
}

/// Performance metrics computed over the completed run.
///
/// Ratios are observation-boundary figures and therefore `f64`. A `profit_factor`
/// of `INFINITY` encodes "no losing trades" - the JSON report maps it to the
/// string sentinel "inf".
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct BacktestMetrics {
    pub total_return: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub max_drawdown: f64,
    pub calmar: f64,
    pub total_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    /// Explanation when a ratio was mapped to a defined fallback
    /// (eg/ zero-variance Sharpe reported as 0).
    pub error_message: Option<String>,
}

/// Deterministic output of one backtest run.
///
/// For identical inputs two runs produce identical results - nothing here
/// depends on wall-clock or scheduling (elapsed time lives on the job state,
/// not the result).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BacktestResult {
    pub id: SmolStr,
    pub strategy_name: SmolStr,
    pub parameters: serde_json::Value,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub candles_processed: usize,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: BacktestMetrics,
}

impl BacktestResult {
    /// JSON report document for persistence.
    ///
    /// Non-finite `profit_factor` serialises as the string "inf" so the
    /// document stays valid JSON.
    pub fn to_report_json(&self) -> serde_json::Value {
        let profit_factor = if self.metrics.profit_factor.is_finite() {
            json!(self.metrics.profit_factor)
        } else {
            json!("inf")
        };

        json!({
            "id": self.id,
            "strategy": self.strategy_name,
            "parameters": self.parameters,
            "initial_capital": self.initial_capital,
            "final_equity": self.final_equity,
            "candles_processed": self.candles_processed,
            "metrics": {
                "total_return": self.metrics.total_return,
                "win_rate": self.metrics.win_rate,
                "profit_factor": profit_factor,
                "sharpe": self.metrics.sharpe,
                "sortino": self.metrics.sortino,
                "max_drawdown": self.metrics.max_drawdown,
                "calmar": self.metrics.calmar,
                "total_trades": self.metrics.total_trades,
                "winning_trades": self.metrics.winning_trades,
                "losing_trades": self.metrics.losing_trades,
                "error_message": self.metrics.error_message,
            },
            "trades": self.trades,
            "equity_curve": self.equity_curve,
        })
    }
}

/// Compute [`BacktestMetrics`] from the completed trade journal and equity
/// curve.
pub fn compute_metrics(
    initial_capital: Decimal,
    trades: &[TradeRecord],
    equity_curve: &[EquityPoint],
    timeframe: Timeframe,
) -> BacktestMetrics {
    let final_equity = equity_curve
        .last()
        .map(|point| point.equity)
        .unwrap_or(initial_capital);

    let total_return = if initial_capital.is_zero() {
        0.0
    } else {
        ((final_equity - initial_capital) / initial_capital)
            .to_f64()
            .unwrap_or(0.0)
    };

    let winning_trades = trades.iter().filter(|trade| trade.is_win()).count() as u64;
    let losing_trades = trades
        .iter()
        .filter(|trade| trade.pnl < Decimal::ZERO)
        .count() as u64;
    let total_trades = trades.len() as u64;

    let gross_profits: Decimal = trades
        .iter()
        .filter(|trade| trade.pnl > Decimal::ZERO)
        .map(|trade| trade.pnl)
        .sum();
    let gross_losses: Decimal = trades
        .iter()
        .filter(|trade| trade.pnl < Decimal::ZERO)
        .map(|trade| trade.pnl.abs())
        .sum();

    // Per-bar returns over the equity curve.
    let mut returns = Vec::with_capacity(equity_curve.len().saturating_sub(1));
    let mut drawdown = DrawdownTracker::new();
    for (index, point) in equity_curve.iter().enumerate() {
        let equity = point.equity.to_f64().unwrap_or(0.0);
        drawdown.update(equity);
        if index > 0 {
            let previous = equity_curve[index - 1].equity.to_f64().unwrap_or(0.0);
            if previous != 0.0 {
                returns.push((equity - previous) / previous);
            }
        }
    }

    let mean = if returns.is_empty() {
        0.0
    } else {
        returns.iter().sum::<f64>() / returns.len() as f64
    };
    let std_dev = sample_std_dev(&returns, mean);
    let downside = downside_deviation(&returns);

    let annualisation = timeframe.bars_per_year();
    let sharpe = ratio::sharpe(mean, std_dev, 0.0, annualisation);
    let sortino = ratio::sortino(mean, downside, 0.0, annualisation);
    let max_drawdown = drawdown.max_drawdown();
    let calmar = ratio::calmar(mean * annualisation, max_drawdown);

    let error_message = (std_dev == 0.0 && !returns.is_empty())
        .then(|| "sharpe undefined over zero-variance returns, reported as 0".to_string());

    BacktestMetrics {
        total_return,
        win_rate: ratio::win_rate(winning_trades, total_trades),
        profit_factor: ratio::profit_factor(
            gross_profits.to_f64().unwrap_or(0.0),
            gross_losses.to_f64().unwrap_or(0.0),
        ),
        sharpe,
        sortino,
        max_drawdown,
        calmar,
        total_trades,
        winning_trades,
        losing_trades,
        error_message,
    }
}

fn sample_std_dev(returns: &[f64], mean: f64) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = returns
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum();
    (sum_sq / (returns.len() - 1) as f64).sqrt()
}

fn downside_deviation(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let sum_sq: f64 = returns
        .iter()
        .filter(|value| **value < 0.0)
        .map(|value| value * value)
        .sum();
    (sum_sq / (returns.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use rust_decimal_macros::dec;

    fn equity_curve(values: &[Decimal]) -> Vec<EquityPoint> {
        let base = DateTime::<Utc>::MIN_UTC;
        values
            .iter()
            .enumerate()
            .map(|(index, equity)| EquityPoint::new(base + TimeDelta::minutes(index as i64), *equity))
            .collect()
    }

    fn trade(pnl: Decimal) -> TradeRecord {
        let time = DateTime::<Utc>::MIN_UTC;
        TradeRecord::new(
            Side::Buy,
            Decimal::ONE,
            time,
            dec!(100),
            time + TimeDelta::minutes(1),
            dec!(100) + pnl,
            pnl,
            Decimal::ZERO,
            ExitReason::Signal,
        )
    }

    #[test]
    fn test_flat_equity_metrics_are_zero() {
        let curve = equity_curve(&[dec!(1000); 10]);
        let metrics = compute_metrics(dec!(1000), &[], &curve, Timeframe::M1);

        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.sharpe, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.total_trades, 0);
        assert!(metrics.error_message.is_some());
    }

    #[test]
    fn test_win_rate_and_profit_factor() {
        let trades = vec![trade(dec!(10)), trade(dec!(20)), trade(dec!(-5))];
        let curve = equity_curve(&[dec!(1000), dec!(1010), dec!(1030), dec!(1025)]);
        let metrics = compute_metrics(dec!(1000), &trades, &curve, Timeframe::H1);

        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.winning_trades, 2);
        assert_eq!(metrics.losing_trades, 1);
        assert!((metrics.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((metrics.profit_factor - 6.0).abs() < 1e-12);
        assert!((metrics.total_return - 0.025).abs() < 1e-12);
    }

    #[test]
    fn test_profit_factor_infinite_without_losses() {
        let trades = vec![trade(dec!(10))];
        let curve = equity_curve(&[dec!(1000), dec!(1010)]);
        let metrics = compute_metrics(dec!(1000), &trades, &curve, Timeframe::H1);
        assert!(metrics.profit_factor.is_infinite());
    }

    #[test]
    fn test_max_drawdown_peak_to_trough() {
        let curve = equity_curve(&[dec!(1000), dec!(1100), dec!(880), dec!(990)]);
        let metrics = compute_metrics(dec!(1000), &[], &curve, Timeframe::H1);
        assert!((metrics.max_drawdown - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_report_json_encodes_infinite_profit_factor() {
        let result = BacktestResult {
            id: SmolStr::new("bt-1"),
            strategy_name: SmolStr::new("dual_ma"),
            parameters: serde_json::Value::Null,
            initial_capital: dec!(1000),
            final_equity: dec!(1010),
            candles_processed: 100,
            trades: vec![trade(dec!(10))],
            equity_curve: equity_curve(&[dec!(1000), dec!(1010)]),
            metrics: BacktestMetrics {
                profit_factor: f64::INFINITY,
                ..Default::default()
            },
        };

        let report = result.to_report_json();
        assert_eq!(report["metrics"]["profit_factor"], json!("inf"));
        assert!(report["trades"].as_array().is_some());
    }
}
