use crate::{
    error::EngineError,
    strategy::{
        RoiStep, Signal, SignalKind, Strategy, StrategyMetadata, ensure_history,
    },
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use zigquant_execution::position::Position;
use zigquant_instrument::candle::Timeframe;
use zigquant_ta::{IndicatorSpec, manager::IndicatorManager, series::Series};

/// Parameters of the [`DualMovingAverage`] strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DualMaParams {
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Default for DualMaParams {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 30,
        }
    }
}

/// Trend follower entering on fast/slow SMA crossovers.
///
/// A golden cross (fast crossing above slow) opens long, a death cross opens
/// short; the opposite cross exits.
#[derive(Debug, Clone)]
pub struct DualMovingAverage {
    params: DualMaParams,
    metadata: StrategyMetadata,
}

impl DualMovingAverage {
    pub fn new(params: DualMaParams, timeframe: Timeframe) -> Result<Self, EngineError> {
        if params.fast_period == 0 || params.fast_period >= params.slow_period {
            return Err(EngineError::Validation(format!(
                "dual_ma requires 0 < fast ({}) < slow ({})",
                params.fast_period, params.slow_period
            )));
        }

        Ok(Self {
            params,
            metadata: StrategyMetadata {
                name: SmolStr::new("dual_ma"),
                version: SmolStr::new("1.0.0"),
                strategy_type: SmolStr::new("trend_following"),
                timeframe,
                startup_candle_count: params.slow_period + 1,
                minimal_roi: vec![RoiStep::new(0, Decimal::new(10, 2))],
                stoploss: Decimal::new(5, 2),
                trailing: None,
                max_balance_fraction: Decimal::new(30, 2),
            },
        })
    }

    fn fast_name(&self) -> SmolStr {
        IndicatorSpec::Sma {
            period: self.params.fast_period,
        }
        .name()
    }

    fn slow_name(&self) -> SmolStr {
        IndicatorSpec::Sma {
            period: self.params.slow_period,
        }
        .name()
    }

    /// (fast, slow) values at `index`, when both are out of warm-up.
    fn averages(&self, series: &Series, index: usize) -> Option<(Decimal, Decimal)> {
        let fast = series.column(&self.fast_name()).ok()?.get(index)?;
        let slow = series.column(&self.slow_name()).ok()?.get(index)?;
        Some((fast, slow))
    }
}

impl Strategy for DualMovingAverage {
    fn metadata(&self) -> &StrategyMetadata {
        &self.metadata
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(self.params).unwrap_or_default()
    }

    fn populate_indicators(
        &self,
        series: &mut Series,
        indicators: &IndicatorManager,
    ) -> Result<(), EngineError> {
        indicators.populate(
            series,
            IndicatorSpec::Sma {
                period: self.params.fast_period,
            },
        )?;
        indicators.populate(
            series,
            IndicatorSpec::Sma {
                period: self.params.slow_period,
            },
        )?;
        Ok(())
    }

    fn entry_signal(&self, series: &Series, index: usize) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some((fast, slow)) = self.averages(series, index) else {
            return Ok(None);
        };
        let Some((fast_prev, slow_prev)) = self.averages(series, index - 1) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        let crossed_up = fast_prev <= slow_prev && fast > slow;
        let crossed_down = fast_prev >= slow_prev && fast < slow;
        if !crossed_up && !crossed_down {
            return Ok(None);
        }

        let kind = if crossed_up {
            SignalKind::EntryLong
        } else {
            SignalKind::EntryShort
        };
        let spread = ((fast - slow) / slow).abs();
        let strength = (spread.to_f64().unwrap_or(0.0) * 100.0).min(1.0);

        Ok(Some(
            Signal::new(kind, candle.close, strength, candle.time)
                .with_indicator(self.fast_name(), fast)
                .with_indicator(self.slow_name(), slow),
        ))
    }

    fn exit_signal(
        &self,
        series: &Series,
        index: usize,
        position: &Position,
    ) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some((fast, slow)) = self.averages(series, index) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        // The opposite cross closes the position.
        let kind = if position.is_long() && fast < slow {
            SignalKind::ExitLong
        } else if position.is_short() && fast > slow {
            SignalKind::ExitShort
        } else {
            return Ok(None);
        };

        Ok(Some(
            Signal::new(kind, candle.close, 1.0, candle.time)
                .with_indicator(self.fast_name(), fast)
                .with_indicator(self.slow_name(), slow),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::series_with_closes;
    use rust_decimal_macros::dec;
    use zigquant_instrument::pair::TradingPair;

    fn strategy() -> DualMovingAverage {
        DualMovingAverage::new(
            DualMaParams {
                fast_period: 2,
                slow_period: 4,
            },
            Timeframe::M1,
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_params() {
        assert!(
            DualMovingAverage::new(
                DualMaParams {
                    fast_period: 30,
                    slow_period: 10
                },
                Timeframe::M1,
            )
            .is_err()
        );
    }

    #[test]
    fn test_insufficient_history() {
        let strategy = strategy();
        let series = series_with_closes("dual-ma", &[dec!(1), dec!(2)]);
        assert!(matches!(
            strategy.entry_signal(&series, 1),
            Err(EngineError::InsufficientHistory { .. })
        ));
    }

    #[test]
    fn test_golden_cross_enters_long() {
        let strategy = strategy();
        // Downtrend establishing fast < slow, then a sharp reversal.
        let closes = [
            dec!(100),
            dec!(98),
            dec!(96),
            dec!(94),
            dec!(92),
            dec!(90),
            dec!(99),
            dec!(108),
        ];
        let mut series = series_with_closes("dual-ma", &closes);
        strategy
            .populate_indicators(&mut series, &IndicatorManager::default())
            .unwrap();

        let signals: Vec<_> = (strategy.metadata().startup_candle_count..series.len())
            .filter_map(|index| strategy.entry_signal(&series, index).unwrap())
            .collect();

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::EntryLong);
        assert!(!signals[0].indicators.is_empty());
    }

    #[test]
    fn test_death_cross_exits_long() {
        let strategy = strategy();
        // Uptrend, then a collapse.
        let closes = [
            dec!(100),
            dec!(102),
            dec!(104),
            dec!(106),
            dec!(108),
            dec!(110),
            dec!(100),
            dec!(90),
        ];
        let mut series = series_with_closes("dual-ma-exit", &closes);
        strategy
            .populate_indicators(&mut series, &IndicatorManager::default())
            .unwrap();

        let position = Position::new_flat(TradingPair::new("BTC", "USDT"))
            .with_size(Decimal::ONE, dec!(100));
        let exit = strategy
            .exit_signal(&series, series.len() - 1, &position)
            .unwrap();
        assert!(matches!(exit, Some(signal) if signal.kind == SignalKind::ExitLong));
    }
}
