use crate::{
    error::EngineError,
    strategy::{
        RoiStep, Signal, SignalKind, Strategy, StrategyMetadata, ensure_history,
    },
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};
use zigquant_execution::position::Position;
use zigquant_instrument::candle::Timeframe;
use zigquant_ta::{IndicatorSpec, manager::IndicatorManager, series::Series};

/// Parameters of the [`MacdDivergence`] strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MacdDivergenceParams {
    pub fast_period: usize,
    pub slow_period: usize,
    pub signal_period: usize,
}

impl Default for MacdDivergenceParams {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

/// Momentum strategy trading MACD histogram zero-crossings: a histogram
/// flipping positive opens long, flipping negative opens short, and a flip
/// against the position exits it.
#[derive(Debug, Clone)]
pub struct MacdDivergence {
    params: MacdDivergenceParams,
    metadata: StrategyMetadata,
}

impl MacdDivergence {
    pub fn new(params: MacdDivergenceParams, timeframe: Timeframe) -> Result<Self, EngineError> {
        let spec = IndicatorSpec::Macd {
            fast: params.fast_period,
            slow: params.slow_period,
            signal: params.signal_period,
        };
        spec.validate()
            .map_err(|error| EngineError::Validation(error.to_string()))?;

        Ok(Self {
            params,
            metadata: StrategyMetadata {
                name: SmolStr::new("macd_divergence"),
                version: SmolStr::new("1.0.0"),
                strategy_type: SmolStr::new("momentum"),
                timeframe,
                // One extra bar so the previous histogram is also defined.
                startup_candle_count: spec.warmup() + 1,
                minimal_roi: vec![RoiStep::new(0, Decimal::new(8, 2))],
                stoploss: Decimal::new(5, 2),
                trailing: None,
                max_balance_fraction: Decimal::new(25, 2),
            },
        })
    }

    fn spec(&self) -> IndicatorSpec {
        IndicatorSpec::Macd {
            fast: self.params.fast_period,
            slow: self.params.slow_period,
            signal: self.params.signal_period,
        }
    }

    fn histogram(&self, series: &Series, index: usize) -> Option<Decimal> {
        series
            .column(&format_smolstr!("{}_histogram", self.spec().name()))
            .ok()?
            .get(index)
    }
}

impl Strategy for MacdDivergence {
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
        indicators.populate(series, self.spec())?;
        Ok(())
    }

    fn entry_signal(&self, series: &Series, index: usize) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some(histogram) = self.histogram(series, index) else {
            return Ok(None);
        };
        let Some(histogram_prev) = self.histogram(series, index - 1) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        let kind = if histogram_prev <= Decimal::ZERO && histogram > Decimal::ZERO {
            SignalKind::EntryLong
        } else if histogram_prev >= Decimal::ZERO && histogram < Decimal::ZERO {
            SignalKind::EntryShort
        } else {
            return Ok(None);
        };

        // Momentum of the flip relative to price reads as conviction.
        let strength = ((histogram - histogram_prev).abs() / candle.close)
            .to_f64()
            .unwrap_or(0.0)
            .mul_add(1_000.0, 0.4)
            .min(1.0);

        let name = self.spec().name();
        Ok(Some(
            Signal::new(kind, candle.close, strength, candle.time)
                .with_indicator(format_smolstr!("{name}_histogram"), histogram),
        ))
    }

    fn exit_signal(
        &self,
        series: &Series,
        index: usize,
        position: &Position,
    ) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some(histogram) = self.histogram(series, index) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        let kind = if position.is_long() && histogram < Decimal::ZERO {
            SignalKind::ExitLong
        } else if position.is_short() && histogram > Decimal::ZERO {
            SignalKind::ExitShort
        } else {
            return Ok(None);
        };

        Ok(Some(
            Signal::new(kind, candle.close, 1.0, candle.time)
                .with_indicator(format_smolstr!("{}_histogram", self.spec().name()), histogram),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::series_with_closes;
    use rust_decimal_macros::dec;
    use zigquant_instrument::pair::TradingPair;

    fn strategy() -> MacdDivergence {
        MacdDivergence::new(
            MacdDivergenceParams {
                fast_period: 3,
                slow_period: 6,
                signal_period: 3,
            },
            Timeframe::M1,
        )
        .unwrap()
    }

    fn trend_reversal_series() -> Vec<Decimal> {
        // Decline long enough to settle the histogram negative, then a rally.
        let mut closes: Vec<Decimal> = (0..15).map(|i| Decimal::from(130 - i * 2)).collect();
        closes.extend((0..10).map(|i| Decimal::from(102 + i * 3)));
        closes
    }

    #[test]
    fn test_histogram_flip_enters_long() {
        let strategy = strategy();
        let mut series = series_with_closes("macd-long", &trend_reversal_series());
        strategy
            .populate_indicators(&mut series, &IndicatorManager::default())
            .unwrap();

        let signals: Vec<_> = (strategy.metadata().startup_candle_count..series.len())
            .filter_map(|index| strategy.entry_signal(&series, index).unwrap())
            .collect();

        assert!(
            signals
                .iter()
                .any(|signal| signal.kind == SignalKind::EntryLong),
            "rally after decline must flip the histogram positive"
        );
    }

    #[test]
    fn test_exit_long_on_negative_histogram() {
        let strategy = strategy();
        // Rally then decline: the histogram ends negative.
        let mut closes: Vec<Decimal> = (0..12).map(|i| Decimal::from(100 + i * 3)).collect();
        closes.extend((0..8).map(|i| Decimal::from(136 - i * 4)));
        let mut series = series_with_closes("macd-exit", &closes);
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

    #[test]
    fn test_steady_trend_no_duplicate_entries() {
        let strategy = strategy();
        // Monotone rally: after the first flip the histogram stays positive.
        let closes: Vec<Decimal> = (0..25).map(|i| Decimal::from(100 + i * 2)).collect();
        let mut series = series_with_closes("macd-steady", &closes);
        strategy
            .populate_indicators(&mut series, &IndicatorManager::default())
            .unwrap();

        let long_entries = (strategy.metadata().startup_candle_count..series.len())
            .filter_map(|index| strategy.entry_signal(&series, index).unwrap())
            .filter(|signal| signal.kind == SignalKind::EntryLong)
            .count();
        assert!(long_entries <= 1);
    }
}
