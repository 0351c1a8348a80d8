use crate::{
    error::EngineError,
    strategy::{
        RoiStep, Signal, SignalKind, Strategy, StrategyMetadata, ensure_history,
    },
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use zigquant_execution::position::Position;
use zigquant_instrument::candle::Timeframe;
use zigquant_ta::{IndicatorSpec, manager::IndicatorManager, series::Series};

/// Parameters of the [`TripleMovingAverage`] strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TripleMaParams {
    pub fast_period: usize,
    pub mid_period: usize,
    pub slow_period: usize,
}

impl Default for TripleMaParams {
    fn default() -> Self {
        Self {
            fast_period: 5,
            mid_period: 15,
            slow_period: 40,
        }
    }
}

/// Trend follower requiring full EMA alignment: entry when fast > mid > slow
/// newly forms (or the inverse for shorts), exit when the fast EMA crosses
/// back through the mid.
#[derive(Debug, Clone)]
pub struct TripleMovingAverage {
    params: TripleMaParams,
    metadata: StrategyMetadata,
}

impl TripleMovingAverage {
    pub fn new(params: TripleMaParams, timeframe: Timeframe) -> Result<Self, EngineError> {
        if params.fast_period == 0
            || params.fast_period >= params.mid_period
            || params.mid_period >= params.slow_period
        {
            return Err(EngineError::Validation(format!(
                "triple_ma requires 0 < fast ({}) < mid ({}) < slow ({})",
                params.fast_period, params.mid_period, params.slow_period
            )));
        }

        Ok(Self {
            params,
            metadata: StrategyMetadata {
                name: SmolStr::new("triple_ma"),
                version: SmolStr::new("1.0.0"),
                strategy_type: SmolStr::new("trend_following"),
                timeframe,
                startup_candle_count: params.slow_period + 1,
                minimal_roi: vec![RoiStep::new(0, Decimal::new(15, 2))],
                stoploss: Decimal::new(5, 2),
                trailing: None,
                max_balance_fraction: Decimal::new(30, 2),
            },
        })
    }

    fn specs(&self) -> [IndicatorSpec; 3] {
        [
            IndicatorSpec::Ema {
                period: self.params.fast_period,
            },
            IndicatorSpec::Ema {
                period: self.params.mid_period,
            },
            IndicatorSpec::Ema {
                period: self.params.slow_period,
            },
        ]
    }

    fn averages(&self, series: &Series, index: usize) -> Option<(Decimal, Decimal, Decimal)> {
        let [fast, mid, slow] = self.specs();
        Some((
            series.column(&fast.name()).ok()?.get(index)?,
            series.column(&mid.name()).ok()?.get(index)?,
            series.column(&slow.name()).ok()?.get(index)?,
        ))
    }
}

fn aligned_long(fast: Decimal, mid: Decimal, slow: Decimal) -> bool {
    fast > mid && mid > slow
}

fn aligned_short(fast: Decimal, mid: Decimal, slow: Decimal) -> bool {
    fast < mid && mid < slow
}

impl Strategy for TripleMovingAverage {
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
        for spec in self.specs() {
            indicators.populate(series, spec)?;
        }
        Ok(())
    }

    fn entry_signal(&self, series: &Series, index: usize) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some((fast, mid, slow)) = self.averages(series, index) else {
            return Ok(None);
        };
        let Some((fast_prev, mid_prev, slow_prev)) = self.averages(series, index - 1) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        // Only the bar on which alignment forms signals.
        let kind = if aligned_long(fast, mid, slow) && !aligned_long(fast_prev, mid_prev, slow_prev)
        {
            SignalKind::EntryLong
        } else if aligned_short(fast, mid, slow)
            && !aligned_short(fast_prev, mid_prev, slow_prev)
        {
            SignalKind::EntryShort
        } else {
            return Ok(None);
        };

        let [fast_spec, mid_spec, slow_spec] = self.specs();
        Ok(Some(
            Signal::new(kind, candle.close, 0.8, candle.time)
                .with_indicator(fast_spec.name(), fast)
                .with_indicator(mid_spec.name(), mid)
                .with_indicator(slow_spec.name(), slow),
        ))
    }

    fn exit_signal(
        &self,
        series: &Series,
        index: usize,
        position: &Position,
    ) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some((fast, mid, _)) = self.averages(series, index) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        let kind = if position.is_long() && fast < mid {
            SignalKind::ExitLong
        } else if position.is_short() && fast > mid {
            SignalKind::ExitShort
        } else {
            return Ok(None);
        };

        Ok(Some(Signal::new(kind, candle.close, 1.0, candle.time)))
    }
}
