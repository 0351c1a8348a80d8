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

/// Parameters of the [`RsiMeanReversion`] strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RsiReversionParams {
    pub period: usize,
    pub oversold: Decimal,
    pub overbought: Decimal,
}

impl Default for RsiReversionParams {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: Decimal::from(30),
            overbought: Decimal::from(70),
        }
    }
}

/// Mean reversion: long when RSI is oversold, short when overbought, exit as
/// RSI normalises back through the midline.
#[derive(Debug, Clone)]
pub struct RsiMeanReversion {
    params: RsiReversionParams,
    metadata: StrategyMetadata,
}

impl RsiMeanReversion {
    pub fn new(params: RsiReversionParams, timeframe: Timeframe) -> Result<Self, EngineError> {
        if params.period == 0 || params.oversold >= params.overbought {
            return Err(EngineError::Validation(format!(
                "rsi_reversion requires period > 0 and oversold ({}) < overbought ({})",
                params.oversold, params.overbought
            )));
        }

        Ok(Self {
            params,
            metadata: StrategyMetadata {
                name: SmolStr::new("rsi_reversion"),
                version: SmolStr::new("1.0.0"),
                strategy_type: SmolStr::new("mean_reversion"),
                timeframe,
                startup_candle_count: params.period + 1,
                minimal_roi: vec![RoiStep::new(0, Decimal::new(5, 2))],
                stoploss: Decimal::new(4, 2),
                trailing: None,
                max_balance_fraction: Decimal::new(20, 2),
            },
        })
    }

    fn rsi_name(&self) -> SmolStr {
        IndicatorSpec::Rsi {
            period: self.params.period,
        }
        .name()
    }

    fn rsi(&self, series: &Series, index: usize) -> Option<Decimal> {
        series.column(&self.rsi_name()).ok()?.get(index)
    }
}

impl Strategy for RsiMeanReversion {
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
            IndicatorSpec::Rsi {
                period: self.params.period,
            },
        )?;
        Ok(())
    }

    fn entry_signal(&self, series: &Series, index: usize) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some(rsi) = self.rsi(series, index) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        let signal = if rsi <= self.params.oversold {
            // Deeper oversold reads as stronger conviction.
            let strength = ((self.params.oversold - rsi) / self.params.oversold)
                .to_f64()
                .unwrap_or(0.0)
                + 0.5;
            Some(Signal::new(
                SignalKind::EntryLong,
                candle.close,
                strength,
                candle.time,
            ))
        } else if rsi >= self.params.overbought {
            let ceiling = Decimal::ONE_HUNDRED - self.params.overbought;
            let strength = ((rsi - self.params.overbought) / ceiling)
                .to_f64()
                .unwrap_or(0.0)
                + 0.5;
            Some(Signal::new(
                SignalKind::EntryShort,
                candle.close,
                strength,
                candle.time,
            ))
        } else {
            None
        };

        Ok(signal.map(|signal| signal.with_indicator(self.rsi_name(), rsi)))
    }

    fn exit_signal(
        &self,
        series: &Series,
        index: usize,
        position: &Position,
    ) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some(rsi) = self.rsi(series, index) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        let midline = Decimal::from(50);
        let kind = if position.is_long() && rsi >= midline {
            SignalKind::ExitLong
        } else if position.is_short() && rsi <= midline {
            SignalKind::ExitShort
        } else {
            return Ok(None);
        };

        Ok(Some(
            Signal::new(kind, candle.close, 1.0, candle.time)
                .with_indicator(self.rsi_name(), rsi),
        ))
    }
}
