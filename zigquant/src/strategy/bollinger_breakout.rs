use crate::{
    error::EngineError,
    strategy::{
        Signal, SignalKind, Strategy, StrategyMetadata, TrailingStop, ensure_history,
    },
};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};
use zigquant_execution::position::Position;
use zigquant_instrument::candle::Timeframe;
use zigquant_ta::{IndicatorSpec, manager::IndicatorManager, series::Series};

/// Parameters of the [`BollingerBreakout`] strategy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BollingerBreakoutParams {
    pub period: usize,
    pub k: Decimal,
}

impl Default for BollingerBreakoutParams {
    fn default() -> Self {
        Self {
            period: 20,
            k: Decimal::TWO,
        }
    }
}

/// Volatility breakout: a close beyond the upper/lower band opens with the
/// breakout, a close back through the middle band exits.
#[derive(Debug, Clone)]
pub struct BollingerBreakout {
    params: BollingerBreakoutParams,
    metadata: StrategyMetadata,
}

impl BollingerBreakout {
    pub fn new(params: BollingerBreakoutParams, timeframe: Timeframe) -> Result<Self, EngineError> {
        IndicatorSpec::Bollinger {
            period: params.period,
            k: params.k,
        }
        .validate()
        .map_err(|error| EngineError::Validation(error.to_string()))?;

        Ok(Self {
            params,
            metadata: StrategyMetadata {
                name: SmolStr::new("bollinger_breakout"),
                version: SmolStr::new("1.0.0"),
                strategy_type: SmolStr::new("breakout"),
                timeframe,
                startup_candle_count: params.period,
                minimal_roi: Vec::new(),
                stoploss: Decimal::new(6, 2),
                trailing: Some(TrailingStop::new(Decimal::new(2, 2), Decimal::new(1, 2))),
                max_balance_fraction: Decimal::new(25, 2),
            },
        })
    }

    fn spec(&self) -> IndicatorSpec {
        IndicatorSpec::Bollinger {
            period: self.params.period,
            k: self.params.k,
        }
    }

    fn bands(&self, series: &Series, index: usize) -> Option<(Decimal, Decimal, Decimal)> {
        let name = self.spec().name();
        let upper = series
            .column(&format_smolstr!("{name}_upper"))
            .ok()?
            .get(index)?;
        let middle = series
            .column(&format_smolstr!("{name}_middle"))
            .ok()?
            .get(index)?;
        let lower = series
            .column(&format_smolstr!("{name}_lower"))
            .ok()?
            .get(index)?;
        Some((upper, middle, lower))
    }
}

impl Strategy for BollingerBreakout {
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

        let Some((upper, middle, lower)) = self.bands(series, index) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        let band_width = upper - lower;
        let (kind, distance) = if candle.close > upper {
            (SignalKind::EntryLong, candle.close - upper)
        } else if candle.close < lower {
            (SignalKind::EntryShort, lower - candle.close)
        } else {
            return Ok(None);
        };

        // Penetration depth relative to band width reads as conviction.
        let strength = if band_width.is_zero() {
            1.0
        } else {
            (distance / band_width).to_f64().unwrap_or(0.0).min(1.0) + 0.5
        };

        let name = self.spec().name();
        Ok(Some(
            Signal::new(kind, candle.close, strength, candle.time)
                .with_indicator(format_smolstr!("{name}_upper"), upper)
                .with_indicator(format_smolstr!("{name}_middle"), middle)
                .with_indicator(format_smolstr!("{name}_lower"), lower),
        ))
    }

    fn exit_signal(
        &self,
        series: &Series,
        index: usize,
        position: &Position,
    ) -> Result<Option<Signal>, EngineError> {
        ensure_history(index, self.metadata.startup_candle_count)?;

        let Some((_, middle, _)) = self.bands(series, index) else {
            return Ok(None);
        };
        let Some(candle) = series.candle(index) else {
            return Ok(None);
        };

        // Mean reversion through the middle band ends the breakout.
        let kind = if position.is_long() && candle.close < middle {
            SignalKind::ExitLong
        } else if position.is_short() && candle.close > middle {
            SignalKind::ExitShort
        } else {
            return Ok(None);
        };

        Ok(Some(
            Signal::new(kind, candle.close, 1.0, candle.time)
                .with_indicator(format_smolstr!("{}_middle", self.spec().name()), middle),
        ))
    }
}
