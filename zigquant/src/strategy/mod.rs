use crate::error::EngineError;
use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{fmt::Debug, sync::Arc};
use zigquant_execution::{client::ExchangeClient, position::Position};
use zigquant_instrument::{
    Side,
    candle::Timeframe,
    pair::TradingPair,
};
use zigquant_ta::{manager::IndicatorManager, series::Series};

/// Strategy construction from a validated request descriptor.
pub mod registry;

/// Dual moving average trend follower.
pub mod dual_ma;

/// RSI mean reversion.
pub mod rsi_reversion;

/// Bollinger band breakout.
pub mod bollinger_breakout;

/// Triple moving average alignment trend follower.
pub mod triple_ma;

/// MACD histogram divergence.
pub mod macd_divergence;

/// Direction and intent of a [`Signal`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    EntryLong,
    EntryShort,
    ExitLong,
    ExitShort,
}

impl SignalKind {
    pub fn is_entry(&self) -> bool {
        matches!(self, Self::EntryLong | Self::EntryShort)
    }
}

/// Strategy-emitted trade intent.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub side: Side,
    /// Reference price: the close of the candle the signal was computed on.
    pub price: Decimal,
    /// Conviction in `[0, 1]`.
    pub strength: f64,
    pub time: DateTime<Utc>,
    /// Indicator observations backing the signal.
    pub indicators: Vec<(SmolStr, Decimal)>,
}

impl Signal {
    pub fn new(kind: SignalKind, price: Decimal, strength: f64, time: DateTime<Utc>) -> Self {
        let side = match kind {
            SignalKind::EntryLong | SignalKind::ExitShort => Side::Buy,
            SignalKind::EntryShort | SignalKind::ExitLong => Side::Sell,
        };
        Self {
            kind,
            side,
            price,
            strength: strength.clamp(0.0, 1.0),
            time,
            indicators: Vec::new(),
        }
    }

    pub fn with_indicator(mut self, name: impl Into<SmolStr>, value: Decimal) -> Self {
        self.indicators.push((name.into(), value));
        self
    }
}

/// One step of the minimal-ROI schedule: after `minutes` of holding, an open
/// profit of at least `profit_ratio` triggers an exit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct RoiStep {
    pub minutes: i64,
    pub profit_ratio: Decimal,
}

/// Trailing stop configuration: once the open return crosses `offset`, an
/// exit triggers when price retraces `distance` from the peak favourable price.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct TrailingStop {
    pub offset: Decimal,
    pub distance: Decimal,
}

/// Strategy descriptor.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyMetadata {
    pub name: SmolStr,
    pub version: SmolStr,
    pub strategy_type: SmolStr,
    pub timeframe: Timeframe,
    /// Candles consumed before the first signal can be emitted.
    pub startup_candle_count: usize,
    /// Sorted ascending by `minutes`.
    pub minimal_roi: Vec<RoiStep>,
    /// Loss fraction that forces an exit (eg/ 0.05 exits at -5%).
    pub stoploss: Decimal,
    pub trailing: Option<TrailingStop>,
    /// Largest fraction of the quote balance a single position may consume.
    pub max_balance_fraction: Decimal,
}

/// One-time initialisation context handed to a strategy.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub pair: TradingPair,
    pub timeframe: Timeframe,
    /// Live exchange handle; `None` in backtests.
    pub client: Option<Arc<dyn ExchangeClient>>,
}

/// Polymorphic strategy capability surface.
///
/// `entry_signal` and `exit_signal` are pure functions of the series up to the
/// provided index inclusive - the runtime relies on this for deterministic
/// backtests.
pub trait Strategy: Debug + Send + Sync {
    fn metadata(&self) -> &StrategyMetadata;

    /// Strategy parameters as a JSON document, for reporting.
    fn parameters(&self) -> serde_json::Value;

    /// One-time setup. The default is a no-op.
    fn initialize(&mut self, ctx: &StrategyContext) -> Result<(), EngineError> {
        let _ = ctx;
        Ok(())
    }

    /// Attach required indicator columns to the series. Idempotent.
    fn populate_indicators(
        &self,
        series: &mut Series,
        indicators: &IndicatorManager,
    ) -> Result<(), EngineError>;

    /// Entry intent at `index`, or `None`.
    ///
    /// Fails with [`EngineError::InsufficientHistory`] while `index` is inside
    /// the startup window; the runtime treats that as "no signal yet".
    fn entry_signal(&self, series: &Series, index: usize) -> Result<Option<Signal>, EngineError>;

    /// Exit intent for the open position at `index`, or `None`.
    fn exit_signal(
        &self,
        series: &Series,
        index: usize,
        position: &Position,
    ) -> Result<Option<Signal>, EngineError>;

    /// Position size in base units for an entry signal given the available
    /// quote balance. Zero or positive, and at most
    /// [`StrategyMetadata::max_balance_fraction`] of the balance.
    fn position_size(&self, signal: &Signal, quote_balance: Decimal) -> Decimal {
        default_position_size(self.metadata(), signal, quote_balance)
    }
}

/// Shared sizing rule: allocate `max_balance_fraction` of the balance, scaled
/// by signal strength, expressed in base units at the signal price.
pub fn default_position_size(
    metadata: &StrategyMetadata,
    signal: &Signal,
    quote_balance: Decimal,
) -> Decimal {
    if signal.price <= Decimal::ZERO || quote_balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let strength = Decimal::try_from(signal.strength).unwrap_or(Decimal::ONE);
    let quote = quote_balance * metadata.max_balance_fraction * strength;
    (quote / signal.price).round_dp(8)
}

/// Guard for the startup candle window.
pub fn ensure_history(index: usize, required: usize) -> Result<(), EngineError> {
    if index < required {
        return Err(EngineError::InsufficientHistory { index, required });
    }
    Ok(())
}

/// Why a position was closed.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Stoploss,
    MinimalRoi,
    TrailingStop,
    Signal,
    Shutdown,
}

/// Metadata-driven exit overlay (stoploss, minimal-ROI, trailing stop),
/// evaluated before the strategy's own `exit_signal` on every bar.
#[derive(Debug, Clone, Default)]
pub struct ExitOverlay {
    trailing_armed: bool,
    trailing_peak: Option<Decimal>,
}

impl ExitOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget trailing state when a position closes.
    pub fn reset(&mut self) {
        self.trailing_armed = false;
        self.trailing_peak = None;
    }

    /// Evaluate the overlay against the open position at `price`, `elapsed`
    /// minutes after entry.
    pub fn check(
        &mut self,
        metadata: &StrategyMetadata,
        position: &Position,
        price: Decimal,
        elapsed_minutes: i64,
    ) -> Option<ExitReason> {
        if position.is_flat() || position.entry_price.is_zero() {
            return None;
        }

        let open_return = if position.is_long() {
            (price - position.entry_price) / position.entry_price
        } else {
            (position.entry_price - price) / position.entry_price
        };

        if open_return <= -metadata.stoploss {
            return Some(ExitReason::Stoploss);
        }

        // Largest schedule step whose holding time has elapsed.
        let roi_threshold = metadata
            .minimal_roi
            .iter()
            .take_while(|step| step.minutes <= elapsed_minutes)
            .last()
            .map(|step| step.profit_ratio);
        if let Some(threshold) = roi_threshold
            && open_return >= threshold
        {
            return Some(ExitReason::MinimalRoi);
        }

        if let Some(trailing) = metadata.trailing {
            if !self.trailing_armed && open_return >= trailing.offset {
                self.trailing_armed = true;
                self.trailing_peak = Some(price);
            }

            if self.trailing_armed {
                let peak = match self.trailing_peak {
                    // Favourable direction extends the peak.
                    Some(peak) if position.is_long() && price > peak => price,
                    Some(peak) if position.is_short() && price < peak => price,
                    Some(peak) => peak,
                    None => price,
                };
                self.trailing_peak = Some(peak);

                let retrace = if position.is_long() {
                    (peak - price) / peak
                } else {
                    (price - peak) / peak
                };
                if retrace >= trailing.distance {
                    return Some(ExitReason::TrailingStop);
                }
            }
        }

        None
    }
}
