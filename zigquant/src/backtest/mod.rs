use crate::{
    error::EngineError,
    id::BacktestId,
    strategy::{ExitOverlay, ExitReason, SignalKind, registry, registry::StrategyRequest},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::format_smolstr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use summary::{BacktestResult, EquityPoint, TradeRecord, compute_metrics};
use tracing::info;
use zigquant_instrument::{Side, candle::Candle};
use zigquant_ta::{
    manager::IndicatorManager,
    series::{Series, SeriesId},
};

/// Backtest result, trade journal and performance metric types.
pub mod summary;

/// Backtest job descriptor.
///
/// The candle series itself is supplied separately (via a
/// [`CandleFeed`](crate::data::CandleFeed)) - the request stays a plain
/// serialisable document.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestRequest {
    pub strategy: StrategyRequest,
    pub initial_capital: Decimal,
    /// Commission per fill as a fraction of notional.
    #[serde(default)]
    pub commission_rate: Decimal,
    /// Absolute price offset paid by buys and conceded by sells.
    #[serde(default)]
    pub slippage: Decimal,
    /// Inclusive candle time range; unbounded when absent.
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl BacktestRequest {
    pub fn new(strategy: StrategyRequest, initial_capital: Decimal) -> Self {
        Self {
            strategy,
            initial_capital,
            commission_rate: Decimal::ZERO,
            slippage: Decimal::ZERO,
            start: None,
            end: None,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "backtest initial capital must be positive".to_string(),
            ));
        }
        if self.commission_rate < Decimal::ZERO || self.commission_rate >= Decimal::ONE {
            return Err(EngineError::Validation(format!(
                "commission rate {} outside [0, 1)",
                self.commission_rate
            )));
        }
        if self.slippage < Decimal::ZERO {
            return Err(EngineError::Validation(
                "slippage must be non-negative".to_string(),
            ));
        }
        if let (Some(start), Some(end)) = (self.start, self.end)
            && start > end
        {
            return Err(EngineError::Validation(
                "backtest start is after end".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle status of a backtest job.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum BacktestStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl BacktestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Reader-facing snapshot of a backtest job.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BacktestJobState {
    pub id: BacktestId,
    pub status: BacktestStatus,
    pub progress: f64,
    pub trades: u64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Shared state of one backtest job.
///
/// The worker owns the run; readers observe progress through atomics without
/// taking the worker's locks. Cancellation is a cooperative flag checked at
/// every candle step.
#[derive(Debug)]
pub struct BacktestHandle {
    id: BacktestId,
    status: RwLock<BacktestStatus>,
    progress_bits: AtomicU64,
    trades: AtomicU64,
    cancelled: AtomicBool,
    started: RwLock<Option<DateTime<Utc>>>,
    elapsed_ms: AtomicU64,
    result: RwLock<Option<BacktestResult>>,
    error: RwLock<Option<EngineError>>,
}

impl BacktestHandle {
    pub fn new(id: BacktestId) -> Self {
        Self {
            id,
            status: RwLock::new(BacktestStatus::Queued),
            progress_bits: AtomicU64::new(0),
            trades: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            started: RwLock::new(None),
            elapsed_ms: AtomicU64::new(0),
            result: RwLock::new(None),
            error: RwLock::new(None),
        }
    }

    pub fn id(&self) -> &BacktestId {
        &self.id
    }

    pub fn status(&self) -> BacktestStatus {
        *self.status.read()
    }

    pub fn progress(&self) -> f64 {
        f64::from_bits(self.progress_bits.load(Ordering::Acquire))
    }

    /// Request cooperative cancellation.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn result(&self) -> Option<BacktestResult> {
        self.result.read().clone()
    }

    pub fn snapshot(&self) -> BacktestJobState {
        BacktestJobState {
            id: self.id.clone(),
            status: self.status(),
            progress: self.progress(),
            trades: self.trades.load(Ordering::Relaxed),
            elapsed_ms: self.elapsed_ms.load(Ordering::Relaxed),
            error: self.error.read().as_ref().map(ToString::to_string),
        }
    }

    pub(crate) fn mark_running(&self) {
        *self.status.write() = BacktestStatus::Running;
        *self.started.write() = Some(Utc::now());
    }

    pub(crate) fn mark_elapsed(&self) {
        if let Some(started) = *self.started.read() {
            let elapsed = (Utc::now() - started).num_milliseconds().max(0) as u64;
            self.elapsed_ms.store(elapsed, Ordering::Relaxed);
        }
    }

    pub(crate) fn complete(&self, result: BacktestResult) {
        self.mark_elapsed();
        self.progress_bits.store(1.0_f64.to_bits(), Ordering::Release);
        *self.result.write() = Some(result);
        *self.status.write() = BacktestStatus::Completed;
    }

    pub(crate) fn cancel(&self) {
        self.mark_elapsed();
        *self.status.write() = BacktestStatus::Cancelled;
    }

    pub(crate) fn fail(&self, error: EngineError) {
        self.mark_elapsed();
        *self.error.write() = Some(error);
        *self.status.write() = BacktestStatus::Failed;
    }

    fn publish_progress(&self, index: usize, startup: usize, total: usize) {
        let denominator = total.saturating_sub(startup).max(1) as f64;
        let fraction = (index.saturating_sub(startup) as f64 / denominator).clamp(0.0, 1.0);
        self.progress_bits
            .store(fraction.to_bits(), Ordering::Release);
    }
}

/// Outcome of the deterministic run core.
#[derive(Debug)]
pub enum BacktestOutcome {
    Completed(Box<BacktestResult>),
    Cancelled,
}

struct OpenTrade {
    side: Side,
    quantity: Decimal,
    entry_time: DateTime<Utc>,
    entry_price: Decimal,
    entry_fee: Decimal,
}

/// Deterministic candle-by-candle replay.
///
/// Never contacts an exchange client; for identical inputs the returned
/// [`BacktestResult`] is identical. Cancellation is observed once per candle.
pub fn run(
    id: &BacktestId,
    request: &BacktestRequest,
    candles: Vec<Candle>,
    handle: &BacktestHandle,
) -> Result<BacktestOutcome, EngineError> {
    request.validate()?;

    let mut strategy = registry::build(&request.strategy)?;
    strategy.initialize(&crate::strategy::StrategyContext {
        pair: request.strategy.pair.clone(),
        timeframe: request.strategy.timeframe,
        client: None,
    })?;
    let metadata = strategy.metadata().clone();
    let startup = metadata.startup_candle_count;

    let candles: Vec<Candle> = candles
        .into_iter()
        .filter(|candle| request.start.is_none_or(|start| candle.time >= start))
        .filter(|candle| request.end.is_none_or(|end| candle.time <= end))
        .collect();
    let total = candles.len();

    let mut series = Series::with_candles(
        SeriesId(format_smolstr!("backtest-{id}")),
        request.strategy.pair.clone(),
        request.strategy.timeframe,
        candles,
    );

    // Fresh cache per run: isolation keeps replay deterministic, and the
    // single up-front compute is the amortised equivalent of per-bar appends.
    let indicators = IndicatorManager::default();
    strategy.populate_indicators(&mut series, &indicators)?;

    let commission_rate = request.commission_rate;
    let slippage = request.slippage;
    let mut cash = request.initial_capital;
    let mut position_size = Decimal::ZERO;
    let mut open_trade: Option<OpenTrade> = None;
    let mut overlay = ExitOverlay::new();
    let mut trades: Vec<TradeRecord> = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(total);

    for index in 0..total {
        if handle.is_cancelled() {
            info!(id = %id, index, "backtest cancelled");
            return Ok(BacktestOutcome::Cancelled);
        }

        let candle = *series.candle(index).expect("index is within the series");
        let close = candle.close;

        if index >= startup {
            if let Some(open) = open_trade.as_ref() {
                let position = open_position(&request.strategy.pair, open);
                let elapsed_minutes = (candle.time - open.entry_time).num_minutes();

                // Metadata overlay first, the strategy's own exit second.
                let mut exit_reason = overlay.check(&metadata, &position, close, elapsed_minutes);
                if exit_reason.is_none() {
                    exit_reason = match strategy.exit_signal(&series, index, &position) {
                        Ok(signal) => signal
                            .filter(|signal| !signal.kind.is_entry())
                            .map(|_| ExitReason::Signal),
                        Err(EngineError::InsufficientHistory { .. }) => None,
                        Err(error) => return Err(error),
                    };
                }

                if let Some(reason) = exit_reason {
                    let open = open_trade.take().expect("open trade is present");
                    let (trade, proceeds) =
                        close_trade(open, close, slippage, commission_rate, candle.time, reason);
                    cash += proceeds;
                    position_size = Decimal::ZERO;
                    overlay.reset();
                    handle.trades.store(trades.len() as u64 + 1, Ordering::Relaxed);
                    trades.push(trade);
                }
            } else {
                let signal = match strategy.entry_signal(&series, index) {
                    Ok(signal) => signal,
                    // Inside the warm-up window there is no signal yet.
                    Err(EngineError::InsufficientHistory { .. }) => None,
                    Err(error) => return Err(error),
                };

                if let Some(signal) = signal.filter(|signal| signal.kind.is_entry()) {
                    let quantity = strategy.position_size(&signal, cash);
                    if quantity > Decimal::ZERO {
                        let (fill_price, signed) = match signal.kind {
                            SignalKind::EntryLong => (close + slippage, quantity),
                            _ => (close - slippage, -quantity),
                        };
                        let notional = fill_price * quantity;
                        let fee = notional.abs() * commission_rate;

                        // Buys consume cash, shorts post proceeds.
                        cash -= fill_price * signed;
                        cash -= fee;
                        position_size = signed;
                        open_trade = Some(OpenTrade {
                            side: signal.side,
                            quantity,
                            entry_time: candle.time,
                            entry_price: fill_price,
                            entry_fee: fee,
                        });
                    }
                }
            }
        }

        equity_curve.push(EquityPoint::new(candle.time, cash + position_size * close));
        handle.publish_progress(index + 1, startup, total);
    }

    // Force-close anything still open on the final candle.
    if let Some(open) = open_trade.take()
        && let Some(last) = series.last_candle().copied()
    {
        let (trade, proceeds) = close_trade(
            open,
            last.close,
            slippage,
            commission_rate,
            last.time,
            ExitReason::Shutdown,
        );
        cash += proceeds;
        trades.push(trade);
        if let Some(point) = equity_curve.last_mut() {
            *point = EquityPoint::new(last.time, cash);
        }
    }

    let metrics = compute_metrics(
        request.initial_capital,
        &trades,
        &equity_curve,
        request.strategy.timeframe,
    );
    handle.trades.store(trades.len() as u64, Ordering::Relaxed);

    let final_equity = equity_curve
        .last()
        .map(|point| point.equity)
        .unwrap_or(request.initial_capital);

    Ok(BacktestOutcome::Completed(Box::new(BacktestResult {
        id: id.0.clone(),
        strategy_name: metadata.name.clone(),
        parameters: strategy.parameters(),
        initial_capital: request.initial_capital,
        final_equity,
        candles_processed: total,
        trades,
        equity_curve,
        metrics,
    })))
}

fn open_position(
    pair: &zigquant_instrument::pair::TradingPair,
    open: &OpenTrade,
) -> zigquant_execution::position::Position {
    let signed = match open.side {
        Side::Buy => open.quantity,
        Side::Sell => -open.quantity,
    };
    zigquant_execution::position::Position::new_flat(pair.clone())
        .with_size(signed, open.entry_price)
}

/// Close an open round trip at `close`, returning the journal record and the
/// signed cash proceeds (exit notional minus exit fee).
fn close_trade(
    open: OpenTrade,
    close: Decimal,
    slippage: Decimal,
    commission_rate: Decimal,
    time: DateTime<Utc>,
    reason: ExitReason,
) -> (TradeRecord, Decimal) {
    // Long positions sell to close (conceding slippage), shorts buy to close.
    let (exit_price, proceeds_sign) = match open.side {
        Side::Buy => (close - slippage, Decimal::ONE),
        Side::Sell => (close + slippage, -Decimal::ONE),
    };
    let notional = exit_price * open.quantity;
    let exit_fee = notional.abs() * commission_rate;
    let proceeds = notional * proceeds_sign - exit_fee;

    let direction = match open.side {
        Side::Buy => Decimal::ONE,
        Side::Sell => -Decimal::ONE,
    };
    let pnl = (exit_price - open.entry_price) * open.quantity * direction
        - open.entry_fee
        - exit_fee;

    let record = TradeRecord::new(
        open.side,
        open.quantity,
        open.entry_time,
        open.entry_price,
        time,
        exit_price,
        pnl,
        open.entry_fee + exit_fee,
        reason,
    );
    (record, proceeds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::candles_with_closes;
    use rust_decimal_macros::dec;
    use zigquant_instrument::{candle::Timeframe, pair::TradingPair};

    fn request(strategy: &str) -> BacktestRequest {
        BacktestRequest::new(
            StrategyRequest::new(strategy, TradingPair::new("BTC", "USDT"), Timeframe::M1),
            dec!(10_000),
        )
    }

    fn run_once(request: &BacktestRequest, closes: &[Decimal]) -> BacktestResult {
        let handle = BacktestHandle::new(BacktestId::new("test"));
        match run(
            &BacktestId::new("test"),
            request,
            candles_with_closes(closes),
            &handle,
        )
        .unwrap()
        {
            BacktestOutcome::Completed(result) => *result,
            BacktestOutcome::Cancelled => panic!("unexpected cancellation"),
        }
    }

    #[test]
    fn test_validate_rejects_bad_request() {
        let mut bad = request("dual_ma");
        bad.initial_capital = Decimal::ZERO;
        assert!(bad.validate().is_err());

        let mut bad = request("dual_ma");
        bad.commission_rate = Decimal::ONE;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_constant_series_produces_no_trades() {
        let closes = vec![dec!(100); 1000];
        let result = run_once(&request("dual_ma"), &closes);

        assert_eq!(result.metrics.total_trades, 0);
        assert_eq!(result.metrics.total_return, 0.0);
        assert_eq!(result.metrics.sharpe, 0.0);
        assert_eq!(result.metrics.max_drawdown, 0.0);
        assert_eq!(result.final_equity, dec!(10_000));
        assert_eq!(result.candles_processed, 1000);
    }

    #[test]
    fn test_deterministic_across_runs() {
        // Deterministic pseudo-random walk.
        let mut closes = Vec::with_capacity(400);
        let mut value = 10_000_i64;
        let mut state = 0x2545F491_u64;
        for _ in 0..400 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            value += ((state >> 33) % 200) as i64 - 100;
            closes.push(Decimal::from(value));
        }

        let mut request = request("rsi_reversion");
        request.commission_rate = dec!(0.001);
        request.slippage = dec!(0.5);

        let first = run_once(&request, &closes);
        let second = run_once(&request, &closes);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first.to_report_json()).unwrap(),
            serde_json::to_vec(&second.to_report_json()).unwrap()
        );
    }

    #[test]
    fn test_commission_reduces_equity() {
        // A rally that triggers the RSI short entry then forced close.
        let mut closes: Vec<Decimal> = (1..=40).map(|i| Decimal::from(100 + i)).collect();
        closes.extend((1..=10).map(|i| Decimal::from(140 - i)));

        let free = run_once(&request("rsi_reversion"), &closes);

        let mut paid_request = request("rsi_reversion");
        paid_request.commission_rate = dec!(0.01);
        let paid = run_once(&paid_request, &closes);

        if free.metrics.total_trades > 0 {
            assert!(paid.final_equity < free.final_equity);
        }
    }

    #[test]
    fn test_cancellation_observed() {
        let handle = BacktestHandle::new(BacktestId::new("cancel"));
        handle.request_cancel();

        let closes = vec![dec!(100); 100];
        let outcome = run(
            &BacktestId::new("cancel"),
            &request("dual_ma"),
            candles_with_closes(&closes),
            &handle,
        )
        .unwrap();
        assert!(matches!(outcome, BacktestOutcome::Cancelled));
    }

    #[test]
    fn test_progress_reaches_one() {
        let handle = BacktestHandle::new(BacktestId::new("progress"));
        let closes = vec![dec!(100); 50];
        run(
            &BacktestId::new("progress"),
            &request("dual_ma"),
            candles_with_closes(&closes),
            &handle,
        )
        .unwrap();
        assert!((handle.progress() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_date_range_filters_candles() {
        let closes = vec![dec!(100); 100];
        let candles = candles_with_closes(&closes);
        let mid_time = candles[50].time;

        let mut ranged = request("dual_ma");
        ranged.start = Some(mid_time);
        let handle = BacktestHandle::new(BacktestId::new("range"));
        let BacktestOutcome::Completed(result) = run(
            &BacktestId::new("range"),
            &ranged,
            candles,
            &handle,
        )
        .unwrap() else {
            panic!("unexpected cancellation");
        };
        assert_eq!(result.candles_processed, 50);
    }
}
