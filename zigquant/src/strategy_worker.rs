use crate::{
    data::CandleFeed,
    error::EngineError,
    id::StrategyWorkerId,
    metric,
    strategy::{ExitOverlay, ExitReason, Signal, Strategy, StrategyContext, registry,
        registry::StrategyRequest},
    worker::{
        CANCEL_TIMEOUT, ManagerHandle, STOP_DEADLINE, StopReport, WorkerCommand, WorkerStatus,
    },
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, format_smolstr};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use zigquant_execution::{
    client::ExchangeClient,
    order::{Order, OrderRequest},
    position::Position,
};
use zigquant_instrument::Side;
use zigquant_risk::alert::AlertLevel;
use zigquant_ta::{
    manager::IndicatorManager,
    series::{Series, SeriesId},
};

const COMMAND_CHANNEL_CAPACITY: usize = 16;
const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// Copy-on-publish snapshot of a strategy worker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StrategyWorkerState {
    pub id: StrategyWorkerId,
    pub strategy: SmolStr,
    pub status: WorkerStatus,
    pub candles_seen: u64,
    pub last_signal: Option<Signal>,
    pub position: Decimal,
    pub entry_price: Option<Decimal>,
    pub realised_pnl: Decimal,
    pub orders_rejected_by_risk: u64,
    pub start_time: DateTime<Utc>,
}

impl StrategyWorkerState {
    fn new(id: StrategyWorkerId, strategy: SmolStr) -> Self {
        Self {
            id,
            strategy,
            status: WorkerStatus::Initializing,
            candles_seen: 0,
            last_signal: None,
            position: Decimal::ZERO,
            entry_price: None,
            realised_pnl: Decimal::ZERO,
            orders_rejected_by_risk: 0,
            start_time: Utc::now(),
        }
    }
}

/// Manager-side handle to a running strategy worker.
#[derive(Debug)]
pub struct StrategyHandle {
    pub(crate) shared: Arc<RwLock<StrategyWorkerState>>,
    pub(crate) commands: mpsc::Sender<WorkerCommand>,
    pub(crate) client: Arc<dyn ExchangeClient>,
    pub(crate) join: Mutex<Option<JoinHandle<()>>>,
}

impl StrategyHandle {
    pub fn snapshot(&self) -> StrategyWorkerState {
        self.shared.read().clone()
    }

    pub(crate) async fn send(&self, command: WorkerCommand) -> Result<(), EngineError> {
        self.commands.send(command).await.map_err(|_| {
            EngineError::Internal("strategy worker command channel closed".to_string())
        })
    }

    pub(crate) async fn stop(&self, cancel_orders: bool) -> Result<StopReport, EngineError> {
        let (respond, report) = oneshot::channel();
        self.send(WorkerCommand::Stop {
            cancel_orders,
            respond,
        })
        .await?;

        let report = tokio::time::timeout(STOP_DEADLINE + Duration::from_secs(5), report)
            .await
            .map_err(|_| EngineError::Timeout("strategy worker stop".to_string()))?
            .unwrap_or_default();

        if let Some(join) = self.join.lock().take() {
            join.abort();
        }
        Ok(report)
    }
}

/// Build the strategy and spawn its worker onto the runtime.
pub(crate) fn spawn(
    id: StrategyWorkerId,
    request: StrategyRequest,
    feed: Box<dyn CandleFeed>,
    client: Arc<dyn ExchangeClient>,
    indicators: Arc<IndicatorManager>,
    manager: ManagerHandle,
) -> Result<StrategyHandle, EngineError> {
    let mut strategy = registry::build(&request)?;
    strategy.initialize(&StrategyContext {
        pair: request.pair.clone(),
        timeframe: request.timeframe,
        client: Some(Arc::clone(&client)),
    })?;

    let shared = Arc::new(RwLock::new(StrategyWorkerState::new(
        id.clone(),
        strategy.metadata().name.clone(),
    )));
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let series = Series::new(
        SeriesId(format_smolstr!("strategy-{id}")),
        request.pair.clone(),
        request.timeframe,
    );

    let worker = StrategyWorker {
        id,
        request,
        strategy,
        feed,
        series,
        indicators,
        client: Arc::clone(&client),
        manager,
        shared: Arc::clone(&shared),
        overlay: ExitOverlay::new(),
        position: None,
        realised_pnl: Decimal::ZERO,
        last_signal: None,
        candles_seen: 0,
        orders_rejected_by_risk: 0,
        status: WorkerStatus::Initializing,
    };

    let join = tokio::spawn(worker.run(commands_rx));
    Ok(StrategyHandle {
        shared,
        commands: commands_tx,
        client,
        join: Mutex::new(Some(join)),
    })
}

struct OpenPosition {
    position: Position,
    entry_time: DateTime<Utc>,
}

/// Per-strategy worker: pulls candles from its feed, evaluates the exit
/// overlay and strategy signals, and trades through its exchange client.
struct StrategyWorker {
    id: StrategyWorkerId,
    request: StrategyRequest,
    strategy: Box<dyn Strategy>,
    feed: Box<dyn CandleFeed>,
    series: Series,
    indicators: Arc<IndicatorManager>,
    client: Arc<dyn ExchangeClient>,
    manager: ManagerHandle,
    shared: Arc<RwLock<StrategyWorkerState>>,
    overlay: ExitOverlay,
    position: Option<OpenPosition>,
    realised_pnl: Decimal,
    last_signal: Option<Signal>,
    candles_seen: u64,
    orders_rejected_by_risk: u64,
    status: WorkerStatus,
}

impl StrategyWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<WorkerCommand>) {
        self.status = WorkerStatus::Running;
        self.publish();
        info!(id = %self.id, strategy = %self.strategy.metadata().name, "strategy worker running");

        let mut interval = tokio::time::interval(DEFAULT_TICK);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(WorkerCommand::Pause) => {
                        if self.status == WorkerStatus::Running {
                            self.status = WorkerStatus::Paused;
                            self.publish();
                        }
                    }
                    Some(WorkerCommand::Resume) => {
                        if self.status == WorkerStatus::Paused {
                            self.status = WorkerStatus::Running;
                            self.publish();
                        }
                    }
                    Some(WorkerCommand::Stop { cancel_orders, respond }) => {
                        let report = self.stop(cancel_orders).await;
                        let _ = respond.send(report);
                        return;
                    }
                    None => {
                        let _ = self.stop(true).await;
                        return;
                    }
                },
                _ = interval.tick() => {
                    if self.status == WorkerStatus::Running {
                        match self.drain_feed().await {
                            Ok(()) => {}
                            // The manager is about to deliver a stop command.
                            Err(EngineError::KillSwitchActive) => {}
                            Err(error) => {
                                self.fail(error);
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Consume every candle the feed currently has.
    async fn drain_feed(&mut self) -> Result<(), EngineError> {
        let result = self.drain_feed_inner().await;
        self.publish();
        result
    }

    async fn drain_feed_inner(&mut self) -> Result<(), EngineError> {
        while let Some(candle) = self.feed.next() {
            self.series.push(candle);
            self.candles_seen += 1;
            let index = self.series.len() - 1;

            self.strategy
                .populate_indicators(&mut self.series, &self.indicators)?;

            if self.position.is_some() {
                self.evaluate_exit(index).await?;
            } else {
                self.evaluate_entry(index).await?;
            }
        }
        Ok(())
    }

    async fn evaluate_entry(&mut self, index: usize) -> Result<(), EngineError> {
        let signal = match self.strategy.entry_signal(&self.series, index) {
            Ok(signal) => signal,
            // No signal until the startup window has passed.
            Err(EngineError::InsufficientHistory { .. }) => None,
            Err(error) => return Err(error),
        };
        let Some(signal) = signal.filter(|signal| signal.kind.is_entry()) else {
            return Ok(());
        };
        self.last_signal = Some(signal.clone());

        let balance = self.quote_balance().await?;
        let quantity = self.strategy.position_size(&signal, balance);
        if quantity <= Decimal::ZERO {
            return Ok(());
        }

        let Some(order) = self.submit_market(signal.side, quantity, false).await? else {
            return Ok(());
        };

        let filled = order.filled_quantity;
        if filled <= Decimal::ZERO {
            return Ok(());
        }
        let fill_price = order.avg_fill_price.unwrap_or(signal.price);
        let mut position = Position::new_flat(self.request.pair.clone());
        position.apply_fill(signal.side, filled, fill_price);
        let entry_time = self
            .series
            .candle(index)
            .map(|candle| candle.time)
            .unwrap_or_else(Utc::now);
        self.position = Some(OpenPosition {
            position,
            entry_time,
        });
        self.overlay.reset();
        Ok(())
    }

    async fn evaluate_exit(&mut self, index: usize) -> Result<(), EngineError> {
        let Some(open) = self.position.as_ref() else {
            return Ok(());
        };
        let Some(candle) = self.series.candle(index).copied() else {
            return Ok(());
        };

        let elapsed_minutes = (candle.time - open.entry_time).num_minutes();
        let metadata = self.strategy.metadata().clone();

        let mut reason = self
            .overlay
            .check(&metadata, &open.position, candle.close, elapsed_minutes);
        if reason.is_none() {
            reason = match self
                .strategy
                .exit_signal(&self.series, index, &open.position)
            {
                Ok(signal) => {
                    if let Some(signal) = signal.as_ref() {
                        self.last_signal = Some(signal.clone());
                    }
                    signal
                        .filter(|signal| !signal.kind.is_entry())
                        .map(|_| ExitReason::Signal)
                }
                Err(EngineError::InsufficientHistory { .. }) => None,
                Err(error) => return Err(error),
            };
        }

        let Some(reason) = reason else {
            return Ok(());
        };

        let open = self.position.take().expect("open position is present");
        let closing_side = if open.position.is_long() {
            Side::Sell
        } else {
            Side::Buy
        };
        let quantity = open.position.size.abs();

        match self.submit_market(closing_side, quantity, true).await? {
            Some(order) => {
                let fill_price = order.avg_fill_price.unwrap_or(candle.close);
                let mut position = open.position;
                let realised = position.apply_fill(closing_side, quantity, fill_price);
                self.realised_pnl += realised;
                self.manager.risk.record_realised(realised);
                self.overlay.reset();
                info!(id = %self.id, %reason, %realised, "position closed");
            }
            // Risk-rejected close: the position stays open for the next tick.
            None => {
                self.position = Some(open);
            }
        }
        Ok(())
    }

    /// Kill-switch- and risk-gated market order. `None` means the submission
    /// was rejected by risk and counted.
    async fn submit_market(
        &mut self,
        side: Side,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<Option<Order>, EngineError> {
        self.manager.guard_submission()?;

        if let Err(error) = self.manager.risk.check_submission() {
            self.orders_rejected_by_risk += 1;
            metric::record_order_rejected_by_risk();
            self.manager.alerts.raise(
                AlertLevel::Info,
                "strategy order rejected by risk",
                format!("strategy {}: {error}", self.id),
                "strategy",
            );
            return Ok(None);
        }

        let mut request = OrderRequest::market(self.request.pair.clone(), side, quantity);
        request.reduce_only = reduce_only;

        let client = Arc::clone(&self.client);
        let order = crate::worker::with_backoff("submit_order", || {
            let client = Arc::clone(&client);
            let request = request.clone();
            async move { client.submit_order(request).await }
        })
        .await?;

        metric::record_order_submitted("strategy");
        Ok(Some(order))
    }

    async fn quote_balance(&self) -> Result<Decimal, EngineError> {
        let balances = self.client.balances().await?;
        Ok(balances
            .iter()
            .find(|balance| balance.asset == self.request.pair.quote)
            .map(|balance| balance.balance.free)
            .unwrap_or(Decimal::ZERO))
    }

    /// Cancel open orders on this worker's pair and terminate.
    async fn stop(&mut self, cancel_orders: bool) -> StopReport {
        self.status = WorkerStatus::Stopping;
        self.publish();

        let mut report = StopReport::default();
        if cancel_orders {
            let deadline = Instant::now() + STOP_DEADLINE;
            let open = self
                .client
                .open_orders(Some(&self.request.pair))
                .await
                .unwrap_or_default();

            for order in open {
                if Instant::now() >= deadline {
                    warn!(id = %self.id, "stop deadline reached with orders still active");
                    report.orders_failed += 1;
                    continue;
                }
                match tokio::time::timeout(CANCEL_TIMEOUT, self.client.cancel_order(&order.cid))
                    .await
                {
                    Ok(Ok(_)) => report.orders_cancelled += 1,
                    Ok(Err(error)) => {
                        warn!(id = %self.id, cid = %order.cid, %error, "order cancellation failed");
                        report.orders_failed += 1;
                    }
                    Err(_) => {
                        warn!(id = %self.id, cid = %order.cid, "order cancellation timed out");
                        report.orders_failed += 1;
                    }
                }
            }
        }

        self.status = WorkerStatus::Stopped;
        self.publish();
        info!(
            id = %self.id,
            cancelled = report.orders_cancelled,
            failed = report.orders_failed,
            "strategy worker stopped"
        );
        report
    }

    fn fail(&mut self, error: EngineError) {
        error!(id = %self.id, %error, "strategy worker failed");
        self.manager.alerts.raise(
            AlertLevel::Critical,
            "strategy worker failed",
            format!("strategy {}: {error}", self.id),
            "strategy",
        );
        self.status = WorkerStatus::Failed;
        self.publish();
    }

    fn publish(&self) {
        let mut shared = self.shared.write();
        shared.status = self.status;
        shared.candles_seen = self.candles_seen;
        shared.last_signal = self.last_signal.clone();
        shared.position = self
            .position
            .as_ref()
            .map(|open| open.position.size)
            .unwrap_or(Decimal::ZERO);
        shared.entry_price = self
            .position
            .as_ref()
            .map(|open| open.position.entry_price);
        shared.realised_pnl = self.realised_pnl;
        shared.orders_rejected_by_risk = self.orders_rejected_by_risk;
    }
}
