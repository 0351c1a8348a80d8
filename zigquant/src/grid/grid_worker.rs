use crate::{
    error::EngineError,
    grid::{FifoInventory, GridConfig, GridOrder, GridState},
    id::GridId,
    metric,
    worker::{
        CANCEL_TIMEOUT, ManagerHandle, STOP_DEADLINE, StopReport, WorkerCommand, WorkerStatus,
        with_backoff,
    },
};
use fnv::FnvHashSet;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use zigquant_execution::{
    client::{ExchangeClient, OrderUpdate, OrderUpdateKind},
    order::{OrderRequest, id::ClientOrderId, id::FillId},
};
use zigquant_instrument::Side;
use zigquant_risk::alert::AlertLevel;

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Manager-side handle to a running grid worker.
#[derive(Debug)]
pub struct GridHandle {
    pub(crate) shared: Arc<RwLock<GridState>>,
    pub(crate) commands: mpsc::Sender<WorkerCommand>,
    pub(crate) client: Arc<dyn ExchangeClient>,
    pub(crate) join: Mutex<Option<JoinHandle<()>>>,
}

impl GridHandle {
    pub fn snapshot(&self) -> GridState {
        self.shared.read().clone()
    }

    pub(crate) async fn send(&self, command: WorkerCommand) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| EngineError::Internal("grid worker command channel closed".to_string()))
    }

    /// Stop the worker and await its drain report.
    pub(crate) async fn stop(&self, cancel_orders: bool) -> Result<StopReport, EngineError> {
        let (respond, report) = oneshot::channel();
        self.send(WorkerCommand::Stop {
            cancel_orders,
            respond,
        })
        .await?;

        let report = tokio::time::timeout(STOP_DEADLINE + Duration::from_secs(5), report)
            .await
            .map_err(|_| EngineError::Timeout("grid worker stop".to_string()))?
            .unwrap_or_default();

        if let Some(join) = self.join.lock().take() {
            join.abort();
        }
        Ok(report)
    }
}

/// Spawn a grid worker onto the runtime.
pub(crate) fn spawn(
    id: GridId,
    config: GridConfig,
    client: Arc<dyn ExchangeClient>,
    manager: ManagerHandle,
) -> GridHandle {
    let shared = Arc::new(RwLock::new(GridState::new(id.clone())));
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let worker = GridWorker {
        id,
        config,
        client: Arc::clone(&client),
        manager,
        shared: Arc::clone(&shared),
        active: IndexMap::new(),
        inventory: FifoInventory::new(),
        seen_fills: FnvHashSet::default(),
        status: WorkerStatus::Initializing,
        last_price: None,
        realised_pnl: Decimal::ZERO,
        total_fees: Decimal::ZERO,
        total_trades: 0,
        winning_trades: 0,
        orders_rejected_by_risk: 0,
    };

    let join = tokio::spawn(worker.run(commands_rx));
    GridHandle {
        shared,
        commands: commands_tx,
        client,
        join: Mutex::new(Some(join)),
    }
}

/// Per-grid worker: owns its state exclusively and publishes copy-on-write
/// snapshots at the end of each tick.
struct GridWorker {
    id: GridId,
    config: GridConfig,
    client: Arc<dyn ExchangeClient>,
    manager: ManagerHandle,
    shared: Arc<RwLock<GridState>>,
    active: IndexMap<ClientOrderId, GridOrder>,
    inventory: FifoInventory,
    seen_fills: FnvHashSet<FillId>,
    status: WorkerStatus,
    last_price: Option<Decimal>,
    realised_pnl: Decimal,
    total_fees: Decimal,
    total_trades: u64,
    winning_trades: u64,
    orders_rejected_by_risk: u64,
}

impl GridWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<WorkerCommand>) {
        let mut updates = self.client.subscribe_order_updates();

        if let Err(error) = self.initialise().await {
            error!(id = %self.id, %error, "grid initialisation failed");
            self.manager.alerts.raise(
                AlertLevel::Critical,
                "grid initialisation failed",
                format!("grid {}: {error}", self.id),
                "grid",
            );
            self.status = WorkerStatus::Failed;
            self.publish();
            return;
        }

        self.status = WorkerStatus::Running;
        self.publish();
        info!(id = %self.id, orders = self.active.len(), "grid running");

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.check_interval_ms));
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
                    // Manager dropped the handle: drain and terminate.
                    None => {
                        let _ = self.stop(true).await;
                        return;
                    }
                },
                update = updates.recv() => match update {
                    Ok(update) => match self.handle_update(update).await {
                        Ok(()) => {}
                        // The manager is about to deliver a stop command.
                        Err(EngineError::KillSwitchActive) => {}
                        Err(error) => {
                            self.fail(error);
                            return;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(id = %self.id, missed, "grid order update stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.fail(EngineError::ExchangePermanent(
                            "order update stream closed".to_string(),
                        ));
                        return;
                    }
                },
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    /// Query the book, compute the level ladder and place the opening orders.
    async fn initialise(&mut self) -> Result<(), EngineError> {
        self.config.validate()?;

        let pair = self.config.pair.clone();
        let client = Arc::clone(&self.client);
        let quote = with_backoff("best_bid_ask", || {
            let client = Arc::clone(&client);
            let pair = pair.clone();
            async move { client.best_bid_ask(&pair).await }
        })
        .await?;

        let mid = quote.mid();
        self.last_price = Some(mid);

        for (index, level) in self.config.levels().into_iter().enumerate() {
            // No order at a level equal to the mid.
            let side = if level < mid {
                Side::Buy
            } else if level > mid {
                Side::Sell
            } else {
                continue;
            };

            self.submit_grid_order(Some(index), side, level, self.config.order_size)
                .await?;
        }
        Ok(())
    }

    /// Risk-gated limit order submission; records the order into the active map.
    ///
    /// A risk rejection increments `orders_rejected_by_risk` and is not
    /// retried within the tick.
    async fn submit_grid_order(
        &mut self,
        level: Option<usize>,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Result<(), EngineError> {
        self.manager.guard_submission()?;

        if self.config.risk_checks_enabled
            && let Err(error) = self.manager.risk.check_submission()
        {
            self.orders_rejected_by_risk += 1;
            metric::record_order_rejected_by_risk();
            self.manager.alerts.raise(
                AlertLevel::Info,
                "grid order rejected by risk",
                format!("grid {}: {error}", self.id),
                "grid",
            );
            return Ok(());
        }

        let request = OrderRequest::limit(self.config.pair.clone(), side, price, quantity);
        let client = Arc::clone(&self.client);
        let order = with_backoff("submit_order", || {
            let client = Arc::clone(&client);
            let request = request.clone();
            async move { client.submit_order(request).await }
        })
        .await?;

        metric::record_order_submitted("grid");
        if order.status.is_active() {
            self.active.insert(
                order.cid.clone(),
                GridOrder {
                    cid: order.cid.clone(),
                    level,
                    side,
                    price,
                    quantity,
                },
            );
        }
        Ok(())
    }

    async fn handle_update(&mut self, update: OrderUpdate) -> Result<(), EngineError> {
        let Some(order) = self.active.get(&update.cid).cloned() else {
            return Ok(());
        };

        match update.kind {
            OrderUpdateKind::Fill(fill) => {
                // Duplicate deliveries are discarded by fill id.
                if !self.seen_fills.insert(fill.id.clone()) {
                    return Ok(());
                }

                let realised = self
                    .inventory
                    .apply_fill(order.side, fill.quantity, fill.price);
                self.realised_pnl += realised;
                self.total_fees += fill.fee;
                self.total_trades += 1;
                if realised > Decimal::ZERO {
                    self.winning_trades += 1;
                }
                self.manager.risk.record_realised(realised);

                let remaining = order.quantity - fill.quantity;
                if remaining > Decimal::ZERO {
                    // Partially filled: the rest keeps resting.
                    if let Some(active) = self.active.get_mut(&update.cid) {
                        active.quantity = remaining;
                    }
                    self.publish();
                    return Ok(());
                }

                self.active.shift_remove(&update.cid);

                if self.status == WorkerStatus::Running {
                    self.place_replacement(&order, fill.quantity).await?;
                }
                self.publish();
            }
            OrderUpdateKind::StatusChange(status) if status.is_final() => {
                self.active.shift_remove(&update.cid);
                self.publish();
            }
            OrderUpdateKind::StatusChange(_) => {}
        }
        Ok(())
    }

    /// Opposite-side take-profit replacement for a filled grid order.
    async fn place_replacement(
        &mut self,
        filled: &GridOrder,
        quantity: Decimal,
    ) -> Result<(), EngineError> {
        let side = filled.side.inverse();

        // A replacement that would grow a capped position is suppressed;
        // resting orders on the other side continue normally.
        let position = self.inventory.position();
        let increases_magnitude = match side {
            Side::Buy => position >= Decimal::ZERO,
            Side::Sell => position <= Decimal::ZERO,
        };
        if position.abs() >= self.config.max_position && increases_magnitude {
            info!(
                id = %self.id,
                %position,
                "replacement suppressed at max position"
            );
            return Ok(());
        }

        let price = self.config.replacement_price(filled.side, filled.price);
        self.submit_grid_order(None, side, price, quantity).await
    }

    async fn tick(&mut self) {
        if self.status != WorkerStatus::Running && self.status != WorkerStatus::Paused {
            return;
        }

        // Best-effort mark refresh; transient failures wait for the next tick.
        if let Ok(quote) = self.client.best_bid_ask(&self.config.pair).await {
            self.last_price = Some(quote.mid());
        }
        metric::record_exchange_connected(self.client.is_connected());
        self.publish();
    }

    /// Cancel every active order within the stop deadlines and terminate.
    async fn stop(&mut self, cancel_orders: bool) -> StopReport {
        self.status = WorkerStatus::Stopping;
        self.publish();

        let mut report = StopReport::default();
        if cancel_orders {
            let deadline = Instant::now() + STOP_DEADLINE;
            let cids: Vec<ClientOrderId> = self.active.keys().cloned().collect();

            for cid in cids {
                if Instant::now() >= deadline {
                    let remaining = self.active.len() as u64;
                    warn!(
                        id = %self.id,
                        remaining,
                        "stop deadline reached with orders still active"
                    );
                    report.orders_failed += remaining;
                    break;
                }

                match tokio::time::timeout(CANCEL_TIMEOUT, self.client.cancel_order(&cid)).await {
                    Ok(Ok(_)) => {
                        report.orders_cancelled += 1;
                        self.active.shift_remove(&cid);
                    }
                    Ok(Err(error)) => {
                        // Collected, not raised: the worker still terminates.
                        warn!(id = %self.id, %cid, %error, "order cancellation failed");
                        report.orders_failed += 1;
                        self.active.shift_remove(&cid);
                    }
                    Err(_) => {
                        warn!(id = %self.id, %cid, "order cancellation timed out");
                        report.orders_failed += 1;
                        self.active.shift_remove(&cid);
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
            "grid stopped"
        );
        report
    }

    fn fail(&mut self, error: EngineError) {
        error!(id = %self.id, %error, "grid worker failed");
        self.manager.alerts.raise(
            AlertLevel::Critical,
            "grid worker failed",
            format!("grid {}: {error}", self.id),
            "grid",
        );
        self.status = WorkerStatus::Failed;
        self.publish();
    }

    /// Publish a copy-on-write snapshot; readers never block this worker
    /// beyond the brief write below.
    fn publish(&self) {
        let unrealised = self
            .last_price
            .map(|price| self.inventory.unrealised(price))
            .unwrap_or(Decimal::ZERO);

        let mut shared = self.shared.write();
        shared.status = self.status;
        shared.last_price = self.last_price;
        shared.active_orders = self.active.values().cloned().collect();
        shared.position = self.inventory.position();
        shared.realised_pnl = self.realised_pnl;
        shared.unrealised_pnl = unrealised;
        shared.total_trades = self.total_trades;
        shared.winning_trades = self.winning_trades;
        shared.total_fees = self.total_fees;
        shared.orders_rejected_by_risk = self.orders_rejected_by_risk;
    }
}
