use crate::{
    backtest::{self, BacktestHandle, BacktestJobState, BacktestOutcome, BacktestRequest,
        summary::BacktestResult},
    config::EngineConfig,
    data::CandleFeed,
    error::EngineError,
    grid::{GridConfig, GridOrder, GridState, GridStats, grid_worker, grid_worker::GridHandle},
    id::{BacktestId, GridId, StrategyWorkerId},
    metric,
    risk::{KillSwitch, RiskGate},
    strategy::registry::StrategyRequest,
    strategy_worker::{self, StrategyHandle, StrategyWorkerState},
    worker::{ManagerHandle, StopReport, WorkerCommand, WorkerStatus},
};
use derive_more::Display;
use fnv::FnvHashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::Instant,
};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use zigquant_execution::{
    client::ExchangeClient,
    order::OrderRequest,
};
use zigquant_instrument::{Side, candle::Candle};
use zigquant_risk::alert::{AlertCounts, AlertLevel, AlertManager};
use zigquant_ta::manager::IndicatorManager;

/// Maximum backtests executing concurrently; excess jobs queue.
pub const BACKTEST_POOL_SIZE: usize = 4;

/// Aggregate engine condition.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Emergency,
}

/// Report of `system_health`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub running_grids: usize,
    pub running_strategies: usize,
    pub running_backtests: usize,
    pub kill_switch_active: bool,
    pub kill_switch_reason: Option<String>,
    pub uptime_seconds: u64,
    pub alerts: AlertCounts,
}

/// Counts returned by `activate_kill_switch`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct KillSwitchReport {
    pub grids_stopped: usize,
    pub strategies_stopped: usize,
    pub orders_cancelled: u64,
    pub positions_closed: usize,
}

/// Lifecycle owner of every grid worker, strategy worker and backtest job.
///
/// Registries follow a single reader-writer discipline: registrations and
/// removals take the writer lock, read-only queries the reader lock. The kill
/// switch is an atomic observed without locks.
#[derive(Debug)]
pub struct EngineManager {
    handle: ManagerHandle,
    indicators: Arc<IndicatorManager>,
    grids: RwLock<FnvHashMap<GridId, Arc<GridHandle>>>,
    strategies: RwLock<FnvHashMap<StrategyWorkerId, Arc<StrategyHandle>>>,
    backtests: RwLock<FnvHashMap<BacktestId, Arc<BacktestHandle>>>,
    backtest_pool: Arc<Semaphore>,
    started_at: Instant,
}

impl EngineManager {
    pub fn new(config: &EngineConfig) -> Self {
        let handle = ManagerHandle {
            kill_switch: Arc::new(KillSwitch::new()),
            alerts: Arc::new(config.alerts.build_manager()),
            risk: Arc::new(RiskGate::new(config.risk.clone())),
        };

        Self {
            handle,
            indicators: Arc::new(IndicatorManager::default()),
            grids: RwLock::new(FnvHashMap::default()),
            strategies: RwLock::new(FnvHashMap::default()),
            backtests: RwLock::new(FnvHashMap::default()),
            backtest_pool: Arc::new(Semaphore::new(BACKTEST_POOL_SIZE)),
            started_at: Instant::now(),
        }
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.handle.alerts
    }

    pub fn risk(&self) -> &RiskGate {
        &self.handle.risk
    }

    // ---------- grid operations ----------

    pub fn start_grid(
        &self,
        id: GridId,
        config: GridConfig,
        client: Arc<dyn ExchangeClient>,
    ) -> Result<(), EngineError> {
        metric::record_request("start_grid");
        if self.handle.kill_switch.is_active() {
            return Err(EngineError::KillSwitchActive);
        }
        config.validate()?;

        let mut grids = self.grids.write();
        if grids.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id.0));
        }

        info!(%id, pair = %config.pair, "starting grid");
        let handle = grid_worker::spawn(id.clone(), config, client, self.handle.clone());
        grids.insert(id, Arc::new(handle));
        Ok(())
    }

    pub async fn stop_grid(&self, id: &GridId) -> Result<StopReport, EngineError> {
        metric::record_request("stop_grid");
        let handle = self.grid_handle(id)?;

        let report = if handle.snapshot().status.is_terminal() {
            StopReport::default()
        } else {
            handle.stop(true).await?
        };

        self.grids.write().remove(id);
        Ok(report)
    }

    pub async fn pause_grid(&self, id: &GridId) -> Result<(), EngineError> {
        metric::record_request("pause_grid");
        self.grid_handle(id)?.send(WorkerCommand::Pause).await
    }

    pub async fn resume_grid(&self, id: &GridId) -> Result<(), EngineError> {
        metric::record_request("resume_grid");
        self.grid_handle(id)?.send(WorkerCommand::Resume).await
    }

    pub fn grid_status(&self, id: &GridId) -> Result<WorkerStatus, EngineError> {
        Ok(self.grid_handle(id)?.snapshot().status)
    }

    pub fn grid_stats(&self, id: &GridId) -> Result<GridStats, EngineError> {
        Ok(self.grid_handle(id)?.snapshot().stats())
    }

    pub fn grid_orders(&self, id: &GridId) -> Result<Vec<GridOrder>, EngineError> {
        Ok(self.grid_handle(id)?.snapshot().active_orders)
    }

    pub fn all_grids_summary(&self) -> Vec<GridState> {
        self.grids
            .read()
            .values()
            .map(|handle| handle.snapshot())
            .collect()
    }

    fn grid_handle(&self, id: &GridId) -> Result<Arc<GridHandle>, EngineError> {
        self.grids
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.0.clone()))
    }

    // ---------- strategy operations ----------

    pub fn start_strategy(
        &self,
        id: StrategyWorkerId,
        request: StrategyRequest,
        feed: Box<dyn CandleFeed>,
        client: Arc<dyn ExchangeClient>,
    ) -> Result<(), EngineError> {
        metric::record_request("start_strategy");
        if self.handle.kill_switch.is_active() {
            return Err(EngineError::KillSwitchActive);
        }

        let mut strategies = self.strategies.write();
        if strategies.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id.0));
        }

        info!(%id, strategy = %request.strategy, "starting strategy worker");
        let handle = strategy_worker::spawn(
            id.clone(),
            request,
            feed,
            client,
            Arc::clone(&self.indicators),
            self.handle.clone(),
        )?;
        strategies.insert(id, Arc::new(handle));
        Ok(())
    }

    pub async fn stop_strategy(&self, id: &StrategyWorkerId) -> Result<StopReport, EngineError> {
        metric::record_request("stop_strategy");
        let handle = self.strategy_handle(id)?;

        let report = if handle.snapshot().status.is_terminal() {
            StopReport::default()
        } else {
            handle.stop(true).await?
        };

        self.strategies.write().remove(id);
        Ok(report)
    }

    pub async fn pause_strategy(&self, id: &StrategyWorkerId) -> Result<(), EngineError> {
        metric::record_request("pause_strategy");
        self.strategy_handle(id)?.send(WorkerCommand::Pause).await
    }

    pub async fn resume_strategy(&self, id: &StrategyWorkerId) -> Result<(), EngineError> {
        metric::record_request("resume_strategy");
        self.strategy_handle(id)?.send(WorkerCommand::Resume).await
    }

    pub fn strategy_status(&self, id: &StrategyWorkerId) -> Result<WorkerStatus, EngineError> {
        Ok(self.strategy_handle(id)?.snapshot().status)
    }

    pub fn strategy_stats(&self, id: &StrategyWorkerId) -> Result<StrategyWorkerState, EngineError> {
        Ok(self.strategy_handle(id)?.snapshot())
    }

    pub fn all_strategies_summary(&self) -> Vec<StrategyWorkerState> {
        self.strategies
            .read()
            .values()
            .map(|handle| handle.snapshot())
            .collect()
    }

    fn strategy_handle(&self, id: &StrategyWorkerId) -> Result<Arc<StrategyHandle>, EngineError> {
        self.strategies
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.0.clone()))
    }

    // ---------- backtest operations ----------

    pub fn start_backtest(
        &self,
        id: BacktestId,
        request: BacktestRequest,
        candles: Vec<Candle>,
    ) -> Result<(), EngineError> {
        metric::record_request("start_backtest");
        if self.handle.kill_switch.is_active() && self.handle.risk.config().refuse_backtests_on_kill
        {
            return Err(EngineError::KillSwitchActive);
        }
        request.validate()?;

        let mut backtests = self.backtests.write();
        if backtests.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id.0));
        }

        let handle = Arc::new(BacktestHandle::new(id.clone()));
        backtests.insert(id.clone(), Arc::clone(&handle));
        drop(backtests);

        info!(%id, strategy = %request.strategy.strategy, candles = candles.len(), "backtest queued");
        let pool = Arc::clone(&self.backtest_pool);
        tokio::spawn(async move {
            let Ok(_permit) = pool.acquire().await else {
                handle.fail(EngineError::Internal("backtest pool closed".to_string()));
                return;
            };
            if handle.is_cancelled() {
                handle.cancel();
                return;
            }

            handle.mark_running();
            let worker_handle = Arc::clone(&handle);
            let outcome = tokio::task::spawn_blocking(move || {
                backtest::run(worker_handle.id(), &request, candles, &worker_handle)
            })
            .await;

            match outcome {
                Ok(Ok(BacktestOutcome::Completed(result))) => handle.complete(*result),
                Ok(Ok(BacktestOutcome::Cancelled)) => handle.cancel(),
                Ok(Err(error)) => handle.fail(error),
                Err(join_error) => {
                    handle.fail(EngineError::Internal(format!(
                        "backtest worker panicked: {join_error}"
                    )));
                }
            }
        });
        Ok(())
    }

    pub fn cancel_backtest(&self, id: &BacktestId) -> Result<(), EngineError> {
        metric::record_request("cancel_backtest");
        let handle = self.backtest_handle(id)?;
        if handle.status().is_terminal() {
            return Err(EngineError::Validation(format!(
                "backtest {id} already {}",
                handle.status()
            )));
        }
        handle.request_cancel();
        Ok(())
    }

    pub fn backtest_progress(&self, id: &BacktestId) -> Result<BacktestJobState, EngineError> {
        Ok(self.backtest_handle(id)?.snapshot())
    }

    pub fn backtest_result(&self, id: &BacktestId) -> Result<BacktestResult, EngineError> {
        let handle = self.backtest_handle(id)?;
        handle.result().ok_or_else(|| {
            EngineError::Validation(format!("backtest {id} is {}", handle.status()))
        })
    }

    fn backtest_handle(&self, id: &BacktestId) -> Result<Arc<BacktestHandle>, EngineError> {
        self.backtests
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.0.clone()))
    }

    // ---------- kill switch & health ----------

    /// Tear down all live trading.
    ///
    /// Sets the sticky flag first (new submissions observe it immediately),
    /// then stops every worker, optionally market-closes open positions, and
    /// raises a critical alert carrying the counts.
    pub async fn activate_kill_switch(
        &self,
        reason: &str,
        cancel_orders: bool,
        close_positions: bool,
    ) -> KillSwitchReport {
        metric::record_request("activate_kill_switch");
        self.handle.kill_switch.activate(reason);

        let mut report = KillSwitchReport::default();

        let grids: Vec<Arc<GridHandle>> = self.grids.read().values().cloned().collect();
        for handle in &grids {
            if handle.snapshot().status.is_terminal() {
                continue;
            }
            match handle.stop(cancel_orders).await {
                Ok(stop) => {
                    report.grids_stopped += 1;
                    report.orders_cancelled += stop.orders_cancelled;
                }
                Err(error) => warn!(%error, "grid stop failed during kill switch"),
            }
        }

        let strategies: Vec<Arc<StrategyHandle>> =
            self.strategies.read().values().cloned().collect();
        for handle in &strategies {
            if handle.snapshot().status.is_terminal() {
                continue;
            }
            match handle.stop(cancel_orders).await {
                Ok(stop) => {
                    report.strategies_stopped += 1;
                    report.orders_cancelled += stop.orders_cancelled;
                }
                Err(error) => warn!(%error, "strategy stop failed during kill switch"),
            }
        }

        if close_positions {
            report.positions_closed = self.close_all_positions(&grids, &strategies).await;
        }

        self.handle.alerts.raise(
            AlertLevel::Critical,
            "kill switch activated",
            format!(
                "reason: {reason}; grids_stopped: {}, strategies_stopped: {}, \
                 orders_cancelled: {}, positions_closed: {}",
                report.grids_stopped,
                report.strategies_stopped,
                report.orders_cancelled,
                report.positions_closed
            ),
            "engine",
        );
        metric::record_alert("critical");
        report
    }

    pub fn deactivate_kill_switch(&self) {
        metric::record_request("deactivate_kill_switch");
        self.handle.kill_switch.deactivate();
        info!("kill switch deactivated");
    }

    /// Market-close every open position across the distinct exchange clients
    /// of the stopped workers.
    async fn close_all_positions(
        &self,
        grids: &[Arc<GridHandle>],
        strategies: &[Arc<StrategyHandle>],
    ) -> usize {
        let mut clients: Vec<Arc<dyn ExchangeClient>> = Vec::new();
        for client in grids
            .iter()
            .map(|handle| Arc::clone(&handle.client))
            .chain(strategies.iter().map(|handle| Arc::clone(&handle.client)))
        {
            if !clients.iter().any(|known| Arc::ptr_eq(known, &client)) {
                clients.push(client);
            }
        }

        let mut closed = 0;
        for client in clients {
            let positions = match client.positions().await {
                Ok(positions) => positions,
                Err(error) => {
                    warn!(%error, "position query failed during kill switch");
                    continue;
                }
            };

            for position in positions {
                let side = if position.is_long() {
                    Side::Sell
                } else {
                    Side::Buy
                };
                let mut request =
                    OrderRequest::market(position.pair.clone(), side, position.size.abs());
                request.reduce_only = true;

                match client.submit_order(request).await {
                    Ok(_) => closed += 1,
                    Err(error) => {
                        warn!(pair = %position.pair, %error, "position close failed");
                    }
                }
            }
        }
        closed
    }

    pub fn system_health(&self) -> SystemHealth {
        metric::record_request("system_health");

        let grids = self.all_grids_summary();
        let strategies = self.all_strategies_summary();
        let running_backtests = self
            .backtests
            .read()
            .values()
            .filter(|handle| !handle.status().is_terminal())
            .count();

        let running_grids = grids
            .iter()
            .filter(|state| state.status.is_running())
            .count();
        let running_strategies = strategies
            .iter()
            .filter(|state| state.status.is_running())
            .count();
        let any_failed = grids.iter().any(|state| state.status == WorkerStatus::Failed)
            || strategies
                .iter()
                .any(|state| state.status == WorkerStatus::Failed);

        let kill_switch_active = self.handle.kill_switch.is_active();
        let status = if kill_switch_active {
            HealthStatus::Emergency
        } else if any_failed {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        let uptime_seconds = self.started_at.elapsed().as_secs();
        metric::record_uptime(uptime_seconds as f64);
        metric::record_worker_counts(running_grids, running_strategies, running_backtests);
        metric::record_positions_count(
            grids
                .iter()
                .filter(|state| state.position != Decimal::ZERO)
                .count()
                + strategies
                    .iter()
                    .filter(|state| state.position != Decimal::ZERO)
                    .count(),
        );

        SystemHealth {
            status,
            running_grids,
            running_strategies,
            running_backtests,
            kill_switch_active,
            kill_switch_reason: self.handle.kill_switch.reason(),
            uptime_seconds,
            alerts: self.handle.alerts.counts(),
        }
    }

    /// Graceful engine teardown: stop every worker and cancel queued backtests.
    pub async fn shutdown(&self) {
        info!("engine shutting down");

        let grid_ids: Vec<GridId> = self.grids.read().keys().cloned().collect();
        for id in grid_ids {
            if let Err(error) = self.stop_grid(&id).await {
                warn!(%id, %error, "grid stop failed during shutdown");
            }
        }

        let strategy_ids: Vec<StrategyWorkerId> =
            self.strategies.read().keys().cloned().collect();
        for id in strategy_ids {
            if let Err(error) = self.stop_strategy(&id).await {
                warn!(%id, %error, "strategy stop failed during shutdown");
            }
        }

        let backtest_handles: Vec<Arc<BacktestHandle>> =
            self.backtests.read().values().cloned().collect();
        for handle in backtest_handles {
            if !handle.status().is_terminal() {
                handle.request_cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backtest::BacktestStatus, test_utils::candles_with_closes};
    use rust_decimal_macros::dec;
    use zigquant_execution::paper::{PaperConfig, PaperExchange};
    use zigquant_instrument::{candle::Timeframe, pair::TradingPair};

    fn manager() -> EngineManager {
        EngineManager::new(&EngineConfig::default())
    }

    fn backtest_request() -> BacktestRequest {
        BacktestRequest::new(
            StrategyRequest::new("dual_ma", TradingPair::new("BTC", "USDT"), Timeframe::M1),
            dec!(10_000),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_duplicate_backtest_id_rejected() {
        let manager = manager();
        let candles = candles_with_closes(&vec![dec!(100); 50]);

        manager
            .start_backtest(BacktestId::new("bt"), backtest_request(), candles.clone())
            .unwrap();
        let duplicate =
            manager.start_backtest(BacktestId::new("bt"), backtest_request(), candles);
        assert!(matches!(duplicate, Err(EngineError::AlreadyExists(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_backtest_completes_and_result_readable() {
        let manager = manager();
        let id = BacktestId::new("bt-complete");
        manager
            .start_backtest(
                id.clone(),
                backtest_request(),
                candles_with_closes(&vec![dec!(100); 200]),
            )
            .unwrap();

        for _ in 0..600 {
            if manager.backtest_progress(&id).unwrap().status == BacktestStatus::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let result = manager.backtest_result(&id).unwrap();
        assert_eq!(result.metrics.total_trades, 0);
        assert!((manager.backtest_progress(&id).unwrap().progress - 1.0).abs() < 1e-9);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_ids_not_found() {
        let manager = manager();
        assert!(matches!(
            manager.grid_status(&GridId::new("missing")),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            manager.backtest_result(&BacktestId::new("missing")),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            manager.stop_strategy(&StrategyWorkerId::new("missing")).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_health_reflects_kill_switch() {
        let manager = manager();
        assert_eq!(manager.system_health().status, HealthStatus::Healthy);

        manager.activate_kill_switch("drill", true, false).await;
        let health = manager.system_health();
        assert_eq!(health.status, HealthStatus::Emergency);
        assert!(health.kill_switch_active);
        assert_eq!(health.kill_switch_reason.as_deref(), Some("drill"));

        // Starts refuse while active.
        let refused = manager.start_grid(
            GridId::new("refused"),
            crate::grid::GridConfig {
                pair: TradingPair::new("BTC", "USDT"),
                lower_price: dec!(90),
                upper_price: dec!(100),
                grid_count: 11,
                order_size: dec!(1),
                take_profit_pct: dec!(0.01),
                max_position: dec!(10),
                check_interval_ms: 50,
                mode: crate::grid::TradingMode::Paper,
                risk_checks_enabled: true,
            },
            Arc::new(PaperExchange::new(PaperConfig::default())),
        );
        assert!(matches!(refused, Err(EngineError::KillSwitchActive)));

        manager.deactivate_kill_switch();
        assert_eq!(manager.system_health().status, HealthStatus::Healthy);
    }
}
