use rust_decimal_macros::dec;
use std::{sync::Arc, time::Duration};
use zigquant::{
    config::EngineConfig,
    data::InMemoryCandleFeed,
    engine::{EngineManager, HealthStatus},
    error::EngineError,
    grid::{GridConfig, TradingMode},
    id::{BacktestId, GridId, StrategyWorkerId},
    strategy::registry::StrategyRequest,
    worker::WorkerStatus,
};
use zigquant_execution::{
    client::ExchangeClient,
    order::OrderRequest,
    paper::{PaperConfig, PaperExchange},
};
use zigquant_instrument::{Side, candle::Timeframe, pair::TradingPair};

fn pair() -> TradingPair {
    TradingPair::new("BTC", "USDT")
}

fn grid_config() -> GridConfig {
    GridConfig {
        pair: pair(),
        lower_price: dec!(90),
        upper_price: dec!(100),
        grid_count: 11,
        order_size: dec!(1),
        take_profit_pct: dec!(0.01),
        max_position: dec!(10),
        check_interval_ms: 20,
        mode: TradingMode::Paper,
        risk_checks_enabled: true,
    }
}

async fn wait_for_grid_running(manager: &EngineManager, id: &GridId) {
    for _ in 0..500 {
        if manager.grid_status(id).unwrap() == WorkerStatus::Running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("grid {id} never reached Running");
}

async fn wait_for_strategy_running(manager: &EngineManager, id: &StrategyWorkerId) {
    for _ in 0..500 {
        if manager.strategy_status(id).unwrap() == WorkerStatus::Running {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("strategy {id} never reached Running");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_kill_switch_propagation() {
    let manager = EngineManager::new(&EngineConfig::default());

    // Grid A: 11 levels around mid 95 leaves 10 resting orders.
    let grid_exchange = Arc::new(PaperExchange::new(PaperConfig::default()));
    grid_exchange.set_quote(pair(), dec!(94.9), dec!(95.1));
    manager
        .start_grid(
            GridId::new("A"),
            grid_config(),
            Arc::clone(&grid_exchange) as Arc<dyn ExchangeClient>,
        )
        .unwrap();
    wait_for_grid_running(&manager, &GridId::new("A")).await;
    assert_eq!(manager.grid_orders(&GridId::new("A")).unwrap().len(), 10);

    // Strategy B: its venue carries 2 resting orders on its pair.
    let strategy_exchange = Arc::new(PaperExchange::new(PaperConfig::default()));
    strategy_exchange.set_quote(pair(), dec!(94.9), dec!(95.1));
    for price in [dec!(80), dec!(81)] {
        strategy_exchange
            .submit_order(OrderRequest::limit(pair(), Side::Buy, price, dec!(1)))
            .await
            .unwrap();
    }
    manager
        .start_strategy(
            StrategyWorkerId::new("B"),
            StrategyRequest::new("dual_ma", pair(), Timeframe::M1),
            Box::new(InMemoryCandleFeed::new(Vec::new())),
            Arc::clone(&strategy_exchange) as Arc<dyn ExchangeClient>,
        )
        .unwrap();
    wait_for_strategy_running(&manager, &StrategyWorkerId::new("B")).await;

    let report = manager.activate_kill_switch("test", true, false).await;
    assert_eq!(report.grids_stopped, 1);
    assert_eq!(report.strategies_stopped, 1);
    assert_eq!(report.orders_cancelled, 12);
    assert_eq!(report.positions_closed, 0);

    // No order survived on either venue.
    assert!(grid_exchange.open_orders(None).await.unwrap().is_empty());
    assert!(strategy_exchange.open_orders(None).await.unwrap().is_empty());

    // New trading starts refuse while the switch is active.
    let refused = manager.start_grid(
        GridId::new("C"),
        grid_config(),
        Arc::new(PaperExchange::new(PaperConfig::default())),
    );
    assert!(matches!(refused, Err(EngineError::KillSwitchActive)));

    let refused_strategy = manager.start_strategy(
        StrategyWorkerId::new("D"),
        StrategyRequest::new("dual_ma", pair(), Timeframe::M1),
        Box::new(InMemoryCandleFeed::new(Vec::new())),
        Arc::new(PaperExchange::new(PaperConfig::default())),
    );
    assert!(matches!(
        refused_strategy,
        Err(EngineError::KillSwitchActive)
    ));

    let health = manager.system_health();
    assert_eq!(health.status, HealthStatus::Emergency);
    assert!(health.alerts.critical >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_kill_switch_closes_positions_when_asked() {
    let manager = EngineManager::new(&EngineConfig::default());

    let exchange = Arc::new(PaperExchange::new(PaperConfig::default()));
    exchange.set_quote(pair(), dec!(94.9), dec!(95.1));

    // Open a position on the venue before the drill.
    exchange
        .submit_order(OrderRequest::market(pair(), Side::Buy, dec!(2)))
        .await
        .unwrap();
    assert_eq!(exchange.positions().await.unwrap().len(), 1);

    manager
        .start_grid(
            GridId::new("A"),
            grid_config(),
            Arc::clone(&exchange) as Arc<dyn ExchangeClient>,
        )
        .unwrap();
    wait_for_grid_running(&manager, &GridId::new("A")).await;

    let report = manager.activate_kill_switch("liquidate", true, true).await;
    assert_eq!(report.grids_stopped, 1);
    assert_eq!(report.positions_closed, 1);
    assert!(exchange.positions().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_deactivation_allows_new_starts() {
    let manager = EngineManager::new(&EngineConfig::default());
    manager.activate_kill_switch("drill", true, false).await;

    // Backtests refuse while active (default risk configuration).
    let refused = manager.start_backtest(
        BacktestId::new("bt"),
        zigquant::backtest::BacktestRequest::new(
            StrategyRequest::new("dual_ma", pair(), Timeframe::M1),
            dec!(10_000),
        ),
        Vec::new(),
    );
    assert!(matches!(refused, Err(EngineError::KillSwitchActive)));

    manager.deactivate_kill_switch();

    let exchange = Arc::new(PaperExchange::new(PaperConfig::default()));
    exchange.set_quote(pair(), dec!(94.9), dec!(95.1));
    manager
        .start_grid(GridId::new("after"), grid_config(), exchange)
        .unwrap();
    wait_for_grid_running(&manager, &GridId::new("after")).await;

    manager.stop_grid(&GridId::new("after")).await.unwrap();
    assert_eq!(manager.system_health().status, HealthStatus::Healthy);
}
