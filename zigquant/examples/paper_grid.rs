use rust_decimal_macros::dec;
use std::{sync::Arc, time::Duration};
use zigquant::{
    config::EngineConfig,
    engine::EngineManager,
    grid::{GridConfig, TradingMode},
    id::GridId,
    logging::init_logging,
};
use zigquant_execution::paper::{PaperConfig, PaperExchange};
use zigquant_instrument::pair::TradingPair;

#[tokio::main]
async fn main() {
    init_logging();

    let pair = TradingPair::new("BTC", "USDT");
    let exchange = Arc::new(PaperExchange::new(PaperConfig::default()));
    exchange.set_quote(pair.clone(), dec!(94.9), dec!(95.1));

    let manager = EngineManager::new(&EngineConfig::default());
    manager
        .start_grid(
            GridId::new("demo"),
            GridConfig {
                pair: pair.clone(),
                lower_price: dec!(90),
                upper_price: dec!(100),
                grid_count: 11,
                order_size: dec!(1),
                take_profit_pct: dec!(0.01),
                max_position: dec!(10),
                check_interval_ms: 200,
                mode: TradingMode::Paper,
                risk_checks_enabled: true,
            },
            exchange.clone(),
        )
        .expect("grid starts");

    // Walk the quote through the ladder and let the grid replace fills.
    for (bid, ask) in [
        (dec!(93.8), dec!(94.0)),
        (dec!(94.94), dec!(95.0)),
        (dec!(96.0), dec!(96.1)),
        (dec!(94.95), dec!(95.04)),
    ] {
        tokio::time::sleep(Duration::from_millis(400)).await;
        exchange.set_quote(pair.clone(), bid, ask);
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    let stats = manager.grid_stats(&GridId::new("demo")).expect("grid stats");
    println!("position:      {}", stats.position);
    println!("realised pnl:  {}", stats.realised_pnl);
    println!("total trades:  {}", stats.total_trades);
    println!("active orders: {}", stats.active_orders);

    let report = manager.stop_grid(&GridId::new("demo")).await.expect("grid stops");
    println!("cancelled {} orders on shutdown", report.orders_cancelled);
}
