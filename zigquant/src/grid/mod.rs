use crate::{error::EngineError, id::GridId, worker::WorkerStatus};
use chrono::{DateTime, Utc};
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use zigquant_execution::order::id::ClientOrderId;
use zigquant_instrument::{Side, pair::TradingPair};

/// Grid worker task.
pub mod grid_worker;

/// Venue a worker trades against.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Paper,
    Testnet,
    Mainnet,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paper
    }
}

fn default_check_interval_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

/// Grid trading configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GridConfig {
    pub pair: TradingPair,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    /// Number of equally spaced price levels across the bounds.
    pub grid_count: usize,
    /// Base units per level order.
    pub order_size: Decimal,
    /// Replacement take-profit distance, eg/ 0.01 re-sells a filled buy 1% higher.
    pub take_profit_pct: Decimal,
    /// Signed position magnitude beyond which magnitude-increasing orders are
    /// suppressed.
    pub max_position: Decimal,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default)]
    pub mode: TradingMode,
    #[serde(default = "default_true")]
    pub risk_checks_enabled: bool,
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.lower_price <= Decimal::ZERO || self.upper_price <= self.lower_price {
            return Err(EngineError::Validation(format!(
                "grid bounds must satisfy 0 < lower ({}) < upper ({})",
                self.lower_price, self.upper_price
            )));
        }
        if self.grid_count < 2 {
            return Err(EngineError::Validation(format!(
                "grid count {} must be at least 2",
                self.grid_count
            )));
        }
        if self.order_size <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "grid order size must be positive".to_string(),
            ));
        }
        if self.take_profit_pct <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "grid take profit must be positive".to_string(),
            ));
        }
        if self.max_position <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "grid max position must be positive".to_string(),
            ));
        }
        if self.check_interval_ms == 0 {
            return Err(EngineError::Validation(
                "grid check interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// The `grid_count` equally spaced price levels, ascending.
    pub fn levels(&self) -> Vec<Decimal> {
        let step =
            (self.upper_price - self.lower_price) / Decimal::from(self.grid_count as u64 - 1);
        (0..self.grid_count)
            .map(|index| self.lower_price + step * Decimal::from(index as u64))
            .collect()
    }

    /// Replacement price for a fill at `fill_price`: the opposite side's
    /// take-profit, clamped into the grid bounds.
    pub fn replacement_price(&self, filled_side: Side, fill_price: Decimal) -> Decimal {
        match filled_side {
            Side::Buy => {
                (fill_price * (Decimal::ONE + self.take_profit_pct)).min(self.upper_price)
            }
            Side::Sell => {
                (fill_price * (Decimal::ONE - self.take_profit_pct)).max(self.lower_price)
            }
        }
    }
}

/// One active grid order, keyed in the worker by its client order id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GridOrder {
    pub cid: ClientOrderId,
    /// Originating level index; `None` for replacement take-profit orders.
    pub level: Option<usize>,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Copy-on-publish snapshot of a grid worker, readable without touching the
/// worker's own state.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GridState {
    pub id: GridId,
    pub status: WorkerStatus,
    pub last_price: Option<Decimal>,
    pub active_orders: Vec<GridOrder>,
    pub position: Decimal,
    pub realised_pnl: Decimal,
    pub unrealised_pnl: Decimal,
    pub total_trades: u64,
    /// Fills whose FIFO-matched realised PnL was positive.
    pub winning_trades: u64,
    pub total_fees: Decimal,
    pub orders_rejected_by_risk: u64,
    pub start_time: DateTime<Utc>,
}

impl GridState {
    pub fn new(id: GridId) -> Self {
        Self {
            id,
            status: WorkerStatus::Initializing,
            last_price: None,
            active_orders: Vec::new(),
            position: Decimal::ZERO,
            realised_pnl: Decimal::ZERO,
            unrealised_pnl: Decimal::ZERO,
            total_trades: 0,
            winning_trades: 0,
            total_fees: Decimal::ZERO,
            orders_rejected_by_risk: 0,
            start_time: Utc::now(),
        }
    }

    /// Stats view over the snapshot.
    pub fn stats(&self) -> GridStats {
        GridStats {
            position: self.position,
            realised_pnl: self.realised_pnl,
            unrealised_pnl: self.unrealised_pnl,
            total_trades: self.total_trades,
            winning_trades: self.winning_trades,
            total_fees: self.total_fees,
            orders_rejected_by_risk: self.orders_rejected_by_risk,
            active_orders: self.active_orders.len() as u64,
        }
    }
}

/// Aggregated grid statistics.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct GridStats {
    pub position: Decimal,
    pub realised_pnl: Decimal,
    pub unrealised_pnl: Decimal,
    pub total_trades: u64,
    /// Fills whose FIFO-matched realised PnL was positive.
    pub winning_trades: u64,
    pub total_fees: Decimal,
    pub orders_rejected_by_risk: u64,
    pub active_orders: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Lot {
    price: Decimal,
    quantity: Decimal,
}

/// Signed FIFO inventory.
///
/// A fill against opposite-sign inventory realises PnL against the oldest
/// lots first; any residual quantity opens new inventory at the fill price.
#[derive(Debug, Clone, Default)]
pub struct FifoInventory {
    /// All lots share one sign: positive long, negative short.
    lots: VecDeque<Lot>,
    long: bool,
}

impl FifoInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Net signed position in base units.
    pub fn position(&self) -> Decimal {
        let magnitude: Decimal = self.lots.iter().map(|lot| lot.quantity).sum();
        if self.long { magnitude } else { -magnitude }
    }

    /// Unrealised PnL of the retained inventory marked at `price`.
    pub fn unrealised(&self, price: Decimal) -> Decimal {
        let direction = if self.long { Decimal::ONE } else { -Decimal::ONE };
        self.lots
            .iter()
            .map(|lot| (price - lot.price) * lot.quantity * direction)
            .sum()
    }

    /// Apply a fill, returning the PnL realised against opposite inventory.
    pub fn apply_fill(&mut self, side: Side, mut quantity: Decimal, price: Decimal) -> Decimal {
        let incoming_long = side == Side::Buy;

        if self.lots.is_empty() || self.long == incoming_long {
            self.long = incoming_long;
            self.lots.push_back(Lot { price, quantity });
            return Decimal::ZERO;
        }

        // Opposite sign: close oldest lots first.
        let mut realised = Decimal::ZERO;
        let direction = if self.long { Decimal::ONE } else { -Decimal::ONE };
        while quantity > Decimal::ZERO {
            let Some(lot) = self.lots.front_mut() else {
                // Flipped: the residual opens inventory on the incoming side.
                self.long = incoming_long;
                self.lots.push_back(Lot { price, quantity });
                break;
            };

            let matched = lot.quantity.min(quantity);
            realised += (price - lot.price) * matched * direction;
            lot.quantity -= matched;
            quantity -= matched;
            if lot.quantity.is_zero() {
                self.lots.pop_front();
            }
        }
        realised
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> GridConfig {
        GridConfig {
            pair: TradingPair::new("BTC", "USDT"),
            lower_price: dec!(90),
            upper_price: dec!(100),
            grid_count: 11,
            order_size: dec!(1),
            take_profit_pct: dec!(0.01),
            max_position: dec!(10),
            check_interval_ms: 1_000,
            mode: TradingMode::Paper,
            risk_checks_enabled: true,
        }
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let mut inverted = config();
        inverted.lower_price = dec!(110);
        assert!(inverted.validate().is_err());

        let mut single = config();
        single.grid_count = 1;
        assert!(single.validate().is_err());
    }

    #[test]
    fn test_levels_equally_spaced() {
        let levels = config().levels();
        assert_eq!(levels.len(), 11);
        assert_eq!(levels[0], dec!(90));
        assert_eq!(levels[4], dec!(94));
        assert_eq!(levels[10], dec!(100));
    }

    #[test]
    fn test_replacement_price() {
        let config = config();
        // Filled buy at 94 re-sells 1% higher.
        assert_eq!(config.replacement_price(Side::Buy, dec!(94)), dec!(94.94));
        // Filled sell at 96 re-buys 1% lower.
        assert_eq!(config.replacement_price(Side::Sell, dec!(96)), dec!(95.04));
        // Out-of-bound computations clamp to the nearest bound.
        assert_eq!(config.replacement_price(Side::Buy, dec!(99.9)), dec!(100));
        assert_eq!(config.replacement_price(Side::Sell, dec!(90.1)), dec!(90));
    }

    #[test]
    fn test_fifo_round_trip_matches_grid_expectation() {
        // Grid scenario: buy@94, tp sell@94.94, sell@96, tp buy@95.04.
        let mut inventory = FifoInventory::new();

        assert_eq!(inventory.apply_fill(Side::Buy, dec!(1), dec!(94)), dec!(0));
        assert_eq!(
            inventory.apply_fill(Side::Sell, dec!(1), dec!(94.94)),
            dec!(0.94)
        );
        assert_eq!(inventory.apply_fill(Side::Sell, dec!(1), dec!(96)), dec!(0));
        assert_eq!(
            inventory.apply_fill(Side::Buy, dec!(1), dec!(95.04)),
            dec!(0.96)
        );

        assert_eq!(inventory.position(), dec!(0));
    }

    #[test]
    fn test_fifo_partial_and_flip() {
        let mut inventory = FifoInventory::new();
        inventory.apply_fill(Side::Buy, dec!(2), dec!(100));
        inventory.apply_fill(Side::Buy, dec!(1), dec!(110));

        // Sell 4: closes 2@100 and 1@110, flips short 1@120.
        let realised = inventory.apply_fill(Side::Sell, dec!(4), dec!(120));
        assert_eq!(realised, dec!(50));
        assert_eq!(inventory.position(), dec!(-1));
        assert_eq!(inventory.unrealised(dec!(115)), dec!(5));
    }

    #[test]
    fn test_fifo_oldest_lot_closes_first() {
        let mut inventory = FifoInventory::new();
        inventory.apply_fill(Side::Buy, dec!(1), dec!(100));
        inventory.apply_fill(Side::Buy, dec!(1), dec!(90));

        // The 100 lot is matched first.
        assert_eq!(
            inventory.apply_fill(Side::Sell, dec!(1), dec!(105)),
            dec!(5)
        );
        assert_eq!(inventory.position(), dec!(1));
        assert_eq!(inventory.unrealised(dec!(95)), dec!(5));
    }
}
