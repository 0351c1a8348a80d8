use rust_decimal::Decimal;
use rust_decimal::prelude::Signed;
use serde::{Deserialize, Serialize};
use zigquant_instrument::{Side, pair::TradingPair};

/// Signed instrument position: positive size is long, negative is short.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Position {
    pub pair: TradingPair,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub margin_used: Decimal,
    pub unrealised_pnl: Decimal,
    pub funding_cumulative: Decimal,
}

impl Position {
    pub fn new_flat(pair: TradingPair) -> Self {
        Self {
            pair,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            leverage: Decimal::ONE,
            liquidation_price: None,
            margin_used: Decimal::ZERO,
            unrealised_pnl: Decimal::ZERO,
            funding_cumulative: Decimal::ZERO,
        }
    }

    pub fn with_size(mut self, size: Decimal, entry_price: Decimal) -> Self {
        self.size = size;
        self.entry_price = entry_price;
        self
    }

    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }

    pub fn is_short(&self) -> bool {
        self.size < Decimal::ZERO
    }

    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    /// Unrealised PnL of the position marked at `price`.
    pub fn unrealised_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.size
    }

    /// Re-mark the cached unrealised PnL at `price`.
    pub fn mark(&mut self, price: Decimal) {
        self.unrealised_pnl = self.unrealised_at(price);
    }

    /// Apply an execution to the position and return the realised PnL of any
    /// quantity that closed against existing inventory.
    ///
    /// Opening/extending uses a size-weighted entry price. A fill larger than
    /// the opposing inventory flips the position, with the residual opening at
    /// the fill price.
    pub fn apply_fill(&mut self, side: Side, quantity: Decimal, price: Decimal) -> Decimal {
        let signed = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };

        // Same direction (or flat): extend with a weighted entry.
        if self.size.is_zero() || (self.size.signum() == signed.signum()) {
            let total = self.size + signed;
            self.entry_price = if total.is_zero() {
                Decimal::ZERO
            } else {
                (self.entry_price * self.size.abs() + price * quantity) / total.abs()
            };
            self.size = total;
            return Decimal::ZERO;
        }

        // Opposite direction: close against inventory first.
        let close_quantity = self.size.abs().min(quantity);
        let realised = (price - self.entry_price) * close_quantity * self.size.signum();

        let total = self.size + signed;
        if total.is_zero() {
            self.entry_price = Decimal::ZERO;
        } else if total.signum() != self.size.signum() {
            // Flipped through zero: the residual opened at the fill price.
            self.entry_price = price;
        }
        self.size = total;
        realised
    }
}
