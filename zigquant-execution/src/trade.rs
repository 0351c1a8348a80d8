use crate::order::id::OrderId;
use chrono::{DateTime, Utc};
use derive_more::{Constructor, Display, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use zigquant_instrument::{Side, pair::TradingPair};

/// Exchange-assigned trade identifier.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct TradeId(pub SmolStr);

impl TradeId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Exchange-side record of an executed trade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Constructor)]
pub struct Trade {
    pub id: TradeId,
    pub pair: TradingPair,
    pub order_id: OrderId,
    pub time_exchange: DateTime<Utc>,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub fee_currency: SmolStr,
}

impl Trade {
    /// Traded value in quote currency.
    pub fn value_quote(&self) -> Decimal {
        self.price * self.quantity.abs()
    }
}
