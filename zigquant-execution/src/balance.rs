use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Balance of a single asset.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Default, Deserialize, Serialize, Constructor,
)]
pub struct Balance {
    pub total: Decimal,
    pub free: Decimal,
}

impl Balance {
    pub fn used(&self) -> Decimal {
        self.total - self.free
    }
}

/// [`Balance`] associated with an asset symbol and exchange timestamp.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize, Serialize, Constructor)]
pub struct AssetBalance {
    pub asset: SmolStr,
    pub balance: Balance,
    pub time_exchange: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balance_used() {
        let balance = Balance::new(dec!(100), dec!(60));
        assert_eq!(balance.used(), dec!(40));
    }
}
