use chrono::{DateTime, Utc};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;
use zigquant_instrument::{Side, pair::TradingPair};

/// One aggregated price level of an L2 book side.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
    Constructor,
)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
    pub num_orders: u64,
}

impl<P, S> From<(P, S)> for Level
where
    P: Into<Decimal>,
    S: Into<Decimal>,
{
    fn from((price, size): (P, S)) -> Self {
        Self::new(price.into(), size.into(), 1)
    }
}

/// Aggregated L2 order book.
///
/// Invariants:
/// - bids are ordered high to low, asks low to high, no duplicate price per side
/// - a level with zero size is absent, never retained
/// - `best_bid < best_ask` whenever both are present
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OrderBook {
    pair: TradingPair,
    bids: Vec<Level>,
    asks: Vec<Level>,
    last_update_time: DateTime<Utc>,
    sequence: u64,
}

impl OrderBook {
    /// Construct a sorted [`OrderBook`] snapshot.
    ///
    /// The passed levels do not need to be pre-sorted; zero-size levels are
    /// dropped.
    pub fn new<IterBids, IterAsks, L>(
        pair: TradingPair,
        sequence: u64,
        time: DateTime<Utc>,
        bids: IterBids,
        asks: IterAsks,
    ) -> Self
    where
        IterBids: IntoIterator<Item = L>,
        IterAsks: IntoIterator<Item = L>,
        L: Into<Level>,
    {
        let mut bids: Vec<Level> = bids
            .into_iter()
            .map(L::into)
            .filter(|level| !level.size.is_zero())
            .collect();
        bids.sort_unstable_by(|a, b| a.price.cmp(&b.price).reverse());

        let mut asks: Vec<Level> = asks
            .into_iter()
            .map(L::into)
            .filter(|level| !level.size.is_zero())
            .collect();
        asks.sort_unstable_by(|a, b| a.price.cmp(&b.price));

        Self {
            pair,
            bids,
            asks,
            last_update_time: time,
            sequence,
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn last_update_time(&self) -> DateTime<Utc> {
        self.last_update_time
    }

    pub fn bids(&self) -> &[Level] {
        &self.bids
    }

    pub fn asks(&self) -> &[Level] {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<&Level> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&Level> {
        self.asks.first()
    }

    /// Whether best bid and best ask violate `bid < ask`.
    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price >= ask.price,
            _ => false,
        }
    }

    /// Mid price: average of the best bid and ask, falling back to whichever
    /// side is present.
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            (Some(bid), None) => Some(bid.price),
            (None, Some(ask)) => Some(ask.price),
            (None, None) => None,
        }
    }

    /// Volume weighted mid price (micro-price), weighing the best levels with
    /// their opposite sizes.
    pub fn volume_weighted_mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(
                (bid.price * ask.size + ask.price * bid.size) / (bid.size + ask.size),
            ),
            (Some(bid), None) => Some(bid.price),
            (None, Some(ask)) => Some(ask.price),
            (None, None) => None,
        }
    }

    /// Size imbalance over the top `depth` levels of each side:
    /// `(bid_size - ask_size) / (bid_size + ask_size)`, in `[-1, 1]` with
    /// positive values meaning bid-heavy resting liquidity.
    ///
    /// Returns `None` when both sides are empty within the window.
    pub fn imbalance(&self, depth: usize) -> Option<Decimal> {
        let bid_size: Decimal = self.bids.iter().take(depth).map(|level| level.size).sum();
        let ask_size: Decimal = self.asks.iter().take(depth).map(|level| level.size).sum();

        let total = bid_size + ask_size;
        if total.is_zero() {
            return None;
        }
        Some((bid_size - ask_size) / total)
    }

    /// Total size resting at or better than `price_limit` on `side`
    /// (bids at or above, asks at or below).
    pub fn depth(&self, side: Side, price_limit: Decimal) -> Decimal {
        let levels = match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        };
        levels
            .iter()
            .take_while(|level| match side {
                Side::Buy => level.price >= price_limit,
                Side::Sell => level.price <= price_limit,
            })
            .map(|level| level.size)
            .sum()
    }

    /// Volume weighted average price of a taker order of `quantity` base units
    /// walking the opposite side (buys consume asks, sells consume bids).
    ///
    /// Returns `None` when resting liquidity cannot absorb the quantity.
    pub fn fill_price(&self, taker_side: Side, quantity: Decimal) -> Option<Decimal> {
        if quantity <= Decimal::ZERO {
            return None;
        }

        let levels = match taker_side {
            Side::Buy => &self.asks,
            Side::Sell => &self.bids,
        };

        let mut remaining = quantity;
        let mut notional = Decimal::ZERO;
        for level in levels {
            let take = remaining.min(level.size);
            notional += take * level.price;
            remaining -= take;
            if remaining.is_zero() {
                return Some(notional / quantity);
            }
        }
        None
    }

    /// Relative slippage of a taker order of `quantity` base units versus the
    /// opposite side's best price.
    pub fn slippage(&self, taker_side: Side, quantity: Decimal) -> Option<Decimal> {
        let average = self.fill_price(taker_side, quantity)?;
        let best = match taker_side {
            Side::Buy => self.best_ask()?.price,
            Side::Sell => self.best_bid()?.price,
        };
        Some(((average - best) / best).abs())
    }

    /// Apply an L2 delta update: upsert the provided levels on each side and
    /// advance the sequence/time.
    pub fn update<L>(
        &mut self,
        sequence: u64,
        time: DateTime<Utc>,
        bids: impl IntoIterator<Item = L>,
        asks: impl IntoIterator<Item = L>,
    ) where
        L: Into<Level>,
    {
        for level in bids {
            let level = level.into();
            upsert_level(&mut self.bids, level, |existing| {
                existing.price.cmp(&level.price).reverse()
            });
        }
        for level in asks {
            let level = level.into();
            upsert_level(&mut self.asks, level, |existing| {
                existing.price.cmp(&level.price)
            });
        }
        self.sequence = sequence;
        self.last_update_time = time;
    }
}

/// Upsert a single [`Level`] into a sorted side.
///
/// A zero-size level removes the existing entry; an unknown zero-size level is
/// logged and skipped.
fn upsert_level<FnOrd>(levels: &mut Vec<Level>, new_level: Level, fn_ord: FnOrd)
where
    FnOrd: Fn(&Level) -> Ordering,
{
    match (levels.binary_search_by(fn_ord), new_level.size) {
        (Ok(index), size) => {
            if size.is_zero() {
                let _removed = levels.remove(index);
            } else {
                levels[index] = new_level;
            }
        }
        (Err(index), size) => {
            if size.is_zero() {
                debug!(
                    ?new_level,
                    "received zero-size level (to remove) that was not found"
                );
            } else {
                levels.insert(index, new_level);
            }
        }
    }
}
