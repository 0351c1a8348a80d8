use crate::error::EngineError;
use zigquant_instrument::candle::Candle;

/// Finite source of candles ordered by ascending timestamp, consumed by the
/// backtest engine and by strategy workers.
pub trait CandleFeed: std::fmt::Debug + Send + Sync {
    /// Next candle, or `None` when the feed is exhausted.
    fn next(&mut self) -> Option<Candle>;

    /// Reset the feed to its first candle.
    ///
    /// Optional: sources that cannot rewind return a `Validation` error.
    fn rewind(&mut self) -> Result<(), EngineError> {
        Err(EngineError::Validation(
            "candle feed does not support rewind".to_string(),
        ))
    }
}

/// In-memory candle feed over a pre-loaded, time-ordered vector.
#[derive(Debug, Clone)]
pub struct InMemoryCandleFeed {
    candles: Vec<Candle>,
    cursor: usize,
}

impl InMemoryCandleFeed {
    pub fn new(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|candle| candle.time);
        Self { candles, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

impl CandleFeed for InMemoryCandleFeed {
    fn next(&mut self) -> Option<Candle> {
        let candle = self.candles.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(candle)
    }

    fn rewind(&mut self) -> Result<(), EngineError> {
        self.cursor = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use rust_decimal::Decimal;

    fn candles(count: usize) -> Vec<Candle> {
        let base = Utc::now();
        (0..count)
            .map(|index| Candle {
                time: base + TimeDelta::minutes(index as i64),
                open: Decimal::ONE,
                high: Decimal::ONE,
                low: Decimal::ONE,
                close: Decimal::ONE,
                volume: Decimal::ONE,
            })
            .collect()
    }

    #[test]
    fn test_feed_ordered_and_finite() {
        let mut input = candles(3);
        input.reverse();
        let mut feed = InMemoryCandleFeed::new(input);

        let first = feed.next().unwrap();
        let second = feed.next().unwrap();
        assert!(first.time < second.time);
        assert!(feed.next().is_some());
        assert!(feed.next().is_none());
    }

    #[test]
    fn test_feed_rewind() {
        let mut feed = InMemoryCandleFeed::new(candles(2));
        let first = feed.next().unwrap();
        feed.next().unwrap();
        feed.rewind().unwrap();
        assert_eq!(feed.next().unwrap(), first);
    }
}
