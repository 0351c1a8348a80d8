use crate::TaError;
use derive_more::{Display, From};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;
use zigquant_instrument::{
    candle::{Candle, Timeframe},
    pair::TradingPair,
};

/// Unique identity of a candle [`Series`].
///
/// The [`IndicatorManager`](crate::manager::IndicatorManager) fingerprints cache
/// entries on this identity, so two distinct series must never share an id.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
)]
pub struct SeriesId(pub SmolStr);

impl SeriesId {
    pub fn new<S: AsRef<str>>(id: S) -> Self {
        Self(SmolStr::new(id))
    }
}

/// Aligned indicator column handle.
///
/// Cheap to clone and shared between the cache and every [`Series`] it is
/// attached to. Storage is append-only: positions already written are never
/// mutated, so concurrent readers always observe a stable prefix. Leading
/// `None` entries cover the indicator's warm-up window.
#[derive(Debug, Clone, Default)]
pub struct Column {
    data: Arc<RwLock<Vec<Option<Decimal>>>>,
}

impl Column {
    pub fn from_values(values: Vec<Option<Decimal>>) -> Self {
        Self {
            data: Arc::new(RwLock::new(values)),
        }
    }

    /// Value at `index`, `None` if out of range or inside the warm-up window.
    pub fn get(&self, index: usize) -> Option<Decimal> {
        self.data.read().get(index).copied().flatten()
    }

    /// Most recent value, `None` if the column is empty or still warming up.
    pub fn last(&self) -> Option<Decimal> {
        self.data.read().last().copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Copy of the full column.
    pub fn to_vec(&self) -> Vec<Option<Decimal>> {
        self.data.read().clone()
    }

    /// Append newly computed values.
    ///
    /// Only the [`IndicatorManager`](crate::manager::IndicatorManager) extends
    /// columns; existing positions are never rewritten.
    pub(crate) fn extend(&self, values: impl IntoIterator<Item = Option<Decimal>>) {
        self.data.write().extend(values)
    }
}

/// Ordered candle series with lazily attached indicator columns.
///
/// Candles are append-only and ordered by ascending time. Attached columns are
/// aligned with the candle vector (same indices) and extended in place by the
/// [`IndicatorManager`](crate::manager::IndicatorManager) when new candles
/// arrive.
#[derive(Debug, Clone)]
pub struct Series {
    id: SeriesId,
    pair: TradingPair,
    timeframe: Timeframe,
    candles: Vec<Candle>,
    columns: FnvHashMap<SmolStr, Column>,
}

impl Series {
    pub fn new(id: SeriesId, pair: TradingPair, timeframe: Timeframe) -> Self {
        Self {
            id,
            pair,
            timeframe,
            candles: Vec::new(),
            columns: FnvHashMap::default(),
        }
    }

    pub fn with_candles(
        id: SeriesId,
        pair: TradingPair,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) -> Self {
        debug_assert!(
            candles.windows(2).all(|w| w[0].time <= w[1].time),
            "Series candles must be ordered by ascending time"
        );
        Self {
            id,
            pair,
            timeframe,
            candles,
            columns: FnvHashMap::default(),
        }
    }

    pub fn id(&self) -> &SeriesId {
        &self.id
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn candle(&self, index: usize) -> Option<&Candle> {
        self.candles.get(index)
    }

    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Close price at `index`.
    pub fn close(&self, index: usize) -> Option<Decimal> {
        self.candles.get(index).map(|candle| candle.close)
    }

    /// Append a new candle.
    ///
    /// Attached columns remain valid - they are extended lazily on the next
    /// indicator populate pass.
    pub fn push(&mut self, candle: Candle) {
        debug_assert!(
            self.candles
                .last()
                .is_none_or(|last| last.time <= candle.time),
            "Series candles must be ordered by ascending time"
        );
        self.candles.push(candle);
    }

    /// Attach a named indicator column.
    ///
    /// Idempotent for a given name - re-attaching replaces the handle.
    pub fn attach_column(&mut self, name: SmolStr, column: Column) {
        self.columns.insert(name, column);
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Attached column by name.
    pub fn column(&self, name: &str) -> Result<&Column, TaError> {
        self.columns
            .get(name)
            .ok_or_else(|| TaError::ColumnMissing(self.id.0.clone(), SmolStr::new(name)))
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::series_with_closes;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_column_get_flattens_warmup() {
        let column = Column::from_values(vec![None, Some(dec!(1)), Some(dec!(2))]);
        assert_eq!(column.get(0), None);
        assert_eq!(column.get(1), Some(dec!(1)));
        assert_eq!(column.get(9), None);
        assert_eq!(column.last(), Some(dec!(2)));
    }

    #[test]
    fn test_series_column_missing() {
        let series = series_with_closes("test", &[dec!(1), dec!(2)]);
        assert!(matches!(
            series.column("sma_20"),
            Err(TaError::ColumnMissing(_, _))
        ));
    }

    #[test]
    fn test_series_attach_and_read_column() {
        let mut series = series_with_closes("test", &[dec!(1), dec!(2)]);
        series.attach_column(
            SmolStr::new("sma_2"),
            Column::from_values(vec![None, Some(dec!(1.5))]),
        );
        assert_eq!(series.column("sma_2").unwrap().get(1), Some(dec!(1.5)));
    }

    #[test]
    fn test_series_push_keeps_columns_attached() {
        let mut series = series_with_closes("test", &[dec!(1), dec!(2)]);
        series.attach_column(SmolStr::new("sma_2"), Column::default());
        let last = *series.last_candle().unwrap();
        series.push(Candle {
            time: last.time + chrono::TimeDelta::minutes(1),
            ..last
        });
        assert_eq!(series.len(), 3);
        assert!(series.has_column("sma_2"));
    }
}
