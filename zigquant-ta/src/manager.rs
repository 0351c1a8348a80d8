use crate::{
    IndicatorSpec, TaError,
    indicators::{Bollinger, BollingerPoint, Ema, Macd, MacdPoint, Rsi, Sma},
    series::{Column, Series, SeriesId},
};
use fnv::FnvBuildHasher;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use smol_str::format_smolstr;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use zigquant_instrument::candle::Candle;

/// Default maximum number of cached indicator columns.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Cache key: series identity + indicator specification (name and parameter
/// tuple are both encoded in [`IndicatorSpec`]).
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Fingerprint {
    pub series: SeriesId,
    pub spec: IndicatorSpec,
}

/// Aligned output columns of one cached indicator computation.
///
/// Columns are cheap handles (see [`Column`]) shared between the cache and
/// every series they are attached to; the cache extends them in place when the
/// underlying series grows.
#[derive(Debug, Clone)]
pub enum IndicatorOutput {
    Single(Column),
    Macd {
        macd: Column,
        signal: Column,
        histogram: Column,
    },
    Bollinger {
        upper: Column,
        middle: Column,
        lower: Column,
    },
}

/// Streaming state retained per cache entry so appended candles extend the
/// columns with the indicator's O(1) per-candle update instead of a full
/// recompute.
#[derive(Debug, Clone)]
enum IndicatorState {
    Sma(Sma),
    Ema(Ema),
    Rsi(Rsi),
    Macd(Macd),
    Bollinger(Bollinger),
}

impl IndicatorState {
    fn new(spec: IndicatorSpec) -> Self {
        match spec {
            IndicatorSpec::Sma { period } => Self::Sma(Sma::new(period)),
            IndicatorSpec::Ema { period } => Self::Ema(Ema::new(period)),
            IndicatorSpec::Rsi { period } => Self::Rsi(Rsi::new(period)),
            IndicatorSpec::Macd { fast, slow, signal } => Self::Macd(Macd::new(fast, slow, signal)),
            IndicatorSpec::Bollinger { period, k } => Self::Bollinger(Bollinger::new(period, k)),
        }
    }

    fn empty_output(&self) -> IndicatorOutput {
        match self {
            Self::Sma(_) | Self::Ema(_) | Self::Rsi(_) => IndicatorOutput::Single(Column::default()),
            Self::Macd(_) => IndicatorOutput::Macd {
                macd: Column::default(),
                signal: Column::default(),
                histogram: Column::default(),
            },
            Self::Bollinger(_) => IndicatorOutput::Bollinger {
                upper: Column::default(),
                middle: Column::default(),
                lower: Column::default(),
            },
        }
    }
}

#[derive(Debug)]
struct Entry {
    /// Number of series candles already consumed into the columns.
    len: usize,
    state: IndicatorState,
    output: IndicatorOutput,
}

impl Entry {
    fn new(spec: IndicatorSpec) -> Self {
        let state = IndicatorState::new(spec);
        let output = state.empty_output();
        Self {
            len: 0,
            state,
            output,
        }
    }

    /// Consume `candles[self.len..]`, extending the output columns in place.
    fn extend(&mut self, candles: &[Candle]) {
        let new = &candles[self.len..];

        match (&mut self.state, &self.output) {
            (IndicatorState::Sma(state), IndicatorOutput::Single(column)) => {
                column.extend(new.iter().map(|candle| state.update(candle.close)));
            }
            (IndicatorState::Ema(state), IndicatorOutput::Single(column)) => {
                column.extend(new.iter().map(|candle| state.update(candle.close)));
            }
            (IndicatorState::Rsi(state), IndicatorOutput::Single(column)) => {
                column.extend(new.iter().map(|candle| state.update(candle.close)));
            }
            (
                IndicatorState::Macd(state),
                IndicatorOutput::Macd {
                    macd,
                    signal,
                    histogram,
                },
            ) => {
                for candle in new {
                    let MacdPoint {
                        macd: m,
                        signal: s,
                        histogram: h,
                    } = state.update(candle.close);
                    macd.extend([m]);
                    signal.extend([s]);
                    histogram.extend([h]);
                }
            }
            (
                IndicatorState::Bollinger(state),
                IndicatorOutput::Bollinger {
                    upper,
                    middle,
                    lower,
                },
            ) => {
                for candle in new {
                    let BollingerPoint {
                        upper: u,
                        middle: m,
                        lower: l,
                    } = state.update(candle.close);
                    upper.extend([u]);
                    middle.extend([m]);
                    lower.extend([l]);
                }
            }
            // State and output are constructed together from the same spec.
            _ => unreachable!("indicator state/output kind mismatch"),
        }

        self.len = candles.len();
    }
}

/// Monotonic cache counters, readable without locking.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default, Deserialize, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

type Slot = Arc<Mutex<Option<Entry>>>;

/// Memoising indicator computation layer.
///
/// Maps a [`Fingerprint`] to computed output columns with:
/// - at-most-one concurrent compute per fingerprint (the per-slot mutex is the
///   single-flight barrier - a second caller blocks on it and receives the
///   stored result),
/// - shared-immutable results ([`Column`] handles, append-only storage),
/// - LRU eviction beyond `capacity` entries,
/// - incremental extension when the underlying series has only grown since
///   the entry was computed.
#[derive(Debug)]
pub struct IndicatorManager {
    capacity: usize,
    slots: Mutex<IndexMap<Fingerprint, Slot, FnvBuildHasher>>,
    stats: CacheStats,
}

impl Default for IndicatorManager {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl IndicatorManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(IndexMap::default()),
            stats: CacheStats::default(),
        }
    }

    /// Compute (or fetch) the output columns for `spec` over `series`.
    pub fn get(&self, series: &Series, spec: IndicatorSpec) -> Result<IndicatorOutput, TaError> {
        spec.validate()?;

        let slot = self.slot(Fingerprint {
            series: series.id().clone(),
            spec,
        });

        // Single-flight barrier: the first caller computes while holding the
        // slot lock; concurrent callers for the same fingerprint block here
        // and then observe the stored entry.
        let mut guard = slot.lock();

        // A shorter series under the same id means it was replaced, not
        // extended - recompute from scratch.
        let reusable = guard
            .as_ref()
            .is_some_and(|entry| entry.len <= series.len());
        if reusable {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            *guard = Some(Entry::new(spec));
        }

        let entry = guard.as_mut().expect("slot entry was just ensured");
        entry.extend(series.candles());
        Ok(entry.output.clone())
    }

    /// Compute (or fetch) the columns for `spec` and attach them to `series`
    /// under their canonical names.
    ///
    /// Idempotent: re-populating an already attached indicator replaces the
    /// handles with equivalent ones.
    pub fn populate(&self, series: &mut Series, spec: IndicatorSpec) -> Result<(), TaError> {
        let name = spec.name();
        let output = self.get(series, spec)?;

        match output {
            IndicatorOutput::Single(column) => {
                series.attach_column(name, column);
            }
            IndicatorOutput::Macd {
                macd,
                signal,
                histogram,
            } => {
                series.attach_column(format_smolstr!("{name}_signal"), signal);
                series.attach_column(format_smolstr!("{name}_histogram"), histogram);
                series.attach_column(name, macd);
            }
            IndicatorOutput::Bollinger {
                upper,
                middle,
                lower,
            } => {
                series.attach_column(format_smolstr!("{name}_upper"), upper);
                series.attach_column(format_smolstr!("{name}_lower"), lower);
                series.attach_column(format_smolstr!("{name}_middle"), middle);
            }
        }

        Ok(())
    }

    /// Monotonic hit/miss/eviction counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of cached fingerprints.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Fetch (or insert) the slot for `fingerprint`, refreshing LRU order and
    /// evicting the least recently used entry beyond capacity.
    ///
    /// The global map lock is held only for this bookkeeping, never during a
    /// compute. An evicted slot that another caller is still computing into
    /// stays alive through its `Arc` and simply stops being shared.
    fn slot(&self, fingerprint: Fingerprint) -> Slot {
        let mut slots = self.slots.lock();

        if let Some(index) = slots.get_index_of(&fingerprint) {
            let last = slots.len() - 1;
            slots.move_index(index, last);
            return Arc::clone(&slots[last]);
        }

        let slot = Slot::default();
        slots.insert(fingerprint, Arc::clone(&slot));

        if slots.len() > self.capacity {
            slots.shift_remove_index(0);
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }

        slot
    }
}
