use chrono::{DateTime, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Wall-clock instant paired with an opaque monotonic sequence for
/// intra-millisecond ordering.
///
/// Two [`TimePoint`]s produced by the same [`SequenceClock`] always compare in
/// production order, even when their wall-clock milliseconds collide.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Constructor,
)]
pub struct TimePoint {
    pub time: DateTime<Utc>,
    pub sequence: u64,
}

/// Source of [`TimePoint`]s with a process-wide monotonic sequence.
#[derive(Debug, Default)]
pub struct SequenceClock {
    sequence: AtomicU64,
}

impl SequenceClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next [`TimePoint`].
    pub fn now(&self) -> TimePoint {
        TimePoint {
            time: Utc::now(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Current sequence value without advancing it.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_clock_is_monotonic() {
        let clock = SequenceClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(a.sequence < b.sequence);
    }

    #[test]
    fn test_time_point_ordering_breaks_ties_by_sequence() {
        let time = Utc::now();
        let a = TimePoint::new(time, 1);
        let b = TimePoint::new(time, 2);
        assert!(a < b);
    }
}
