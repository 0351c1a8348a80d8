use serde::{Deserialize, Serialize};

/// Point-in-time drawdown report.
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Default, Deserialize, Serialize)]
pub struct DrawdownReport {
    /// Current peak-to-equity decline as a fraction of the peak.
    pub current: f64,
    /// Largest decline observed so far.
    pub max: f64,
    /// Whether equity has risen since the last trough while still below the peak.
    pub is_recovering: bool,
}

/// Tracks peak-to-trough decline over a stream of equity observations.
#[derive(Debug, Clone, Default)]
pub struct DrawdownTracker {
    peak: f64,
    trough: f64,
    last_equity: f64,
    current: f64,
    max: f64,
    initialised: bool,
}

impl DrawdownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the next equity value and return the updated report.
    pub fn update(&mut self, equity: f64) -> DrawdownReport {
        if !self.initialised {
            self.peak = equity;
            self.trough = equity;
            self.last_equity = equity;
            self.initialised = true;
            return self.report();
        }

        if equity > self.peak {
            // Recovered above the previous peak: a new drawdown period begins.
            self.peak = equity;
            self.trough = equity;
            self.current = 0.0;
        } else {
            if equity < self.trough {
                self.trough = equity;
            }
            self.current = if self.peak > 0.0 {
                (self.peak - equity) / self.peak
            } else {
                0.0
            };
            if self.current > self.max {
                self.max = self.current;
            }
        }

        self.last_equity = equity;
        self.report()
    }

    pub fn report(&self) -> DrawdownReport {
        DrawdownReport {
            current: self.current,
            max: self.max,
            is_recovering: self.current > 0.0 && self.last_equity > self.trough,
        }
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_drawdown_lifecycle() {
        struct TestCase {
            equity: f64,
            expected_current: f64,
            expected_max: f64,
            expected_recovering: bool,
        }

        let mut tracker = DrawdownTracker::new();
        tracker.update(100.0);

        let tests = vec![
            TestCase {
                // TC0: new peak, no drawdown
                equity: 110.0,
                expected_current: 0.0,
                expected_max: 0.0,
                expected_recovering: false,
            },
            TestCase {
                // TC1: first decline
                equity: 99.0,
                expected_current: 0.1,
                expected_max: 0.1,
                expected_recovering: false,
            },
            TestCase {
                // TC2: deeper trough
                equity: 88.0,
                expected_current: 0.2,
                expected_max: 0.2,
                expected_recovering: false,
            },
            TestCase {
                // TC3: partial recovery
                equity: 95.0,
                expected_current: (110.0 - 95.0) / 110.0,
                expected_max: 0.2,
                expected_recovering: true,
            },
            TestCase {
                // TC4: full recovery above peak resets the period
                equity: 115.0,
                expected_current: 0.0,
                expected_max: 0.2,
                expected_recovering: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let report = tracker.update(test.equity);
            assert_relative_eq!(report.current, test.expected_current, epsilon = 1e-12);
            assert_relative_eq!(report.max, test.expected_max, epsilon = 1e-12);
            assert_eq!(
                report.is_recovering, test.expected_recovering,
                "TC{index} is_recovering failed"
            );
        }
    }

    #[test]
    fn test_flat_equity_has_no_drawdown() {
        let mut tracker = DrawdownTracker::new();
        for _ in 0..10 {
            let report = tracker.update(100.0);
            assert_eq!(report.current, 0.0);
            assert_eq!(report.max, 0.0);
            assert!(!report.is_recovering);
        }
    }
}
