use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Confidence level for historical VaR.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum Confidence {
    #[serde(rename = "0.95")]
    P95,
    #[serde(rename = "0.99")]
    P99,
}

impl Confidence {
    pub fn level(&self) -> f64 {
        match self {
            Self::P95 => 0.95,
            Self::P99 => 0.99,
        }
    }
}

/// Bounded rolling window of realised per-interval returns.
///
/// All metrics are computed over the retained window only; pushing beyond the
/// capacity evicts the oldest return.
#[derive(Debug, Clone)]
pub struct ReturnsWindow {
    capacity: usize,
    returns: VecDeque<f64>,
}

impl ReturnsWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            returns: VecDeque::new(),
        }
    }

    pub fn push(&mut self, value: f64) {
        self.returns.push_back(value);
        if self.returns.len() > self.capacity {
            self.returns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    pub fn mean(&self) -> f64 {
        if self.returns.is_empty() {
            return 0.0;
        }
        self.returns.iter().sum::<f64>() / self.returns.len() as f64
    }

    /// Sample standard deviation of the retained returns.
    pub fn std_dev(&self) -> f64 {
        if self.returns.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq: f64 = self
            .returns
            .iter()
            .map(|value| (value - mean) * (value - mean))
            .sum();
        (sum_sq / (self.returns.len() - 1) as f64).sqrt()
    }

    /// Downside deviation: sample deviation of negative returns only.
    pub fn downside_deviation(&self) -> f64 {
        if self.returns.len() < 2 {
            return 0.0;
        }
        let sum_sq: f64 = self
            .returns
            .iter()
            .filter(|value| **value < 0.0)
            .map(|value| value * value)
            .sum();
        (sum_sq / (self.returns.len() - 1) as f64).sqrt()
    }

    /// Historical value-at-risk: the `(1 - confidence)` empirical quantile of
    /// the retained return distribution, reported as a non-negative loss.
    ///
    /// Returns `None` until the window holds at least one return.
    pub fn value_at_risk(&self, confidence: Confidence) -> Option<f64> {
        if self.returns.is_empty() {
            return None;
        }

        let mut sorted: Vec<f64> = self.returns.iter().copied().collect();
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));

        let quantile = 1.0 - confidence.level();
        let index = ((sorted.len() as f64 * quantile) as usize).min(sorted.len() - 1);
        // A profitable tail means no loss at this confidence.
        Some((-sorted[index]).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_window_evicts_beyond_capacity() {
        let mut window = ReturnsWindow::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            window.push(value);
        }
        assert_eq!(window.len(), 3);
        assert_relative_eq!(window.mean(), 3.0);
    }

    #[test]
    fn test_std_dev_sample() {
        let mut window = ReturnsWindow::new(10);
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            window.push(value);
        }
        // Known sample std dev of this data set.
        assert_relative_eq!(window.std_dev(), 2.138089935299395, epsilon = 1e-12);
    }

    #[test]
    fn test_downside_deviation_ignores_gains() {
        let mut window = ReturnsWindow::new(10);
        for value in [0.1, -0.2, 0.3, -0.2] {
            window.push(value);
        }
        // sqrt((0.04 + 0.04) / 3)
        assert_relative_eq!(window.downside_deviation(), (0.08f64 / 3.0).sqrt());
    }

    #[test]
    fn test_value_at_risk_historical() {
        let mut window = ReturnsWindow::new(100);
        // 100 returns: -0.50, -0.49, ..., 0.49
        for i in 0..100 {
            window.push((i as f64 - 50.0) / 100.0);
        }

        // 5% quantile of the sorted returns is the 5th smallest: -0.45.
        assert_relative_eq!(window.value_at_risk(Confidence::P95).unwrap(), 0.45);
        // 1% quantile: -0.49.
        assert_relative_eq!(window.value_at_risk(Confidence::P99).unwrap(), 0.49);
    }

    #[test]
    fn test_value_at_risk_profitable_tail_is_zero() {
        let mut window = ReturnsWindow::new(10);
        for value in [0.1, 0.2, 0.3] {
            window.push(value);
        }
        assert_eq!(window.value_at_risk(Confidence::P95), Some(0.0));
    }

    #[test]
    fn test_value_at_risk_empty_window() {
        let window = ReturnsWindow::new(10);
        assert_eq!(window.value_at_risk(Confidence::P95), None);
    }
}
