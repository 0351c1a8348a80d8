use rust_decimal::{Decimal, MathematicalOps};
use std::collections::VecDeque;
use zigquant_instrument::candle::Candle;

/// Simple moving average over a fixed close window.
///
/// Emits `None` until the window is full, then the rolling-sum average. The
/// rolling sum makes each update O(1).
#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    window: VecDeque<Decimal>,
    sum: Decimal,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
            sum: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, close: Decimal) -> Option<Decimal> {
        self.window.push_back(close);
        self.sum += close;
        if self.window.len() > self.period
            && let Some(oldest) = self.window.pop_front()
        {
            self.sum -= oldest;
        }

        (self.window.len() == self.period).then(|| self.sum / Decimal::from(self.period as u64))
    }
}

/// Exponential moving average seeded with the SMA of the first `period` closes.
///
/// `EMA_t = alpha * close_t + (1 - alpha) * EMA_{t-1}` with `alpha = 2 / (period + 1)`.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    alpha: Decimal,
    seed_sum: Decimal,
    seed_count: usize,
    value: Option<Decimal>,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            alpha: Decimal::TWO / Decimal::from(period as u64 + 1),
            seed_sum: Decimal::ZERO,
            seed_count: 0,
            value: None,
        }
    }

    pub fn update(&mut self, close: Decimal) -> Option<Decimal> {
        match self.value {
            Some(previous) => {
                let next = self.alpha * close + (Decimal::ONE - self.alpha) * previous;
                self.value = Some(next);
                self.value
            }
            None => {
                self.seed_sum += close;
                self.seed_count += 1;
                if self.seed_count == self.period {
                    self.value = Some(self.seed_sum / Decimal::from(self.period as u64));
                }
                self.value
            }
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }
}

/// Relative strength index with Wilder smoothing.
///
/// Seeds average gain/loss with the arithmetic mean of the first `period`
/// deltas, then `avg = (avg * (period - 1) + current) / period`. When the
/// average loss is zero RSI is 100; when both averages are zero RSI is 50.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<Decimal>,
    seed_gain: Decimal,
    seed_loss: Decimal,
    seed_count: usize,
    averages: Option<(Decimal, Decimal)>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seed_gain: Decimal::ZERO,
            seed_loss: Decimal::ZERO,
            seed_count: 0,
            averages: None,
        }
    }

    pub fn update(&mut self, close: Decimal) -> Option<Decimal> {
        let Some(prev_close) = self.prev_close.replace(close) else {
            return None;
        };

        let delta = close - prev_close;
        let gain = delta.max(Decimal::ZERO);
        let loss = (-delta).max(Decimal::ZERO);
        let period = Decimal::from(self.period as u64);

        let (avg_gain, avg_loss) = match self.averages {
            Some((avg_gain, avg_loss)) => (
                (avg_gain * (period - Decimal::ONE) + gain) / period,
                (avg_loss * (period - Decimal::ONE) + loss) / period,
            ),
            None => {
                self.seed_gain += gain;
                self.seed_loss += loss;
                self.seed_count += 1;
                if self.seed_count < self.period {
                    return None;
                }
                (self.seed_gain / period, self.seed_loss / period)
            }
        };

        self.averages = Some((avg_gain, avg_loss));
        Some(rsi_from_averages(avg_gain, avg_loss))
    }
}

fn rsi_from_averages(avg_gain: Decimal, avg_loss: Decimal) -> Decimal {
    if avg_loss.is_zero() && avg_gain.is_zero() {
        Decimal::from(50)
    } else if avg_loss.is_zero() {
        Decimal::ONE_HUNDRED
    } else {
        let rs = avg_gain / avg_loss;
        Decimal::ONE_HUNDRED - Decimal::ONE_HUNDRED / (Decimal::ONE + rs)
    }
}

/// One MACD observation: the three aligned column values at a single index.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MacdPoint {
    pub macd: Option<Decimal>,
    pub signal: Option<Decimal>,
    pub histogram: Option<Decimal>,
}

/// Moving average convergence/divergence: fast EMA minus slow EMA, with a
/// signal EMA over the MACD line and their difference as histogram.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: Ema::new(fast),
            slow: Ema::new(slow),
            signal: Ema::new(signal),
        }
    }

    pub fn update(&mut self, close: Decimal) -> MacdPoint {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);

        let Some(macd) = fast.zip(slow).map(|(fast, slow)| fast - slow) else {
            return MacdPoint::default();
        };

        let signal = self.signal.update(macd);
        MacdPoint {
            macd: Some(macd),
            signal,
            histogram: signal.map(|signal| macd - signal),
        }
    }
}

/// One Bollinger observation: the three aligned column values at a single index.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct BollingerPoint {
    pub upper: Option<Decimal>,
    pub middle: Option<Decimal>,
    pub lower: Option<Decimal>,
}

/// Bollinger bands: SMA middle band +/- `k` sample standard deviations.
///
/// Maintains a rolling sum and sum-of-squares so each update is O(1).
#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    k: Decimal,
    window: VecDeque<Decimal>,
    sum: Decimal,
    sum_sq: Decimal,
}

impl Bollinger {
    pub fn new(period: usize, k: Decimal) -> Self {
        Self {
            period,
            k,
            window: VecDeque::with_capacity(period + 1),
            sum: Decimal::ZERO,
            sum_sq: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, close: Decimal) -> BollingerPoint {
        self.window.push_back(close);
        self.sum += close;
        self.sum_sq += close * close;
        if self.window.len() > self.period
            && let Some(oldest) = self.window.pop_front()
        {
            self.sum -= oldest;
            self.sum_sq -= oldest * oldest;
        }

        if self.window.len() < self.period {
            return BollingerPoint::default();
        }

        let n = Decimal::from(self.period as u64);
        let middle = self.sum / n;

        // Sample variance; the rolling sums can round to a tiny negative on a
        // flat window, which sqrt() would reject.
        let variance =
            ((self.sum_sq - self.sum * self.sum / n) / (n - Decimal::ONE)).max(Decimal::ZERO);
        let std_dev = variance.sqrt().unwrap_or(Decimal::ZERO);

        BollingerPoint {
            upper: Some(middle + self.k * std_dev),
            middle: Some(middle),
            lower: Some(middle - self.k * std_dev),
        }
    }
}

/// Full SMA column aligned with `candles`.
pub fn sma(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    let mut state = Sma::new(period);
    candles
        .iter()
        .map(|candle| state.update(candle.close))
        .collect()
}

/// Full EMA column aligned with `candles`.
pub fn ema(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    let mut state = Ema::new(period);
    candles
        .iter()
        .map(|candle| state.update(candle.close))
        .collect()
}

/// Full RSI column aligned with `candles`.
pub fn rsi(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    let mut state = Rsi::new(period);
    candles
        .iter()
        .map(|candle| state.update(candle.close))
        .collect()
}

/// Full MACD columns (macd, signal, histogram) aligned with `candles`.
pub fn macd(
    candles: &[Candle],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Vec<MacdPoint> {
    let mut state = Macd::new(fast, slow, signal);
    candles
        .iter()
        .map(|candle| state.update(candle.close))
        .collect()
}

/// Full Bollinger columns (upper, middle, lower) aligned with `candles`.
pub fn bollinger(candles: &[Candle], period: usize, k: Decimal) -> Vec<BollingerPoint> {
    let mut state = Bollinger::new(period, k);
    candles
        .iter()
        .map(|candle| state.update(candle.close))
        .collect()
}
