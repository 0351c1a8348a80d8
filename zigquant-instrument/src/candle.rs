use chrono::{DateTime, TimeDelta, Utc};
use derive_more::Display;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalised ZigQuant OHLCV [`Candle`] model.
///
/// All figures are [`Decimal`] - conversion to floating point happens only at
/// observation boundaries (signal strength, ratio metrics, reporting).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    pub fn new(
        time: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// Candle interval supported by the indicator pipeline and strategy runtime.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize, Display,
)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    #[display("1m")]
    M1,
    #[serde(rename = "5m")]
    #[display("5m")]
    M5,
    #[serde(rename = "15m")]
    #[display("15m")]
    M15,
    #[serde(rename = "1h")]
    #[display("1h")]
    H1,
    #[serde(rename = "4h")]
    #[display("4h")]
    H4,
    #[serde(rename = "1d")]
    #[display("1d")]
    D1,
}

impl Timeframe {
    /// Duration of one candle at this [`Timeframe`].
    pub fn interval(&self) -> TimeDelta {
        match self {
            Self::M1 => TimeDelta::minutes(1),
            Self::M5 => TimeDelta::minutes(5),
            Self::M15 => TimeDelta::minutes(15),
            Self::H1 => TimeDelta::hours(1),
            Self::H4 => TimeDelta::hours(4),
            Self::D1 => TimeDelta::days(1),
        }
    }

    /// Number of candles at this [`Timeframe`] in one 365 day year.
    ///
    /// Used as the annualisation factor for ratio metrics.
    pub fn bars_per_year(&self) -> f64 {
        let secs_per_year = 365.0 * 24.0 * 60.0 * 60.0;
        secs_per_year / self.interval().num_seconds() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_timeframe_interval() {
        assert_eq!(Timeframe::M5.interval(), TimeDelta::minutes(5));
        assert_eq!(Timeframe::D1.interval(), TimeDelta::days(1));
    }

    #[test]
    fn test_timeframe_serde_round_trip() {
        let json = serde_json::to_string(&Timeframe::H1).unwrap();
        assert_eq!(json, "\"1h\"");
        assert_eq!(serde_json::from_str::<Timeframe>(&json).unwrap(), Timeframe::H1);
    }

    #[test]
    fn test_candle_ordering_by_time() {
        let earlier = Candle::new(
            DateTime::<Utc>::MIN_UTC,
            dec!(1),
            dec!(2),
            dec!(0.5),
            dec!(1.5),
            dec!(10),
        );
        let later = Candle {
            time: DateTime::<Utc>::MAX_UTC,
            ..earlier
        };
        assert!(earlier < later);
    }
}
