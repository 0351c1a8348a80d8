use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use zigquant_instrument::{
    candle::{Candle, Timeframe},
    pair::TradingPair,
};
use zigquant_ta::series::{Series, SeriesId};

/// Fixed fixture epoch so replay fixtures are reproducible across test runs.
pub fn fixture_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).expect("valid fixture epoch")
}

/// Candles one minute apart whose OHLC all equal the provided closes.
pub fn candles_with_closes(closes: &[Decimal]) -> Vec<Candle> {
    let base = fixture_epoch();
    closes
        .iter()
        .enumerate()
        .map(|(index, close)| Candle {
            time: base + TimeDelta::minutes(index as i64),
            open: *close,
            high: *close,
            low: *close,
            close: *close,
            volume: Decimal::ONE,
        })
        .collect()
}

/// Series over [`candles_with_closes`] fixtures.
pub fn series_with_closes(id: &str, closes: &[Decimal]) -> Series {
    Series::with_candles(
        SeriesId::new(id),
        TradingPair::new("BTC", "USDT"),
        Timeframe::M1,
        candles_with_closes(closes),
    )
}
