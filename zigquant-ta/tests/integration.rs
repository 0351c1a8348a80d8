use chrono::{TimeDelta, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use zigquant_instrument::{
    candle::{Candle, Timeframe},
    pair::TradingPair,
};
use zigquant_ta::{
    IndicatorSpec,
    indicators::{Ema, Rsi, Sma},
    manager::{IndicatorManager, IndicatorOutput},
    series::{Series, SeriesId},
};

fn series(id: &str, closes: &[Decimal]) -> Series {
    let base = Utc::now();
    let candles = closes
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
        .collect();
    Series::with_candles(
        SeriesId::new(id),
        TradingPair::new("BTC", "USDT"),
        Timeframe::M1,
        candles,
    )
}

#[test]
fn streaming_sma_and_ema() {
    let mut sma = Sma::new(3);
    assert_eq!(sma.update(dec!(1)), None);
    assert_eq!(sma.update(dec!(2)), None);
    assert_eq!(sma.update(dec!(3)), Some(dec!(2)));
    assert_eq!(sma.update(dec!(4)), Some(dec!(3)));

    let mut ema = Ema::new(3);
    assert_eq!(ema.update(dec!(1)), None);
    assert_eq!(ema.update(dec!(2)), None);
    assert_eq!(ema.update(dec!(3)), Some(dec!(2)));
    assert!(ema.update(dec!(4)).unwrap() > dec!(2));
}

#[test]
fn rsi_pins_at_extremes() {
    let mut rsi = Rsi::new(3);
    let mut last = None;
    for close in [1, 2, 3, 4, 5, 6, 7, 8] {
        last = rsi.update(Decimal::from(close));
    }
    assert_eq!(last, Some(dec!(100)));
}

#[test]
fn populate_then_extend_keeps_column_aligned() {
    let manager = IndicatorManager::default();
    let closes: Vec<Decimal> = (1..=50).map(Decimal::from).collect();
    let mut series = series("align", &closes[..40]);

    let spec = IndicatorSpec::Ema { period: 10 };
    manager.populate(&mut series, spec).unwrap();
    assert_eq!(series.column("ema_10").unwrap().len(), 40);

    for close in &closes[40..] {
        let last = *series.last_candle().unwrap();
        series.push(Candle {
            time: last.time + TimeDelta::minutes(1),
            open: *close,
            high: *close,
            low: *close,
            close: *close,
            volume: Decimal::ONE,
        });
    }
    manager.populate(&mut series, spec).unwrap();

    let column = series.column("ema_10").unwrap();
    assert_eq!(column.len(), 50);
    assert_eq!(column.get(49), column.last());
}

#[test]
fn shared_output_between_series_and_cache() {
    let manager = IndicatorManager::default();
    let closes: Vec<Decimal> = (1..=30).map(Decimal::from).collect();
    let mut owned = series("shared", &closes);

    let spec = IndicatorSpec::Sma { period: 5 };
    manager.populate(&mut owned, spec).unwrap();

    let IndicatorOutput::Single(column) = manager.get(&owned, spec).unwrap() else {
        panic!("expected single column");
    };
    assert_eq!(
        column.to_vec(),
        owned.column("sma_5").unwrap().to_vec(),
        "cache and attached column must observe the same values"
    );
}
