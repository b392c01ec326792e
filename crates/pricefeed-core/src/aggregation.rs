//! Daily to weekly/monthly OHLC aggregation.
//!
//! Weekly buckets follow ISO weeks (Monday first), monthly buckets calendar
//! months, both in UTC. Each output bar is stamped with the timestamp of the
//! last daily bar in its bucket.

use std::collections::BTreeMap;

use crate::error::MarketDataError;
use crate::{Bar, BarSeries, Interval, UtcDateTime};

/// Derive a `target` series from an ascending daily series.
///
/// `Interval::Daily` returns the input unchanged. Any other source interval,
/// or an intraday target, is rejected.
pub fn aggregate(daily: &BarSeries, target: Interval) -> Result<BarSeries, MarketDataError> {
    if !daily.interval.is_daily() {
        return Err(MarketDataError::Aggregation(format!(
            "expected a daily series, got {}",
            daily.interval
        )));
    }

    let bucket_of: fn(UtcDateTime) -> (i32, u8) = match target {
        Interval::Daily => return Ok(daily.clone()),
        Interval::Weekly => UtcDateTime::iso_week,
        Interval::Monthly => |ts| {
            let (year, month) = ts.year_month();
            (year, u8::from(month))
        },
        Interval::Intraday { .. } => {
            return Err(MarketDataError::Aggregation(format!(
                "cannot derive {target} bars from a daily series"
            )))
        }
    };

    let mut buckets: BTreeMap<(i32, u8), Vec<&Bar>> = BTreeMap::new();
    for bar in &daily.bars {
        buckets.entry(bucket_of(bar.ts)).or_default().push(bar);
    }

    let bars = buckets
        .into_values()
        .filter_map(|bucket| merge(&bucket))
        .collect::<Result<Vec<_>, _>>()?;

    BarSeries::new(daily.symbol.clone(), target, bars)
        .map_err(|error| MarketDataError::Aggregation(error.to_string()))
}

fn merge(bucket: &[&Bar]) -> Option<Result<Bar, MarketDataError>> {
    let (first, last) = (bucket.first()?, bucket.last()?);

    let high = bucket.iter().map(|bar| bar.high).fold(f64::MIN, f64::max);
    let low = bucket.iter().map(|bar| bar.low).fold(f64::MAX, f64::min);
    let volume = bucket
        .iter()
        .fold(0_u64, |total, bar| total.saturating_add(bar.volume));

    Some(
        Bar::new(last.ts, first.open, high, low, last.close, volume)
            .map_err(|error| MarketDataError::Aggregation(error.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Symbol;

    fn bar(ts: &str, open: f64, high: f64, low: f64, close: f64, volume: u64) -> Bar {
        Bar::new(UtcDateTime::parse(ts).expect("ts"), open, high, low, close, volume).expect("bar")
    }

    fn daily(bars: Vec<Bar>) -> BarSeries {
        BarSeries::new(Symbol::parse("AAPL").expect("symbol"), Interval::Daily, bars)
            .expect("series")
    }

    #[test]
    fn one_week_collapses_to_one_bar() {
        // Mon 2024-01-01 .. Wed 2024-01-03
        let series = daily(vec![
            bar("2024-01-01T00:00:00Z", 10.0, 12.0, 9.5, 11.0, 100),
            bar("2024-01-02T00:00:00Z", 11.0, 13.0, 10.0, 12.0, 200),
            bar("2024-01-03T00:00:00Z", 12.0, 12.5, 9.0, 11.5, 300),
        ]);

        let weekly = aggregate(&series, Interval::Weekly).expect("weekly");

        assert_eq!(weekly.interval, Interval::Weekly);
        assert_eq!(weekly.len(), 1);
        let only = &weekly.bars[0];
        assert_eq!((only.open, only.high, only.low, only.close), (10.0, 13.0, 9.0, 11.5));
        assert_eq!(only.volume, 600);
        assert_eq!(only.ts.format_rfc3339(), "2024-01-03T00:00:00Z");
    }

    #[test]
    fn iso_weeks_split_on_monday_across_year_end() {
        // Sun 2023-12-31 belongs to ISO week 2023-W52, Mon 2024-01-01 to 2024-W01.
        let series = daily(vec![
            bar("2023-12-29T00:00:00Z", 5.0, 6.0, 4.0, 5.5, 10),
            bar("2023-12-31T00:00:00Z", 5.5, 7.0, 5.0, 6.5, 10),
            bar("2024-01-01T00:00:00Z", 6.5, 8.0, 6.0, 7.5, 10),
        ]);

        let weekly = aggregate(&series, Interval::Weekly).expect("weekly");

        assert_eq!(weekly.len(), 2);
        assert_eq!(weekly.bars[0].close, 6.5);
        assert_eq!(weekly.bars[1].open, 6.5);
    }

    #[test]
    fn months_follow_the_calendar() {
        let series = daily(vec![
            bar("2024-01-30T00:00:00Z", 1.0, 2.0, 0.5, 1.5, 1),
            bar("2024-01-31T00:00:00Z", 1.5, 3.0, 1.0, 2.5, 2),
            bar("2024-02-01T00:00:00Z", 2.5, 2.6, 2.0, 2.2, 4),
        ]);

        let monthly = aggregate(&series, Interval::Monthly).expect("monthly");

        assert_eq!(monthly.len(), 2);
        assert_eq!(monthly.bars[0].high, 3.0);
        assert_eq!(monthly.bars[0].volume, 3);
        assert_eq!(monthly.bars[1].ts.format_date(), "2024-02-01");
    }

    #[test]
    fn aggregation_is_idempotent() {
        let series = daily(vec![
            bar("2024-03-04T00:00:00Z", 10.0, 11.0, 9.0, 10.5, 5),
            bar("2024-03-11T00:00:00Z", 10.5, 12.0, 10.0, 11.5, 7),
        ]);

        let first = aggregate(&series, Interval::Weekly).expect("first");
        let second = aggregate(&series, Interval::Weekly).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn volumes_saturate() {
        let series = daily(vec![
            bar("2024-03-04T00:00:00Z", 1.0, 1.0, 1.0, 1.0, u64::MAX),
            bar("2024-03-05T00:00:00Z", 1.0, 1.0, 1.0, 1.0, 10),
        ]);

        let weekly = aggregate(&series, Interval::Weekly).expect("weekly");
        assert_eq!(weekly.bars[0].volume, u64::MAX);
    }

    #[test]
    fn empty_input_gives_empty_output() {
        let weekly = aggregate(&daily(Vec::new()), Interval::Monthly).expect("monthly");
        assert!(weekly.is_empty());
    }

    #[test]
    fn rejects_non_daily_input_and_intraday_target() {
        let weekly = BarSeries::new(
            Symbol::parse("AAPL").expect("symbol"),
            Interval::Weekly,
            Vec::new(),
        )
        .expect("series");
        assert!(matches!(
            aggregate(&weekly, Interval::Monthly),
            Err(MarketDataError::Aggregation(_))
        ));
        assert!(matches!(
            aggregate(&daily(Vec::new()), Interval::Intraday { minutes: 5 }),
            Err(MarketDataError::Aggregation(_))
        ));
    }
}
