//! Ordered OHLCV series for one (exchange, symbol, timeframe).
//!
//! At most one candle exists per bucket timestamp. A newer bar for an existing
//! timestamp replaces the stored one outright; nothing is merged field by field.

use std::collections::BTreeMap;

use crate::entities::CandleStick;
use crate::values::Timestamp;

#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    candles: Vec<CandleStick>,
    snapshot_resolved: bool,
    /// Keep only the most recent N candles when set
    retention: Option<usize>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(limit: usize) -> Self {
        CandleSeries {
            retention: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Seed the series from a snapshot. Only the first call has any effect.
    ///
    /// Bars already pushed by the stream are newer than the snapshot and win
    /// over snapshot bars with the same timestamp. Returns true if this call
    /// resolved the snapshot.
    pub fn resolve_snapshot<I>(&mut self, bars: I) -> bool
    where
        I: IntoIterator<Item = CandleStick>,
    {
        if self.snapshot_resolved {
            return false;
        }

        let mut by_time: BTreeMap<Timestamp, CandleStick> = BTreeMap::new();
        for bar in bars {
            by_time.insert(bar.timestamp, bar);
        }
        for bar in self.candles.drain(..) {
            by_time.insert(bar.timestamp, bar);
        }

        self.candles = by_time.into_values().collect();
        self.snapshot_resolved = true;
        self.enforce_retention();
        true
    }

    /// Insert or replace one bar, keeping timestamp order. Returns the stored bar.
    pub fn push_update(&mut self, bar: CandleStick) -> CandleStick {
        match self
            .candles
            .binary_search_by(|existing| existing.timestamp.cmp(&bar.timestamp))
        {
            Ok(idx) => self.candles[idx] = bar.clone(),
            Err(idx) => {
                self.candles.insert(idx, bar.clone());
                self.enforce_retention();
            }
        }
        bar
    }

    pub fn is_snapshot_resolved(&self) -> bool {
        self.snapshot_resolved
    }

    pub fn candles(&self) -> &[CandleStick] {
        &self.candles
    }

    pub fn get(&self, timestamp: Timestamp) -> Option<&CandleStick> {
        self.candles
            .binary_search_by(|c| c.timestamp.cmp(&timestamp))
            .ok()
            .map(|idx| &self.candles[idx])
    }

    pub fn last(&self) -> Option<&CandleStick> {
        self.candles.last()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn enforce_retention(&mut self) {
        if let Some(limit) = self.retention
            && self.candles.len() > limit
        {
            let excess = self.candles.len() - limit;
            self.candles.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn bar(ts: i64, o: Decimal, h: Decimal, l: Decimal, c: Decimal) -> CandleStick {
        CandleStick {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: dec!(1),
        }
    }

    fn times(series: &CandleSeries) -> Vec<i64> {
        series.candles().iter().map(|c| c.timestamp.timestamp()).collect()
    }

    #[test]
    fn test_update_replaces_existing_bucket() {
        let mut series = CandleSeries::new();
        series.resolve_snapshot(vec![bar(1000, dec!(10), dec!(12), dec!(9), dec!(11))]);

        series.push_update(bar(1000, dec!(10), dec!(13), dec!(9), dec!(11.5)));

        assert_eq!(series.len(), 1);
        let stored = &series.candles()[0];
        assert_eq!(stored.high, dec!(13));
        assert_eq!(stored.close, dec!(11.5));
    }

    #[test]
    fn test_replace_takes_every_field_from_newest() {
        let mut series = CandleSeries::new();
        series.push_update(bar(60, dec!(10), dec!(20), dec!(5), dec!(15)));
        series.push_update(bar(60, dec!(11), dec!(12), dec!(10), dec!(11)));

        let stored = series.get(Utc.timestamp_opt(60, 0).unwrap()).unwrap();
        assert_eq!(stored.open, dec!(11));
        assert_eq!(stored.high, dec!(12));
        assert_eq!(stored.low, dec!(10));
    }

    #[test]
    fn test_dedup_by_timestamp() {
        let mut series = CandleSeries::new();
        for ts in [300, 60, 120, 60, 300, 180, 120] {
            series.push_update(bar(ts, dec!(1), dec!(1), dec!(1), dec!(1)));
        }
        assert_eq!(times(&series), vec![60, 120, 180, 300]);
    }

    #[test]
    fn test_snapshot_sorted_and_deduplicated() {
        let mut series = CandleSeries::new();
        let resolved = series.resolve_snapshot(vec![
            bar(180, dec!(3), dec!(3), dec!(3), dec!(3)),
            bar(60, dec!(1), dec!(1), dec!(1), dec!(1)),
            bar(120, dec!(2), dec!(2), dec!(2), dec!(2)),
            bar(60, dec!(4), dec!(4), dec!(4), dec!(4)),
        ]);

        assert!(resolved);
        assert_eq!(times(&series), vec![60, 120, 180]);
        assert_eq!(series.candles()[0].open, dec!(4));
    }

    #[test]
    fn test_snapshot_resolves_once() {
        let mut series = CandleSeries::new();
        assert!(series.resolve_snapshot(vec![bar(60, dec!(1), dec!(1), dec!(1), dec!(1))]));
        assert!(!series.resolve_snapshot(vec![bar(120, dec!(2), dec!(2), dec!(2), dec!(2))]));
        assert_eq!(times(&series), vec![60]);
        assert!(series.is_snapshot_resolved());
    }

    #[test]
    fn test_streamed_bars_survive_late_snapshot() {
        let mut series = CandleSeries::new();
        series.push_update(bar(120, dec!(9), dec!(9), dec!(9), dec!(9)));

        series.resolve_snapshot(vec![
            bar(60, dec!(1), dec!(1), dec!(1), dec!(1)),
            bar(120, dec!(2), dec!(2), dec!(2), dec!(2)),
        ]);

        assert_eq!(times(&series), vec![60, 120]);
        assert_eq!(series.last().unwrap().open, dec!(9));
    }

    #[test]
    fn test_retention_drops_oldest() {
        let mut series = CandleSeries::with_retention(2);
        for ts in [60, 120, 180] {
            series.push_update(bar(ts, dec!(1), dec!(1), dec!(1), dec!(1)));
        }
        assert_eq!(times(&series), vec![120, 180]);
    }
}
