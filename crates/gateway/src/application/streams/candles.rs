use marketfeed_core::{AssetTrade, CandleSeries, CandleStick, Timeframe};
use tokio::sync::watch;

use crate::application::feed::{Feed, FeedReceiver};

/// Candle series for one (symbol, timeframe) plus its update feed
pub struct CandleStream {
    symbol: String,
    timeframe: Timeframe,
    series: CandleSeries,
    feed: Feed<CandleStick>,
    ready: watch::Sender<bool>,
}

impl CandleStream {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        capacity: usize,
        retention: Option<usize>,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        CandleStream {
            symbol: symbol.into(),
            timeframe,
            series: retention.map_or_else(CandleSeries::new, CandleSeries::with_retention),
            feed: Feed::new(capacity),
            ready,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn subscribe(&self) -> FeedReceiver<CandleStick> {
        self.feed.subscribe()
    }

    /// Flips to true once the snapshot has been merged
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.series.is_snapshot_resolved()
    }

    pub fn candles(&self) -> Vec<CandleStick> {
        self.series.candles().to_vec()
    }

    /// Merge the historical snapshot; later calls are no-ops
    pub fn resolve_snapshot<I>(&mut self, bars: I) -> bool
    where
        I: IntoIterator<Item = CandleStick>,
    {
        if !self.series.resolve_snapshot(bars) {
            return false;
        }
        tracing::debug!(
            symbol = %self.symbol,
            timeframe = %self.timeframe,
            candles = self.series.len(),
            "Candle snapshot resolved"
        );
        self.ready.send_replace(true);
        true
    }

    pub fn push_update(&mut self, bar: CandleStick) {
        let stored = self.series.push_update(bar);
        self.feed.publish(stored);
    }

    /// Fold an executed trade into its bucket.
    ///
    /// Trades seen before the snapshot resolves are ignored; the snapshot
    /// already covers them.
    pub fn fold_trade(&mut self, trade: &AssetTrade) {
        if !self.series.is_snapshot_resolved() {
            return;
        }
        let bucket = self.timeframe.bucket_start(trade.timestamp);
        let bar = match self.series.get(bucket) {
            Some(current) => current.with_trade(trade.price, trade.volume),
            None => CandleStick::opening(bucket, trade.price, trade.volume),
        };
        self.push_update(bar);
    }

    pub fn listener_count(&self) -> usize {
        self.feed.listener_count() + self.ready.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use marketfeed_core::AssetPair;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade(secs: i64, price: Decimal, amount: Decimal) -> AssetTrade {
        AssetTrade::from_signed_amount(
            &AssetPair::from_symbol("BTCUSD"),
            price,
            amount,
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    fn bar(secs: i64, close: Decimal) -> CandleStick {
        CandleStick::opening(Utc.timestamp_opt(secs, 0).unwrap(), close, dec!(1))
    }

    #[test]
    fn test_ready_flips_once() {
        let mut stream = CandleStream::new("BTCUSD", Timeframe::one_minute(), 16, None);
        let ready = stream.ready();
        assert!(!*ready.borrow());

        assert!(stream.resolve_snapshot(vec![bar(60, dec!(1))]));
        assert!(*ready.borrow());
        assert!(!stream.resolve_snapshot(vec![bar(120, dec!(2))]));
        assert_eq!(stream.candles().len(), 1);
    }

    #[test]
    fn test_trades_fold_into_buckets() {
        let mut stream = CandleStream::new("BTCUSD", Timeframe::one_minute(), 16, None);
        stream.resolve_snapshot(vec![bar(60, dec!(100))]);
        let mut rx = stream.subscribe();

        stream.fold_trade(&trade(70, dec!(105), dec!(0.5)));
        stream.fold_trade(&trade(80, dec!(95), dec!(-0.5)));
        stream.fold_trade(&trade(121, dec!(97), dec!(2)));

        let candles = stream.candles();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open, dec!(100));
        assert_eq!(candles[0].high, dec!(105));
        assert_eq!(candles[0].low, dec!(95));
        assert_eq!(candles[0].close, dec!(95));
        assert_eq!(candles[0].volume, dec!(2));
        assert_eq!(candles[1].timestamp.timestamp(), 120);
        assert_eq!(candles[1].open, dec!(97));
        assert_eq!(rx.drain().len(), 3);
    }

    #[test]
    fn test_trades_before_snapshot_ignored() {
        let mut stream = CandleStream::new("BTCUSD", Timeframe::one_minute(), 16, None);
        stream.fold_trade(&trade(70, dec!(105), dec!(1)));
        assert!(stream.candles().is_empty());
    }

    #[test]
    fn test_ready_receivers_count_as_listeners() {
        let stream = CandleStream::new("BTCUSD", Timeframe::one_minute(), 16, None);
        let ready = stream.ready();
        let rx = stream.subscribe();
        assert_eq!(stream.listener_count(), 2);
        drop(ready);
        drop(rx);
        assert_eq!(stream.listener_count(), 0);
    }
}
