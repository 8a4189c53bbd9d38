use marketfeed_core::{AssetPair, AssetTrade, Timestamp};

use crate::application::feed::{Feed, FeedReceiver};

/// Trade feed for one pair
pub struct TradeStream {
    pair: AssetPair,
    feed: Feed<AssetTrade>,
    last_trade_time: Option<Timestamp>,
    /// Internal consumers (e.g. candle builders) keeping the channel alive
    pins: usize,
}

impl TradeStream {
    pub fn new(pair: AssetPair, capacity: usize) -> Self {
        TradeStream {
            pair,
            feed: Feed::new(capacity),
            last_trade_time: None,
            pins: 0,
        }
    }

    pub fn pair(&self) -> &AssetPair {
        &self.pair
    }

    pub fn subscribe(&self) -> FeedReceiver<AssetTrade> {
        self.feed.subscribe()
    }

    /// Publish a trade unless it is older than the last one published.
    /// Returns false for dropped trades.
    pub fn publish(&mut self, trade: AssetTrade) -> bool {
        if let Some(last) = self.last_trade_time
            && trade.timestamp < last
        {
            tracing::trace!(symbol = %self.pair.symbol, "Dropping out-of-date trade");
            return false;
        }
        self.last_trade_time = Some(trade.timestamp);
        self.feed.publish(trade);
        true
    }

    /// Publish a batch oldest first, as snapshots are delivered in any order
    pub fn publish_batch(&mut self, mut trades: Vec<AssetTrade>) -> Vec<AssetTrade> {
        trades.sort_by_key(|t| t.timestamp);
        trades.into_iter().filter(|t| self.publish(t.clone())).collect()
    }

    pub fn pin(&mut self) {
        self.pins += 1;
    }

    pub fn unpin(&mut self) {
        self.pins = self.pins.saturating_sub(1);
    }

    /// Receivers attached to the feed, pins excluded
    pub fn subscriber_count(&self) -> usize {
        self.feed.listener_count()
    }

    pub fn listener_count(&self) -> usize {
        self.feed.listener_count() + self.pins
    }
}
