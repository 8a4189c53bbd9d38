use marketfeed_core::{TickerDirection, TickerSnapshot, TickerUpdate};

use crate::application::feed::{Feed, FeedReceiver};

/// Ticker feed for one pair. New listeners get the latest ticker first.
pub struct TickerStream {
    feed: Feed<TickerUpdate>,
    last: Option<TickerSnapshot>,
}

impl TickerStream {
    pub fn new(capacity: usize) -> Self {
        TickerStream {
            feed: Feed::replaying(capacity),
            last: None,
        }
    }

    pub fn subscribe(&self) -> FeedReceiver<TickerUpdate> {
        self.feed.subscribe()
    }

    /// Replace the current ticker. Snapshots older than the current one are
    /// ignored.
    pub fn publish(&mut self, snapshot: TickerSnapshot) -> Option<TickerDirection> {
        if let Some(prev) = &self.last
            && snapshot.timestamp < prev.timestamp
        {
            return None;
        }
        let direction = TickerDirection::between(self.last.as_ref(), &snapshot);
        self.feed.publish(TickerUpdate {
            snapshot: snapshot.clone(),
            direction,
        });
        self.last = Some(snapshot);
        Some(direction)
    }

    pub fn last(&self) -> Option<&TickerSnapshot> {
        self.last.as_ref()
    }

    pub fn listener_count(&self) -> usize {
        self.feed.listener_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn ticker(last: Decimal, secs: i64) -> TickerSnapshot {
        TickerSnapshot {
            last_price: last,
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_direction_tracks_last_price() {
        let mut stream = TickerStream::new(8);
        let mut rx = stream.subscribe();

        stream.publish(ticker(dec!(100), 1));
        stream.publish(ticker(dec!(101), 2));
        stream.publish(ticker(dec!(99), 3));
        stream.publish(ticker(dec!(99), 4));

        let directions: Vec<TickerDirection> = rx.drain().into_iter().map(|u| u.direction).collect();
        assert_eq!(
            directions,
            vec![
                TickerDirection::Unchanged,
                TickerDirection::Up,
                TickerDirection::Down,
                TickerDirection::Unchanged
            ]
        );
    }

    #[test]
    fn test_stale_ticker_ignored() {
        let mut stream = TickerStream::new(8);
        stream.publish(ticker(dec!(100), 10));
        assert_eq!(stream.publish(ticker(dec!(90), 5)), None);
        assert_eq!(stream.last().unwrap().last_price, dec!(100));
    }

    #[test]
    fn test_late_listener_gets_current_ticker() {
        let mut stream = TickerStream::new(8);
        stream.publish(ticker(dec!(100), 1));
        let mut rx = stream.subscribe();
        assert_eq!(rx.try_recv().unwrap().snapshot.last_price, dec!(100));
    }
}
