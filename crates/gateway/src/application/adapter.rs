use async_trait::async_trait;
use marketfeed_core::{AssetPair, AssetTrade, CandleStick, OrderBookChange, Timeframe, TickerUpdate};
use tokio::sync::watch;

use super::feed::FeedReceiver;
use super::streams::OrderBookHandle;
use crate::domain::ExchangeId;

/// Uniform market-data capability of one exchange.
///
/// Every operation is safe to call before the connection is up; channels are
/// queued and subscribed once it opens. Subscribing twice to the same channel
/// shares one wire subscription. Failures never surface as errors: callers see
/// empty results, closed feeds, or `connection_state() == false`.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn id(&self) -> ExchangeId;

    /// True while the WebSocket is connected
    fn connection_state(&self) -> watch::Receiver<bool>;

    /// Tradable pairs, cached after the first successful fetch
    async fn list_available_pairs(&self) -> Vec<AssetPair>;

    fn subscribe_trades(&self, symbol: &str) -> FeedReceiver<AssetTrade>;

    /// Tear down the trade channel once no listener is left
    fn unsubscribe_trades(&self, symbol: &str);

    /// Live book handle; holding it keeps the book channel alive
    fn get_order_book(&self, symbol: &str) -> OrderBookHandle;

    fn order_book_events(&self, symbol: &str) -> FeedReceiver<OrderBookChange>;

    fn unsubscribe_order_book(&self, symbol: &str);

    /// Candles currently held for the channel; empty until the snapshot resolves
    fn get_candle_snapshot(&self, symbol: &str, timeframe: Timeframe) -> Vec<CandleStick>;

    /// Becomes true once the candle snapshot has been merged
    fn candle_snapshot_ready(&self, symbol: &str, timeframe: Timeframe) -> watch::Receiver<bool>;

    fn subscribe_candles(&self, symbol: &str, timeframe: Timeframe) -> FeedReceiver<CandleStick>;

    fn unsubscribe_candles(&self, symbol: &str, timeframe: Timeframe);

    fn subscribe_ticker(&self, symbol: &str) -> FeedReceiver<TickerUpdate>;

    fn unsubscribe_ticker(&self, symbol: &str);

    /// Stop the connection task and the request queue
    fn shutdown(&self);
}
