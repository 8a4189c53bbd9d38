//! Bitstamp v2 websocket plus REST.
//!
//! Trades and order book diffs stream over the websocket. The book is
//! rebuilt from a REST snapshot taken once the diff channel is live; the
//! ticker is polled over REST and candles are built from trades.

mod decoders;

use async_trait::async_trait;
use marketfeed_core::{AssetPair, AssetTrade, CandleStick, OrderBookChange, TickerUpdate, Timeframe};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::common::{AdapterCore, AdapterOptions, spawn_event_loop};
use crate::application::{ExchangeAdapter, FeedReceiver, OrderBookHandle};
use crate::config::{ExchangeConfig, GlobalConfig};
use crate::domain::{
    ChannelKey, ChannelProtocol, ExchangeId, InformationKind, RestFetcher, WsEvent, WsTransport,
};
use crate::error::AdapterError;

#[derive(Debug, Default)]
pub struct BitstampProtocol;

impl ChannelProtocol for BitstampProtocol {
    fn subscribe_command(&self, key: &ChannelKey) -> Option<String> {
        let channel = decoders::channel_name(key)?;
        Some(json!({"event": "bts:subscribe", "data": {"channel": channel}}).to_string())
    }

    fn unsubscribe_command(&self, key: &ChannelKey, _transport_id: Option<&str>) -> Option<String> {
        let channel = decoders::channel_name(key)?;
        Some(json!({"event": "bts:unsubscribe", "data": {"channel": channel}}).to_string())
    }

    fn feeding_channel(&self, key: &ChannelKey) -> Option<ChannelKey> {
        (key.kind == InformationKind::Candles).then(|| ChannelKey::trades(&key.symbol))
    }
}

type Core = AdapterCore<BitstampProtocol>;

pub struct BitstampAdapter {
    core: Arc<Core>,
    /// Ticker poll loop per symbol
    pollers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl BitstampAdapter {
    pub fn connect(config: &ExchangeConfig, global: &GlobalConfig) -> Result<Self, AdapterError> {
        let (core, events) = Core::connect(ExchangeId::bitstamp(), BitstampProtocol, config, global)?;
        core.track(spawn_event_loop(&core, events, handle_event));
        Ok(BitstampAdapter::from_core(core))
    }

    pub fn with_transport(
        transport: Arc<dyn WsTransport>,
        fetcher: Arc<dyn RestFetcher>,
        options: AdapterOptions,
    ) -> Self {
        let core = AdapterCore::new(
            ExchangeId::bitstamp(),
            BitstampProtocol,
            transport,
            fetcher,
            options,
            None,
        );
        BitstampAdapter::from_core(Arc::new(core))
    }

    fn from_core(core: Arc<Core>) -> Self {
        BitstampAdapter {
            core,
            pollers: Mutex::new(HashMap::new()),
        }
    }

    pub fn process(&self, event: WsEvent) {
        handle_event(&self.core, event);
    }

    fn seed_candles(&self, created: bool, symbol: &str, timeframe: Timeframe) {
        if !created {
            return;
        }
        // limit is the configured history length, 200 by default
        let path = format!(
            "ohlc/{}/?step={}&limit={}",
            decoders::url_symbol(symbol),
            timeframe.seconds(),
            self.core.options.candle_history,
        );
        self.core.seed_candles(symbol, timeframe, Some(path), decoders::parse_ohlc);
    }

    /// Poll `ticker/{pair}/` until the ticker channel goes away
    fn start_polling(&self, symbol: &str) {
        let symbol = symbol.to_uppercase();
        let task = tokio::spawn(poll_ticker(
            Arc::downgrade(&self.core),
            symbol.clone(),
        ));
        if let Some(previous) = self.pollers.lock().insert(symbol, task) {
            previous.abort();
        }
    }
}

async fn poll_ticker(core: Weak<Core>, symbol: String) {
    let key = ChannelKey::ticker(&symbol);
    let path = format!("ticker/{}/", decoders::url_symbol(&symbol));
    let (queue, period) = match core.upgrade() {
        Some(core) => (core.queue.clone(), core.options.ticker_poll_interval),
        None => return,
    };
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;
        match core.upgrade() {
            Some(core) if core.session.lock().contains(&key) => {}
            _ => break,
        }

        let result = queue.request(path.clone()).await;
        let Some(core) = core.upgrade() else {
            break;
        };
        let body = match result {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(exchange = %core.id, %symbol, error = %e, "Ticker poll failed");
                continue;
            }
        };
        let Some(snapshot) = decoders::parse_ticker(&body) else {
            tracing::debug!(exchange = %core.id, %symbol, "Malformed ticker");
            continue;
        };
        if let Some(ticker) = core.session.lock().existing_ticker(&symbol) {
            ticker.publish(snapshot);
        }
    }
    tracing::debug!(%symbol, "Ticker polling stopped");
}

fn handle_event(core: &Arc<Core>, event: WsEvent) {
    let Some(text) = core.on_event(event) else {
        return;
    };
    let envelope: decoders::Envelope = match serde_json::from_str(&text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!(exchange = %core.id, error = %e, "Malformed message");
            return;
        }
    };

    match envelope.event.as_str() {
        "bts:subscription_succeeded" => {
            let Some(key) = decoders::channel_key(&envelope.channel) else {
                tracing::debug!(exchange = %core.id, channel = %envelope.channel, "Ack for unknown channel");
                return;
            };
            let confirmed = core
                .session
                .lock()
                .confirm(&key, envelope.channel.clone(), &*core.transport);
            if confirmed && key.kind == InformationKind::OrderBook {
                request_book_snapshot(core, &key.symbol);
            }
        }
        "bts:unsubscription_succeeded" => {
            core.session
                .lock()
                .on_unsubscribed(&envelope.channel, &*core.transport);
        }
        "trade" => {
            let Some(key) = decoders::channel_key(&envelope.channel) else {
                return;
            };
            let mut session = core.session.lock();
            let Some(pair) = session.existing_trades(&key.symbol).map(|t| t.pair().clone()) else {
                return;
            };
            match decoders::parse_trade(&pair, &envelope.data) {
                Some(trade) => session.publish_trades(&key.symbol, vec![trade]),
                None => tracing::debug!(exchange = %core.id, channel = %key, "Malformed trade"),
            }
        }
        "data" => {
            let Some(key) = decoders::channel_key(&envelope.channel) else {
                return;
            };
            if let Some(book) = core.session.lock().existing_book(&key.symbol) {
                for delta in decoders::parse_diff(&envelope.data) {
                    book.handle_delta(delta);
                }
            }
        }
        "bts:request_reconnect" => {
            tracing::info!(exchange = %core.id, "Exchange requested a reconnect");
        }
        "bts:error" => {
            let message = envelope.data.get("message").and_then(|m| m.as_str()).unwrap_or_default();
            tracing::warn!(exchange = %core.id, channel = %envelope.channel, error = %message, "Feed error");
        }
        other => tracing::trace!(exchange = %core.id, event = %other, "Ignored event"),
    }
}

/// Fetch the full ladder; diffs buffered meanwhile are replayed on top of
/// it when newer than its microtimestamp.
fn request_book_snapshot(core: &Arc<Core>, symbol: &str) {
    let path = format!("order_book/{}/", decoders::url_symbol(symbol));
    let symbol = symbol.to_uppercase();
    core.fetch_then(path, move |core, body| {
        let snapshot = decoders::parse_book_snapshot(&body);
        if let Some(book) = core.session.lock().existing_book(&symbol) {
            book.apply_snapshot(snapshot.bids, snapshot.asks, snapshot.sequence);
        }
    });
}

#[async_trait]
impl ExchangeAdapter for BitstampAdapter {
    fn id(&self) -> ExchangeId {
        self.core.id.clone()
    }

    fn connection_state(&self) -> watch::Receiver<bool> {
        self.core.connection_state()
    }

    async fn list_available_pairs(&self) -> Vec<AssetPair> {
        if let Some(pairs) = self.core.cached_pairs() {
            return pairs;
        }
        match self.core.queue.request("trading-pairs-info/").await {
            Ok(body) => {
                let pairs = decoders::parse_pairs(&body);
                if !pairs.is_empty() {
                    self.core.store_pairs(pairs.clone());
                }
                pairs
            }
            Err(e) => {
                tracing::warn!(exchange = %self.core.id, error = %e, "Failed to fetch pairs");
                Vec::new()
            }
        }
    }

    fn subscribe_trades(&self, symbol: &str) -> FeedReceiver<AssetTrade> {
        self.core.subscribe_trades(symbol).0
    }

    fn unsubscribe_trades(&self, symbol: &str) {
        self.core.release(ChannelKey::trades(symbol));
    }

    fn get_order_book(&self, symbol: &str) -> OrderBookHandle {
        self.core.order_book(symbol).0
    }

    fn order_book_events(&self, symbol: &str) -> FeedReceiver<OrderBookChange> {
        self.core.order_book_events(symbol).0
    }

    fn unsubscribe_order_book(&self, symbol: &str) {
        self.core.release(ChannelKey::order_book(symbol));
    }

    fn get_candle_snapshot(&self, symbol: &str, timeframe: Timeframe) -> Vec<CandleStick> {
        let (candles, created) = self.core.candle_snapshot(symbol, timeframe);
        self.seed_candles(created, symbol, timeframe);
        candles
    }

    fn candle_snapshot_ready(&self, symbol: &str, timeframe: Timeframe) -> watch::Receiver<bool> {
        let (ready, created) = self.core.candle_snapshot_ready(symbol, timeframe);
        self.seed_candles(created, symbol, timeframe);
        ready
    }

    fn subscribe_candles(&self, symbol: &str, timeframe: Timeframe) -> FeedReceiver<CandleStick> {
        let (rx, created) = self.core.subscribe_candles(symbol, timeframe);
        self.seed_candles(created, symbol, timeframe);
        rx
    }

    fn unsubscribe_candles(&self, symbol: &str, timeframe: Timeframe) {
        self.core.release(ChannelKey::candles(symbol, timeframe));
    }

    fn subscribe_ticker(&self, symbol: &str) -> FeedReceiver<TickerUpdate> {
        let (rx, created) = self.core.subscribe_ticker(symbol);
        if created {
            self.start_polling(symbol);
        }
        rx
    }

    fn unsubscribe_ticker(&self, symbol: &str) {
        let key = ChannelKey::ticker(symbol);
        self.core.release(key.clone());
        if !self.core.session.lock().contains(&key)
            && let Some(poller) = self.pollers.lock().remove(&key.symbol)
        {
            poller.abort();
        }
    }

    fn shutdown(&self) {
        for (_, poller) in self.pollers.lock().drain() {
            poller.abort();
        }
        self.core.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchanges::testing::{self, RecordingTransport, TableFetcher};
    use crate::domain::SyncStatus;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use std::time::Duration;

    fn adapter(fetcher: TableFetcher) -> (BitstampAdapter, Arc<RecordingTransport>, Arc<TableFetcher>) {
        let transport = testing::transport();
        let fetcher = Arc::new(fetcher);
        let options = testing::options().with_visible_depth(25);
        let adapter = BitstampAdapter::with_transport(transport.clone(), fetcher.clone(), options);
        (adapter, transport, fetcher)
    }

    fn frame(adapter: &BitstampAdapter, value: Value) {
        adapter.process(WsEvent::Message(value.to_string()));
    }

    fn book_status(adapter: &BitstampAdapter, symbol: &str) -> SyncStatus {
        adapter.core.session.lock().existing_book(symbol).unwrap().status()
    }

    async fn settle(adapter: &BitstampAdapter, symbol: &str) {
        for _ in 0..100 {
            if book_status(adapter, symbol) == SyncStatus::Synced {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_subscribe_command() {
        let (adapter, transport, _) = adapter(TableFetcher::default());
        adapter.process(WsEvent::Connected);
        let _trades = adapter.subscribe_trades("BTCUSD");
        assert_eq!(
            testing::sent_json(&transport),
            vec![json!({"event": "bts:subscribe", "data": {"channel": "live_trades_btcusd"}})]
        );
    }

    #[tokio::test]
    async fn test_book_synced_from_rest_snapshot() {
        let fetcher = TableFetcher::default().with(
            "order_book/btcusd/",
            json!({"timestamp": "1500000000", "microtimestamp": "100",
                "bids": [["100", "1"], ["99", "2"]], "asks": [["101", "1"]]}),
        );
        let (adapter, _transport, fetcher) = adapter(fetcher);
        adapter.process(WsEvent::Connected);
        let book = adapter.get_order_book("BTCUSD");
        assert_eq!(book_status(&adapter, "BTCUSD"), SyncStatus::Syncing);

        frame(&adapter, json!({"event": "bts:subscription_succeeded", "channel": "diff_order_book_btcusd", "data": {}}));
        // one diff older than the snapshot, one newer
        frame(&adapter, json!({"event": "data", "channel": "diff_order_book_btcusd",
            "data": {"microtimestamp": "90", "bids": [["98", "5"]], "asks": []}}));
        frame(&adapter, json!({"event": "data", "channel": "diff_order_book_btcusd",
            "data": {"microtimestamp": "110", "bids": [["100", "0"]], "asks": []}}));

        settle(&adapter, "BTCUSD").await;
        assert_eq!(fetcher.requested(), vec!["order_book/btcusd/"]);
        let bids: Vec<_> = book.bids().iter().map(|p| p.price).collect();
        assert_eq!(bids, vec![dec!(99)]);

        frame(&adapter, json!({"event": "data", "channel": "diff_order_book_btcusd",
            "data": {"microtimestamp": "120", "bids": [], "asks": [["100.5", "3"]]}}));
        assert_eq!(book.best_ask().unwrap().price, dec!(100.5));
    }

    #[tokio::test]
    async fn test_book_resynced_after_reconnect() {
        let fetcher = TableFetcher::default().with(
            "order_book/ethusd/",
            json!({"microtimestamp": "5", "bids": [["10", "1"]], "asks": []}),
        );
        let (adapter, _transport, fetcher) = adapter(fetcher);
        adapter.process(WsEvent::Connected);
        let _book = adapter.get_order_book("ETHUSD");
        let ack = json!({"event": "bts:subscription_succeeded", "channel": "diff_order_book_ethusd", "data": {}});
        frame(&adapter, ack.clone());
        settle(&adapter, "ETHUSD").await;

        adapter.process(WsEvent::Disconnected);
        assert_eq!(book_status(&adapter, "ETHUSD"), SyncStatus::OutOfSync);
        adapter.process(WsEvent::Connected);
        frame(&adapter, ack);
        settle(&adapter, "ETHUSD").await;
        assert_eq!(book_status(&adapter, "ETHUSD"), SyncStatus::Synced);
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_trades_and_type_codes() {
        let (adapter, _transport, _) = adapter(TableFetcher::default());
        let mut trades = adapter.subscribe_trades("BTCUSD");
        frame(&adapter, json!({"event": "trade", "channel": "live_trades_btcusd",
            "data": {"price_str": "100", "amount_str": "2", "type": 0, "timestamp": "1500000000"}}));
        let trade = trades.try_recv().unwrap();
        assert_eq!(trade.trade_type, marketfeed_core::TradeType::Buy);
        assert_eq!(trade.volume, dec!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_polled_while_subscribed() {
        let fetcher = TableFetcher::default().with(
            "ticker/btcusd/",
            json!({"last": "105", "open": "100", "bid": "104", "ask": "106", "high": "110",
                "low": "95", "volume": "10", "timestamp": "1500000000"}),
        );
        let (adapter, transport, fetcher) = adapter(fetcher);
        adapter.process(WsEvent::Connected);
        let mut ticker = adapter.subscribe_ticker("BTCUSD");
        assert!(transport.take().is_empty());

        let update = ticker.recv().await.unwrap();
        assert_eq!(update.snapshot.daily_change_percent, dec!(5));

        tokio::time::sleep(Duration::from_secs(11)).await;
        let polls = fetcher.requested().len();
        assert!(polls >= 3, "polled {polls} times");

        drop(ticker);
        adapter.unsubscribe_ticker("BTCUSD");
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fetcher.requested().len(), polls);
    }

    #[tokio::test]
    async fn test_pairs_from_rest() {
        let fetcher = TableFetcher::default().with(
            "trading-pairs-info/",
            json!([{"name": "BTC/USD", "url_symbol": "btcusd"}, {"name": "XRP/EUR", "url_symbol": "xrpeur"}]),
        );
        let (adapter, _transport, _) = adapter(fetcher);
        let pairs = adapter.list_available_pairs().await;
        let symbols: Vec<_> = pairs.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BTCUSD", "XRPEUR"]);
    }
}
