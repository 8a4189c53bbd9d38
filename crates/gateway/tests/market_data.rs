//! Integration tests: exchange adapters driven end to end
//!
//! Each adapter runs on an in-memory transport and a scripted REST fetcher.
//! Wire frames go in through `process`; normalized events come out of the
//! adapter's feeds exactly as a consumer would see them.

use async_trait::async_trait;
use marketfeed_core::{BookAction, TickerDirection, Timeframe, TradeType};
use marketfeed_gateway::{
    AdapterOptions, BitfinexAdapter, BitstampAdapter, ExchangeAdapter, ExchangeId,
    ExchangeRegistry, FetchError, GdaxAdapter, PoloniexAdapter, RequestLimits, RestFetcher,
    TransportError, WsEvent, WsTransport,
};
use parking_lot::Mutex;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// === Test doubles ===

/// Transport that keeps every frame written to it
#[derive(Default)]
struct MemoryTransport {
    sent: Mutex<Vec<String>>,
}

impl MemoryTransport {
    fn take(&self) -> Vec<Value> {
        self.sent
            .lock()
            .drain(..)
            .filter_map(|text| serde_json::from_str(&text).ok())
            .collect()
    }
}

impl WsTransport for MemoryTransport {
    fn send(&self, text: String) -> Result<(), TransportError> {
        self.sent.lock().push(text);
        Ok(())
    }
}

/// Fetcher answering from a path table; unknown paths get a 404
#[derive(Default)]
struct ScriptedFetcher {
    bodies: Mutex<HashMap<String, Value>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    fn with(self, path: &str, body: Value) -> Self {
        self.bodies.lock().insert(path.to_string(), body);
        self
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl RestFetcher for ScriptedFetcher {
    async fn get(&self, path: &str) -> Result<Value, FetchError> {
        self.requests.lock().push(path.to_string());
        self.bodies.lock().get(path).cloned().ok_or(FetchError::Api {
            status: 404,
            message: path.to_string(),
        })
    }
}

fn options() -> AdapterOptions {
    AdapterOptions::default().with_limits(RequestLimits::new(50))
}

fn message(value: Value) -> WsEvent {
    WsEvent::Message(value.to_string())
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

// === Registry ===

#[tokio::test]
async fn test_registry_routes_by_exchange_id() {
    let registry = ExchangeRegistry::new();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let bitfinex = Arc::new(BitfinexAdapter::with_transport(
        Arc::new(MemoryTransport::default()),
        fetcher.clone(),
        options(),
    ));
    let gdax = Arc::new(GdaxAdapter::with_transport(
        Arc::new(MemoryTransport::default()),
        fetcher,
        options(),
    ));
    registry.register(gdax);
    registry.register(bitfinex);

    assert_eq!(registry.exchanges(), vec![ExchangeId::bitfinex(), ExchangeId::gdax()]);
    let adapter = registry.get(&ExchangeId::new("GDAX")).unwrap();
    assert_eq!(adapter.id(), ExchangeId::gdax());
    assert!(registry.get(&ExchangeId::new("kraken")).is_none());

    registry.shutdown_all();
    assert!(!*adapter.connection_state().borrow());
}

// === Normalization across exchanges ===

#[tokio::test]
async fn test_trades_normalized_across_exchanges() {
    let bitfinex = BitfinexAdapter::with_transport(
        Arc::new(MemoryTransport::default()),
        Arc::new(ScriptedFetcher::default()),
        options(),
    );
    let bitstamp = BitstampAdapter::with_transport(
        Arc::new(MemoryTransport::default()),
        Arc::new(ScriptedFetcher::default()),
        options(),
    );
    bitfinex.process(WsEvent::Connected);
    bitstamp.process(WsEvent::Connected);

    let adapters: [&dyn ExchangeAdapter; 2] = [&bitfinex, &bitstamp];
    let mut feeds: Vec<_> = adapters.iter().map(|a| a.subscribe_trades("BTCUSD")).collect();

    bitfinex.process(message(json!({"event": "subscribed", "channel": "trades", "chanId": 5, "symbol": "tBTCUSD"})));
    bitfinex.process(message(json!([5, "tu", [1, 1500000000000u64, -0.5, 4000]])));
    bitstamp.process(message(json!({"event": "trade", "channel": "live_trades_btcusd",
        "data": {"price_str": "4000", "amount_str": "0.5", "type": 1, "timestamp": "1500000000"}})));

    let trades: Vec<_> = feeds.iter_mut().map(|feed| feed.try_recv().unwrap()).collect();
    assert_eq!(trades[0], trades[1]);
    assert_eq!(trades[0].trade_type, TradeType::Sell);
    assert_eq!(trades[0].volume, dec!(0.5));
    assert_eq!(trades[0].secondary.shortcode(), "USD");
}

// === Subscription lifecycle ===

#[tokio::test]
async fn test_reconnect_replays_channels_in_request_order() {
    let transport = Arc::new(MemoryTransport::default());
    let adapter = BitfinexAdapter::with_transport(
        transport.clone(),
        Arc::new(ScriptedFetcher::default()),
        options(),
    );
    let _ticker = adapter.subscribe_ticker("ETHUSD");
    let _trades = adapter.subscribe_trades("BTCUSD");
    let _book = adapter.get_order_book("BTCUSD");

    adapter.process(WsEvent::Connected);
    let first: Vec<_> = transport.take().iter().map(|f| f["channel"].clone()).collect();
    assert_eq!(first, vec![json!("ticker"), json!("trades"), json!("book")]);

    adapter.process(WsEvent::Disconnected);
    assert!(!*adapter.connection_state().borrow());
    assert!(transport.take().is_empty());

    adapter.process(WsEvent::Connected);
    let replay: Vec<_> = transport.take().iter().map(|f| f["channel"].clone()).collect();
    assert_eq!(replay, first);
}

#[tokio::test]
async fn test_shared_channel_torn_down_after_last_listener() {
    let transport = Arc::new(MemoryTransport::default());
    let adapter = GdaxAdapter::with_transport(
        transport.clone(),
        Arc::new(ScriptedFetcher::default()),
        options(),
    );
    adapter.process(WsEvent::Connected);
    let first = adapter.subscribe_ticker("BTCUSD");
    let second = adapter.subscribe_ticker("BTCUSD");
    assert_eq!(transport.take().len(), 1);
    adapter.process(message(json!({"type": "subscriptions",
        "channels": [{"name": "ticker", "product_ids": ["BTC-USD"]}]})));

    drop(first);
    adapter.unsubscribe_ticker("BTCUSD");
    assert!(transport.take().is_empty());

    drop(second);
    adapter.unsubscribe_ticker("BTCUSD");
    assert_eq!(
        transport.take(),
        vec![json!({"type": "unsubscribe", "product_ids": ["BTC-USD"], "channels": ["ticker"]})]
    );
}

// === Order books ===

#[tokio::test]
async fn test_bitstamp_book_buffers_until_rest_snapshot() {
    let fetcher = Arc::new(ScriptedFetcher::default().with(
        "order_book/btcusd/",
        json!({"microtimestamp": "2000", "bids": [["100", "1"]], "asks": [["102", "1"]]}),
    ));
    let adapter = BitstampAdapter::with_transport(
        Arc::new(MemoryTransport::default()),
        fetcher.clone(),
        options(),
    );
    adapter.process(WsEvent::Connected);
    let book = adapter.get_order_book("BTCUSD");
    let mut events = adapter.order_book_events("BTCUSD");

    adapter.process(message(json!({"event": "bts:subscription_succeeded",
        "channel": "diff_order_book_btcusd", "data": {}})));
    adapter.process(message(json!({"event": "data", "channel": "diff_order_book_btcusd",
        "data": {"microtimestamp": "2500", "bids": [["101", "2"]], "asks": []}})));
    assert!(book.is_empty());

    eventually(|| !book.is_empty()).await;
    assert_eq!(book.best_bid().unwrap().price, dec!(101));
    assert_eq!(book.spread(), Some(dec!(1)));
    assert_eq!(fetcher.requests(), vec!["order_book/btcusd/"]);
    assert!(events.drain().iter().all(|change| change.action == BookAction::Update));
}

#[tokio::test]
async fn test_poloniex_book_and_trades_share_pair_channel() {
    let transport = Arc::new(MemoryTransport::default());
    let adapter = PoloniexAdapter::with_transport(
        transport.clone(),
        Arc::new(ScriptedFetcher::default()),
        options(),
    );
    adapter.process(WsEvent::Connected);
    let book = adapter.get_order_book("ETHBTC");
    let mut trades = adapter.subscribe_trades("ETHBTC");
    assert_eq!(transport.take(), vec![json!({"command": "subscribe", "channel": "BTC_ETH"})]);

    adapter.process(message(json!([148, 1, [["i", {"currencyPair": "BTC_ETH",
        "orderBook": [{"0.0502": "4"}, {"0.0500": "3"}]}]]])));
    adapter.process(message(json!([148, 2, [
        ["o", 1, "0.0500", "0"],
        ["t", "9", 0, "0.0500", "3", 1500000000]
    ]])));

    assert!(book.best_bid().is_none());
    assert_eq!(book.best_ask().unwrap().size, dec!(4));
    let trade = trades.try_recv().unwrap();
    assert_eq!(trade.trade_type, TradeType::Sell);
    assert_eq!(trade.primary.shortcode(), "ETH");
}

// === Candles ===

#[tokio::test]
async fn test_bitstamp_candles_seeded_then_built_from_trades() {
    let fetcher = Arc::new(ScriptedFetcher::default().with(
        "ohlc/btcusd/?step=60&limit=200",
        json!({"data": {"pair": "BTC/USD", "ohlc": [
            {"timestamp": "1499999940", "open": "95", "high": "99", "low": "94", "close": "98", "volume": "3"},
            {"timestamp": "1500000000", "open": "98", "high": "100", "low": "97", "close": "99", "volume": "2"}
        ]}}),
    ));
    let transport = Arc::new(MemoryTransport::default());
    let adapter = BitstampAdapter::with_transport(transport.clone(), fetcher, options());
    adapter.process(WsEvent::Connected);

    let tf = Timeframe::one_minute();
    let mut ready = adapter.candle_snapshot_ready("BTCUSD", tf);
    let mut updates = adapter.subscribe_candles("BTCUSD", tf);
    assert_eq!(
        transport.take(),
        vec![json!({"event": "bts:subscribe", "data": {"channel": "live_trades_btcusd"}})]
    );

    tokio::time::timeout(Duration::from_secs(1), ready.wait_for(|ready| *ready))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(adapter.get_candle_snapshot("BTCUSD", tf).len(), 2);

    adapter.process(message(json!({"event": "trade", "channel": "live_trades_btcusd",
        "data": {"price_str": "101", "amount_str": "1", "type": 0, "timestamp": "1500000030"}})));
    let bar = updates.try_recv().unwrap();
    assert_eq!((bar.open, bar.high, bar.close), (dec!(98), dec!(101), dec!(101)));
    assert_eq!(bar.volume, dec!(3));

    let candles = adapter.get_candle_snapshot("BTCUSD", tf);
    assert_eq!(candles.len(), 2);
    assert_eq!(candles[1], bar);
}

// === Tickers ===

#[tokio::test]
async fn test_ticker_direction_follows_last_price() {
    let adapter = BitfinexAdapter::with_transport(
        Arc::new(MemoryTransport::default()),
        Arc::new(ScriptedFetcher::default()),
        options(),
    );
    adapter.process(WsEvent::Connected);
    let mut ticker = adapter.subscribe_ticker("BTCUSD");
    adapter.process(message(json!({"event": "subscribed", "channel": "ticker", "chanId": 2, "symbol": "tBTCUSD"})));

    for last in [100, 101, 99, 99] {
        adapter.process(message(json!([2, [98, 1, 102, 1, 1, 0.01, last, 10, 105, 95]])));
    }
    let directions: Vec<_> = ticker.drain().iter().map(|update| update.direction).collect();
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

// === Pairs ===

#[tokio::test]
async fn test_pairs_fetched_once_then_cached() {
    let fetcher = Arc::new(ScriptedFetcher::default().with(
        "/products",
        json!([{"id": "BTC-USD", "base_currency": "BTC", "quote_currency": "USD"},
               {"id": "ETH-EUR", "base_currency": "ETH", "quote_currency": "EUR"}]),
    ));
    let adapter = GdaxAdapter::with_transport(
        Arc::new(MemoryTransport::default()),
        fetcher.clone(),
        options(),
    );

    let pairs = adapter.list_available_pairs().await;
    let symbols: Vec<_> = pairs.iter().map(|pair| pair.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["BTCUSD", "ETHEUR"]);
    assert_eq!(adapter.list_available_pairs().await, pairs);
    assert_eq!(fetcher.requests(), vec!["/products"]);
}
