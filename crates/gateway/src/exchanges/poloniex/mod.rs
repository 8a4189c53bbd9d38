//! Poloniex push API.
//!
//! One websocket channel per currency pair carries both trades and book
//! updates; a single combined channel (1002) carries every pair's ticker.
//! Pair ids and the first ticker values come from REST `returnTicker`, and
//! candles are seeded from `returnChartData` and extended with live trades.

mod decoders;

use async_trait::async_trait;
use marketfeed_core::{
    AssetPair, AssetTrade, CandleStick, OrderBookChange, TickerSnapshot, TickerUpdate, Timeframe,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use self::decoders::{Frame, Market, MarketUpdate};
use super::common::{AdapterCore, AdapterOptions, candle_window, spawn_event_loop};
use crate::application::{ExchangeAdapter, FeedReceiver, OrderBookHandle};
use crate::config::{ExchangeConfig, GlobalConfig};
use crate::domain::{
    ChannelKey, ChannelProtocol, ExchangeId, InformationKind, RestFetcher, WsEvent, WsTransport,
};
use crate::error::AdapterError;

/// Chart periods per candle snapshot
const CANDLE_WINDOW: i64 = 200;

#[derive(Debug, Default)]
pub struct PoloniexProtocol {
    /// Symbol → currency pair, such as ETHBTC → BTC_ETH
    products: HashMap<String, String>,
    /// Numeric pair id used by ticker rows and pair channels
    pair_ids: HashMap<i64, String>,
    /// Last ticker seen per symbol, handed to new ticker feeds
    tickers: HashMap<String, TickerSnapshot>,
}

impl PoloniexProtocol {
    pub fn product(&self, symbol: &str) -> String {
        let symbol = symbol.to_uppercase();
        if let Some(product) = self.products.get(&symbol) {
            return product.clone();
        }
        let pair = AssetPair::from_symbol(&symbol);
        format!("{}_{}", pair.secondary, pair.primary)
    }

    fn symbol_of_product(&self, product: &str) -> Option<String> {
        self.products
            .iter()
            .find(|(_, p)| p.as_str() == product)
            .map(|(symbol, _)| symbol.clone())
            .or_else(|| decoders::pair_of(product).map(|pair| pair.symbol))
    }

    fn learn(&mut self, markets: &[Market]) {
        for market in markets {
            self.products
                .insert(market.pair.symbol.clone(), market.product.clone());
            if let Some(id) = market.id {
                self.pair_ids.insert(id, market.pair.symbol.clone());
            }
            self.tickers
                .insert(market.pair.symbol.clone(), market.ticker.clone());
        }
    }

    fn command(&self, command: &str, key: &ChannelKey) -> Option<String> {
        let channel = match key.kind {
            InformationKind::Ticker if key.is_aggregate() => json!(decoders::TICKER_CHANNEL),
            InformationKind::Market => json!(self.product(&key.symbol)),
            _ => return None,
        };
        Some(json!({"command": command, "channel": channel}).to_string())
    }
}

impl ChannelProtocol for PoloniexProtocol {
    fn subscribe_command(&self, key: &ChannelKey) -> Option<String> {
        self.command("subscribe", key)
    }

    fn unsubscribe_command(&self, key: &ChannelKey, _transport_id: Option<&str>) -> Option<String> {
        self.command("unsubscribe", key)
    }

    fn acknowledges_unsubscribe(&self) -> bool {
        false
    }

    fn feeding_channel(&self, key: &ChannelKey) -> Option<ChannelKey> {
        match key.kind {
            InformationKind::Trades | InformationKind::OrderBook => Some(ChannelKey::market(&key.symbol)),
            InformationKind::Candles => Some(ChannelKey::trades(&key.symbol)),
            InformationKind::Ticker if !key.is_aggregate() => Some(ChannelKey::aggregate(InformationKind::Ticker)),
            _ => None,
        }
    }
}

type Core = AdapterCore<PoloniexProtocol>;

pub struct PoloniexAdapter {
    core: Arc<Core>,
}

impl PoloniexAdapter {
    pub fn connect(config: &ExchangeConfig, global: &GlobalConfig) -> Result<Self, AdapterError> {
        let (core, events) =
            Core::connect(ExchangeId::poloniex(), PoloniexProtocol::default(), config, global)?;
        core.track(spawn_event_loop(&core, events, handle_event));
        Ok(PoloniexAdapter { core })
    }

    pub fn with_transport(
        transport: Arc<dyn WsTransport>,
        fetcher: Arc<dyn RestFetcher>,
        options: AdapterOptions,
    ) -> Self {
        let core = AdapterCore::new(
            ExchangeId::poloniex(),
            PoloniexProtocol::default(),
            transport,
            fetcher,
            options,
            None,
        );
        PoloniexAdapter {
            core: Arc::new(core),
        }
    }

    pub fn process(&self, event: WsEvent) {
        handle_event(&self.core, event);
    }

    fn seed_candles(&self, created: bool, symbol: &str, timeframe: Timeframe) {
        if !created {
            return;
        }
        let product = self.core.session.lock().protocol().product(symbol);
        let path = candle_window(timeframe, CANDLE_WINDOW).map(|(start, _)| {
            format!(
                "returnChartData&currencyPair={}&start={}&end=9999999999&period={}",
                product,
                start.timestamp(),
                timeframe.seconds(),
            )
        });
        self.core.seed_candles(symbol, timeframe, path, decoders::parse_chart);
    }

    /// Start a new ticker feed from the cached value, or load `returnTicker`
    /// when the combined channel has only just been requested.
    fn seed_ticker(&self, symbol: &str, combined_created: bool) {
        {
            let mut session = self.core.session.lock();
            let cached = session.protocol().tickers.get(&symbol.to_uppercase()).cloned();
            if let Some(snapshot) = cached {
                if let Some(ticker) = session.existing_ticker(symbol) {
                    ticker.publish(snapshot);
                }
                return;
            }
        }
        if combined_created {
            self.core.fetch_then("returnTicker".to_string(), |core, body| {
                apply_markets(core, decoders::parse_markets(&body));
            });
        }
    }
}

/// Record pair ids and products, cache the pair list and publish each
/// market's ticker to its feed.
fn apply_markets(core: &Core, markets: Vec<Market>) -> Vec<AssetPair> {
    if markets.is_empty() {
        return Vec::new();
    }
    let pairs: Vec<AssetPair> = markets.iter().map(|m| m.pair.clone()).collect();
    core.store_pairs(pairs.clone());

    let mut session = core.session.lock();
    session.protocol_mut().learn(&markets);
    for market in markets {
        if let Some(ticker) = session.existing_ticker(&market.pair.symbol) {
            ticker.publish(market.ticker);
        }
    }
    pairs
}

fn handle_event(core: &Arc<Core>, event: WsEvent) {
    let Some(text) = core.on_event(event) else {
        return;
    };
    let frame: Value = match serde_json::from_str(&text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(exchange = %core.id, error = %e, "Malformed message");
            return;
        }
    };
    if let Some(error) = frame.get("error").and_then(Value::as_str) {
        tracing::warn!(exchange = %core.id, %error, "Feed error");
        return;
    }

    match decoders::classify(&frame) {
        Some(Frame::Heartbeat) => {}
        Some(Frame::Ack(chan_id)) => {
            if let Some(key) = channel_for(core, chan_id, &[]) {
                core.session
                    .lock()
                    .confirm(&key, chan_id.to_string(), &*core.transport);
            }
        }
        Some(Frame::Ticker(row)) => handle_ticker(core, row),
        Some(Frame::Market { chan_id, seq, updates }) => {
            let Some(key) = channel_for(core, chan_id, updates) else {
                tracing::debug!(exchange = %core.id, chan_id, "Frame for unknown channel");
                return;
            };
            // the first frame on a pair channel stands in for the ack
            core.session
                .lock()
                .confirm(&key, chan_id.to_string(), &*core.transport);
            handle_market(core, &key.symbol, seq, updates);
        }
        None => tracing::debug!(exchange = %core.id, "Unrecognized frame"),
    }
}

/// Registry key for a numeric channel id, learning it from the frame when
/// the channel has not been seen yet.
fn channel_for(core: &Core, chan_id: i64, updates: &[Value]) -> Option<ChannelKey> {
    let session = core.session.lock();
    if let Some(key) = session.registry().key_for_transport_id(&chan_id.to_string()) {
        return Some(key.clone());
    }
    if chan_id == decoders::TICKER_CHANNEL {
        return Some(ChannelKey::aggregate(InformationKind::Ticker));
    }
    let protocol = session.protocol();
    let symbol = match decoders::snapshot_product(updates) {
        Some(product) => protocol.symbol_of_product(product)?,
        None => protocol.pair_ids.get(&chan_id)?.clone(),
    };
    let key = ChannelKey::market(symbol);
    session.contains(&key).then_some(key)
}

fn handle_market(core: &Core, symbol: &str, seq: i64, updates: &[Value]) {
    let mut session = core.session.lock();
    let pair = session.resolve_pair(symbol);
    let mut trades = Vec::new();

    for entry in updates {
        match decoders::parse_update(&pair, entry, seq) {
            Some(MarketUpdate::Snapshot { bids, asks }) => {
                if let Some(book) = session.existing_book(symbol) {
                    book.apply_snapshot(bids, asks, Some(seq));
                }
            }
            Some(MarketUpdate::Delta(delta)) => {
                if let Some(book) = session.existing_book(symbol) {
                    book.handle_delta(delta);
                }
            }
            Some(MarketUpdate::Trade(trade)) => trades.push(trade),
            None => tracing::debug!(exchange = %core.id, %symbol, %entry, "Dropped malformed update"),
        }
    }

    if !trades.is_empty() {
        session.publish_trades(symbol, trades);
    }
}

fn handle_ticker(core: &Core, row: &Value) {
    let Some((pair_id, snapshot)) = decoders::parse_ticker_row(row) else {
        tracing::debug!(exchange = %core.id, "Malformed ticker row");
        return;
    };
    let mut session = core.session.lock();
    let Some(symbol) = session.protocol().pair_ids.get(&pair_id).cloned() else {
        tracing::trace!(exchange = %core.id, pair_id, "Ticker for unknown pair id");
        return;
    };
    session
        .protocol_mut()
        .tickers
        .insert(symbol.clone(), snapshot.clone());
    if let Some(ticker) = session.existing_ticker(&symbol) {
        ticker.publish(snapshot);
    }
}

#[async_trait]
impl ExchangeAdapter for PoloniexAdapter {
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
        match self.core.queue.request("returnTicker").await {
            Ok(body) => apply_markets(&self.core, decoders::parse_markets(&body)),
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
        let combined = ChannelKey::aggregate(InformationKind::Ticker);
        let combined_created = !self.core.session.lock().contains(&combined);
        let (rx, created) = self.core.subscribe_ticker(symbol);
        if created {
            self.seed_ticker(symbol, combined_created);
        }
        rx
    }

    fn unsubscribe_ticker(&self, symbol: &str) {
        self.core.release(ChannelKey::ticker(symbol));
    }

    fn shutdown(&self) {
        self.core.shutdown();
    }
}
