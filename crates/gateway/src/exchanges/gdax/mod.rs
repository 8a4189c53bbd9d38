//! GDAX websocket feed.
//!
//! Trades, tickers and the level2 book are feed channels. Candles are built
//! locally: seeded from the REST history, then extended with live matches.

mod decoders;

use async_trait::async_trait;
use chrono::SecondsFormat;
use marketfeed_core::{AssetPair, AssetTrade, CandleStick, OrderBookChange, TickerUpdate, Timeframe};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

use self::decoders::Message;
use super::common::{AdapterCore, AdapterOptions, candle_window, spawn_event_loop};
use crate::application::{ExchangeAdapter, FeedReceiver, MarketSession, OrderBookHandle};
use crate::config::{ExchangeConfig, GlobalConfig};
use crate::domain::{
    ChannelKey, ChannelProtocol, ExchangeId, InformationKind, RestFetcher, SubscriptionState, WsEvent,
    WsTransport,
};
use crate::error::AdapterError;

/// Buckets per candle snapshot; the REST endpoint's maximum
const CANDLE_WINDOW: i64 = 200;

#[derive(Debug, Default)]
pub struct GdaxProtocol {
    /// Symbol → product id, learned from `/products`
    products: HashMap<String, String>,
}

impl GdaxProtocol {
    pub fn product_id(&self, symbol: &str) -> String {
        let symbol = symbol.to_uppercase();
        if let Some(id) = self.products.get(&symbol) {
            return id.clone();
        }
        let pair = AssetPair::from_symbol(&symbol);
        format!("{}-{}", pair.primary, pair.secondary)
    }

    fn command(&self, kind: &str, key: &ChannelKey) -> Option<String> {
        let channel = decoders::channel_name(key.kind)?;
        let command = json!({
            "type": kind,
            "product_ids": [self.product_id(&key.symbol)],
            "channels": [channel],
        });
        Some(command.to_string())
    }
}

impl ChannelProtocol for GdaxProtocol {
    fn subscribe_command(&self, key: &ChannelKey) -> Option<String> {
        self.command("subscribe", key)
    }

    fn unsubscribe_command(&self, key: &ChannelKey, _transport_id: Option<&str>) -> Option<String> {
        self.command("unsubscribe", key)
    }

    fn feeding_channel(&self, key: &ChannelKey) -> Option<ChannelKey> {
        (key.kind == InformationKind::Candles).then(|| ChannelKey::trades(&key.symbol))
    }
}

type Core = AdapterCore<GdaxProtocol>;

pub struct GdaxAdapter {
    core: Arc<Core>,
}

impl GdaxAdapter {
    pub fn connect(config: &ExchangeConfig, global: &GlobalConfig) -> Result<Self, AdapterError> {
        let (core, events) = Core::connect(ExchangeId::gdax(), GdaxProtocol::default(), config, global)?;
        core.track(spawn_event_loop(&core, events, handle_event));
        Ok(GdaxAdapter { core })
    }

    pub fn with_transport(
        transport: Arc<dyn WsTransport>,
        fetcher: Arc<dyn RestFetcher>,
        options: AdapterOptions,
    ) -> Self {
        let core = AdapterCore::new(
            ExchangeId::gdax(),
            GdaxProtocol::default(),
            transport,
            fetcher,
            options,
            None,
        );
        GdaxAdapter {
            core: Arc::new(core),
        }
    }

    pub fn process(&self, event: WsEvent) {
        handle_event(&self.core, event);
    }

    fn product_id(&self, symbol: &str) -> String {
        self.core.session.lock().protocol().product_id(symbol)
    }

    /// Seed the trade feed's first subscriber with the recent trade history
    fn seed_trades(&self, symbol: &str) {
        let path = format!("/products/{}/trades", self.product_id(symbol));
        let symbol = symbol.to_uppercase();
        self.core.fetch_then(path, move |core, body| {
            let mut session = core.session.lock();
            let Some(pair) = session.existing_trades(&symbol).map(|t| t.pair().clone()) else {
                return;
            };
            let trades = decoders::parse_rest_trades(&pair, body);
            session.publish_trades(&symbol, trades);
        });
    }

    fn seed_candles(&self, created: bool, symbol: &str, timeframe: Timeframe) {
        if !created {
            return;
        }
        let product = self.product_id(symbol);
        let path = candle_window(timeframe, CANDLE_WINDOW).map(|(start, end)| {
            format!(
                "/products/{}/candles?start={}&end={}&granularity={}",
                product,
                start.to_rfc3339_opts(SecondsFormat::Secs, true),
                end.to_rfc3339_opts(SecondsFormat::Secs, true),
                timeframe.seconds(),
            )
        });
        self.core.seed_candles(symbol, timeframe, path, decoders::parse_candles);
    }
}

fn handle_event(core: &Arc<Core>, event: WsEvent) {
    let Some(text) = core.on_event(event) else {
        return;
    };
    let message: Message = match serde_json::from_str(&text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(exchange = %core.id, error = %e, "Malformed message");
            return;
        }
    };

    let mut session = core.session.lock();
    match message {
        Message::Subscriptions { channels } => {
            on_subscriptions(&mut session, &channels, &*core.transport);
        }
        Message::Snapshot { product_id, bids, asks } => {
            if let Some(book) = session.existing_book(&decoders::symbol_of(&product_id)) {
                book.apply_snapshot(decoders::to_levels(&bids), decoders::to_levels(&asks), None);
            }
        }
        Message::L2Update { product_id, changes } => {
            if let Some(book) = session.existing_book(&decoders::symbol_of(&product_id)) {
                for delta in decoders::to_deltas(&changes) {
                    book.handle_delta(delta);
                }
            }
        }
        Message::Match(m) | Message::LastMatch(m) => {
            let symbol = decoders::symbol_of(&m.product_id);
            let Some(pair) = session.existing_trades(&symbol).map(|t| t.pair().clone()) else {
                return;
            };
            session.publish_trades(&symbol, vec![decoders::to_trade(&pair, &m)]);
        }
        Message::Ticker(t) => {
            if let Some(ticker) = session.existing_ticker(&decoders::symbol_of(&t.product_id)) {
                ticker.publish(decoders::to_ticker(&t));
            }
        }
        Message::Error { message, reason } => {
            tracing::warn!(exchange = %core.id, error = %message, reason = ?reason, "Feed error");
        }
        Message::Heartbeat | Message::Other => {
            tracing::trace!(exchange = %core.id, "Ignored message");
        }
    }
}

/// The ack lists every live subscription: confirm what is newly listed
/// and finish teardown of what is no longer listed.
fn on_subscriptions(
    session: &mut MarketSession<GdaxProtocol>,
    channels: &[decoders::ChannelInfo],
    transport: &dyn WsTransport,
) {
    let listed: HashSet<ChannelKey> = channels
        .iter()
        .filter_map(|info| Some((decoders::channel_kind(&info.name)?, info)))
        .flat_map(|(kind, info)| {
            info.product_ids
                .iter()
                .map(move |id| ChannelKey::new(kind, decoders::symbol_of(id)))
        })
        .collect();

    let states: Vec<(ChannelKey, SubscriptionState)> = session
        .registry()
        .keys()
        .filter(|key| decoders::channel_name(key.kind).is_some())
        .filter_map(|key| Some((key.clone(), session.registry().get(key)?.state)))
        .collect();

    for (key, state) in states {
        match state {
            SubscriptionState::QueuedSubscribe if listed.contains(&key) => {
                let transport_id = format!("{}:{}", key.kind, key.symbol);
                session.confirm(&key, transport_id, transport);
            }
            SubscriptionState::Unsubscribed if !listed.contains(&key) => {
                session.on_unsubscribed_key(&key, transport);
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ExchangeAdapter for GdaxAdapter {
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
        let body = match self.core.queue.request("/products").await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(exchange = %self.core.id, error = %e, "Failed to fetch products");
                return Vec::new();
            }
        };
        let products = decoders::parse_products(body);
        if products.is_empty() {
            return Vec::new();
        }
        {
            let mut session = self.core.session.lock();
            let protocol = session.protocol_mut();
            for (id, pair) in &products {
                protocol.products.insert(pair.symbol.clone(), id.clone());
            }
        }
        let pairs: Vec<AssetPair> = products.into_iter().map(|(_, pair)| pair).collect();
        self.core.store_pairs(pairs.clone());
        pairs
    }

    fn subscribe_trades(&self, symbol: &str) -> FeedReceiver<AssetTrade> {
        let (rx, first) = self.core.subscribe_trades(symbol);
        if first {
            self.seed_trades(symbol);
        }
        rx
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
        self.core.subscribe_ticker(symbol).0
    }

    fn unsubscribe_ticker(&self, symbol: &str) {
        self.core.release(ChannelKey::ticker(symbol));
    }

    fn shutdown(&self) {
        self.core.shutdown();
    }
}
