//! Bitfinex v2 public WebSocket.
//!
//! Every information kind is a wire channel here, candles included; the
//! candle snapshot arrives in-band as the first frame after subscribing.
//! Channels are addressed by the numeric `chanId` from the subscribe ack.

mod decoders;

use async_trait::async_trait;
use marketfeed_core::{AssetPair, AssetTrade, CandleStick, OrderBookChange, TickerUpdate, Timeframe};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::watch;

use self::decoders::{Event, Payload};
use super::common::{AdapterCore, AdapterOptions, spawn_event_loop};
use crate::application::{ExchangeAdapter, FeedReceiver, MarketSession, OrderBookHandle};
use crate::config::{ExchangeConfig, GlobalConfig};
use crate::domain::{
    ChannelKey, ChannelProtocol, ExchangeId, InformationKind, RestFetcher, WsEvent, WsTransport,
};
use crate::error::AdapterError;

/// Subscribe/unsubscribe commands for the v2 API
#[derive(Debug, Default)]
pub struct BitfinexProtocol;

impl ChannelProtocol for BitfinexProtocol {
    fn subscribe_command(&self, key: &ChannelKey) -> Option<String> {
        let symbol = decoders::trading_symbol(&key.symbol);
        let command = match key.kind {
            InformationKind::Trades => {
                json!({"event": "subscribe", "channel": "trades", "symbol": symbol})
            }
            InformationKind::Ticker => {
                json!({"event": "subscribe", "channel": "ticker", "symbol": symbol})
            }
            InformationKind::OrderBook => {
                json!({"event": "subscribe", "channel": "book", "symbol": symbol, "prec": "P0"})
            }
            InformationKind::Candles => {
                let key = decoders::candle_key(&key.symbol, key.timeframe?);
                json!({"event": "subscribe", "channel": "candles", "key": key})
            }
            InformationKind::Market => return None,
        };
        Some(command.to_string())
    }

    fn unsubscribe_command(&self, _key: &ChannelKey, transport_id: Option<&str>) -> Option<String> {
        let chan_id: i64 = transport_id?.parse().ok()?;
        Some(json!({"event": "unsubscribe", "chanId": chan_id}).to_string())
    }
}

type Core = AdapterCore<BitfinexProtocol>;

pub struct BitfinexAdapter {
    core: Arc<Core>,
}

impl BitfinexAdapter {
    pub fn connect(config: &ExchangeConfig, global: &GlobalConfig) -> Result<Self, AdapterError> {
        let (core, events) =
            Core::connect(ExchangeId::bitfinex(), BitfinexProtocol, config, global)?;
        core.track(spawn_event_loop(&core, events, handle_event));
        Ok(BitfinexAdapter { core })
    }

    /// Adapter over caller-supplied transports; events are fed through
    /// [`Self::process`].
    pub fn with_transport(
        transport: Arc<dyn WsTransport>,
        fetcher: Arc<dyn RestFetcher>,
        options: AdapterOptions,
    ) -> Self {
        let core = AdapterCore::new(
            ExchangeId::bitfinex(),
            BitfinexProtocol,
            transport,
            fetcher,
            options,
            None,
        );
        BitfinexAdapter {
            core: Arc::new(core),
        }
    }

    pub fn process(&self, event: WsEvent) {
        handle_event(&self.core, event);
    }
}

fn handle_event(core: &Arc<Core>, event: WsEvent) {
    let Some(text) = core.on_event(event) else {
        return;
    };
    let frame: Value = match serde_json::from_str(&text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(exchange = %core.id, error = %e, "Unparseable frame");
            return;
        }
    };

    if frame.is_object() {
        match decoders::parse_event(&frame) {
            Some(event) => handle_control(core, event),
            None => tracing::debug!(exchange = %core.id, %frame, "Malformed event"),
        }
        return;
    }

    let Some((chan_id, payload)) = decoders::classify(&frame) else {
        tracing::debug!(exchange = %core.id, %frame, "Malformed data frame");
        return;
    };
    let mut session = core.session.lock();
    let Some(key) = session.registry().key_for_transport_id(&chan_id).cloned() else {
        tracing::trace!(exchange = %core.id, %chan_id, "Frame for unknown channel");
        return;
    };
    handle_payload(&mut session, &key, payload);
}

fn handle_control(core: &Core, event: Event) {
    let mut session = core.session.lock();
    match event {
        Event::Subscribed { key: Some(key), chan_id } => {
            if !session.confirm(&key, chan_id, &*core.transport) {
                tracing::debug!(exchange = %core.id, channel = %key, "Ack for channel not awaiting one");
            }
        }
        Event::Subscribed { key: None, chan_id } => {
            tracing::debug!(exchange = %core.id, %chan_id, "Ack for unrecognized channel");
        }
        Event::Unsubscribed { chan_id } => session.on_unsubscribed(&chan_id, &*core.transport),
        Event::Error { key, message } => {
            tracing::warn!(exchange = %core.id, error = %message, "Subscription refused");
            if let Some(key) = key {
                session.reject(&key, &*core.transport);
            }
        }
        Event::Info(event) => tracing::trace!(exchange = %core.id, %event, "Info event"),
    }
}

fn handle_payload(session: &mut MarketSession<BitfinexProtocol>, key: &ChannelKey, payload: Payload<'_>) {
    let payload = match payload {
        Payload::Heartbeat | Payload::TradeExecuted | Payload::Empty => return,
        payload => payload,
    };

    match key.kind {
        InformationKind::Trades => {
            let Some(pair) = session.existing_trades(&key.symbol).map(|t| t.pair().clone()) else {
                return;
            };
            let trades: Vec<AssetTrade> = match payload {
                Payload::Snapshot(entries) => entries
                    .iter()
                    .filter_map(|entry| decoders::parse_trade(&pair, entry))
                    .collect(),
                Payload::TradeUpdate(entry) => decoders::parse_trade(&pair, entry).into_iter().collect(),
                _ => return,
            };
            session.publish_trades(&key.symbol, trades);
        }
        InformationKind::Ticker => {
            let (Payload::Update(values), Some(ticker)) = (payload, session.existing_ticker(&key.symbol)) else {
                return;
            };
            match decoders::parse_ticker(values) {
                Some(snapshot) => {
                    ticker.publish(snapshot);
                }
                None => tracing::debug!(channel = %key, "Malformed ticker"),
            }
        }
        InformationKind::OrderBook => {
            let Some(book) = session.existing_book(&key.symbol) else {
                return;
            };
            match payload {
                Payload::Snapshot(entries) => {
                    let (bids, asks) = decoders::split_book_snapshot(entries);
                    book.apply_snapshot(bids, asks, None);
                }
                Payload::Update(entry) => {
                    if let Some(delta) = decoders::parse_book_entry(entry) {
                        book.handle_delta(delta);
                    }
                }
                _ => {}
            }
        }
        InformationKind::Candles => {
            let Some(candles) = key
                .timeframe
                .and_then(|tf| session.existing_candles(&key.symbol, tf))
            else {
                return;
            };
            match payload {
                Payload::Snapshot(entries) => {
                    let mut bars: Vec<CandleStick> =
                        entries.iter().filter_map(decoders::parse_candle).collect();
                    bars.sort_by_key(|bar| bar.timestamp);
                    // a resubscribe resends the window; treat it as updates
                    if !candles.resolve_snapshot(bars.clone()) {
                        for bar in bars {
                            candles.push_update(bar);
                        }
                    }
                }
                Payload::Update(entry) => match decoders::parse_candle(entry) {
                    Some(bar) => candles.push_update(bar),
                    None => tracing::debug!(channel = %key, "Malformed candle"),
                },
                _ => {}
            }
        }
        InformationKind::Market => {}
    }
}

#[async_trait]
impl ExchangeAdapter for BitfinexAdapter {
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
        let pairs: Vec<AssetPair> = decoders::PAIRS
            .iter()
            .map(|symbol| AssetPair::from_symbol(symbol))
            .collect();
        self.core.store_pairs(pairs.clone());
        pairs
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
        self.core.candle_snapshot(symbol, timeframe).0
    }

    fn candle_snapshot_ready(&self, symbol: &str, timeframe: Timeframe) -> watch::Receiver<bool> {
        self.core.candle_snapshot_ready(symbol, timeframe).0
    }

    fn subscribe_candles(&self, symbol: &str, timeframe: Timeframe) -> FeedReceiver<CandleStick> {
        self.core.subscribe_candles(symbol, timeframe).0
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
