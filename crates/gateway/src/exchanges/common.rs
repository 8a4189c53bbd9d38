//! Plumbing shared by every exchange adapter: the session lock, the
//! transport, the request queue and the connectivity signal.

use chrono::{Duration as ChronoDuration, Utc};
use marketfeed_core::{
    AssetPair, AssetTrade, CandleStick, OrderBookChange, TickerUpdate, Timeframe, Timestamp,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::application::{
    FeedReceiver, MarketSession, OrderBookHandle, RequestLimits, SessionSettings, StreamChannel,
    ThrottledRequestQueue,
};
use crate::config::{ExchangeConfig, GlobalConfig};
use crate::domain::{ChannelKey, ChannelProtocol, ExchangeId, RestFetcher, WsEvent, WsTransport};
use crate::error::{AdapterError, FetchError};
use crate::infrastructure::{RestClient, WsClient, WsHandle};

/// Per-adapter tuning, usually taken from [`ExchangeConfig`]
#[derive(Debug, Clone)]
pub struct AdapterOptions {
    pub limits: RequestLimits,
    pub session: SessionSettings,
    /// Bars requested where the candle endpoint takes a count
    pub candle_history: usize,
    pub ticker_poll_interval: Duration,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        AdapterOptions {
            limits: RequestLimits::new(3),
            session: SessionSettings::default(),
            candle_history: 200,
            ticker_poll_interval: Duration::from_secs(5),
        }
    }
}

impl AdapterOptions {
    pub fn from_config(config: &ExchangeConfig) -> Self {
        AdapterOptions {
            limits: config.rate_limits.to_request_limits(),
            session: config.market_data.to_session_settings(),
            candle_history: config.market_data.candle_history,
            ticker_poll_interval: config.market_data.ticker_poll_interval(),
        }
    }

    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_visible_depth(mut self, depth: usize) -> Self {
        self.session.visible_depth = Some(depth);
        self
    }
}

pub(crate) struct AdapterCore<P> {
    pub id: ExchangeId,
    pub session: Mutex<MarketSession<P>>,
    pub transport: Arc<dyn WsTransport>,
    pub queue: ThrottledRequestQueue,
    pub options: AdapterOptions,
    connected: watch::Sender<bool>,
    ws: Option<WsHandle>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    pairs: Mutex<Option<Vec<AssetPair>>>,
}

impl<P: ChannelProtocol> AdapterCore<P> {
    pub fn new(
        id: ExchangeId,
        protocol: P,
        transport: Arc<dyn WsTransport>,
        fetcher: Arc<dyn RestFetcher>,
        options: AdapterOptions,
        ws: Option<WsHandle>,
    ) -> Self {
        let (connected, _) = watch::channel(false);
        AdapterCore {
            session: Mutex::new(MarketSession::new(id.clone(), protocol, options.session.clone())),
            queue: ThrottledRequestQueue::new(id.clone(), fetcher, options.limits),
            id,
            transport,
            options,
            connected,
            ws,
            tasks: Mutex::new(Vec::new()),
            pairs: Mutex::new(None),
        }
    }

    /// Build a core on a live WebSocket connection and REST client.
    /// The returned receiver carries the connection's events.
    pub fn connect(
        id: ExchangeId,
        protocol: P,
        config: &ExchangeConfig,
        global: &GlobalConfig,
    ) -> Result<(Arc<Self>, mpsc::Receiver<WsEvent>), AdapterError> {
        let fetcher = Arc::new(RestClient::new(config.rest_url.clone())?);
        let (ws, events) = WsClient::new(config.ws_url.clone(), global.reconnect_policy()).spawn();
        tracing::info!(exchange = %id, url = %config.ws_url, "Connecting");
        let core = AdapterCore::new(
            id,
            protocol,
            Arc::new(ws.clone()),
            fetcher,
            AdapterOptions::from_config(config),
            Some(ws),
        );
        Ok((Arc::new(core), events))
    }

    pub fn connection_state(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Transport handshake completed: replay every channel
    pub fn on_connected(&self) {
        tracing::info!(exchange = %self.id, "Connected");
        self.connected.send_replace(true);
        self.session.lock().on_transport_open(&*self.transport);
    }

    pub fn on_disconnected(&self) {
        if self.connected.send_replace(false) {
            tracing::info!(exchange = %self.id, "Disconnected");
        }
        self.session.lock().on_transport_closed();
    }

    /// Common handling for non-message transport events. Returns the frame
    /// text for [`WsEvent::Message`].
    pub fn on_event(&self, event: WsEvent) -> Option<String> {
        match event {
            WsEvent::Connected => self.on_connected(),
            WsEvent::Disconnected => self.on_disconnected(),
            WsEvent::Error(e) => {
                tracing::error!(exchange = %self.id, error = %e, "Transport error");
                self.on_disconnected();
            }
            WsEvent::Message(text) => return Some(text),
        }
        None
    }

    /// Run `f` on the channel for `key`, creating it if needed.
    /// Also reports whether the channel was created by this call.
    pub fn with_channel<R>(
        &self,
        key: ChannelKey,
        f: impl FnOnce(&mut StreamChannel) -> Option<R>,
    ) -> (Option<R>, bool) {
        let mut session = self.session.lock();
        let created = !session.contains(&key);
        let result = f(session.ensure(key, &*self.transport));
        (result, created)
    }

    /// Also reports whether the receiver is the trade feed's first
    /// subscriber, even when another channel created it earlier.
    pub fn subscribe_trades(&self, symbol: &str) -> (FeedReceiver<AssetTrade>, bool) {
        let (subscribed, _) = self.with_channel(ChannelKey::trades(symbol), |channel| {
            channel.as_trades().map(|trades| {
                let first = trades.subscriber_count() == 0;
                (trades.subscribe(), first)
            })
        });
        subscribed.unwrap_or_else(|| (FeedReceiver::closed(), false))
    }

    pub fn subscribe_ticker(&self, symbol: &str) -> (FeedReceiver<TickerUpdate>, bool) {
        let (rx, created) = self.with_channel(ChannelKey::ticker(symbol), |channel| {
            channel.as_ticker().map(|ticker| ticker.subscribe())
        });
        (rx.unwrap_or_else(FeedReceiver::closed), created)
    }

    pub fn order_book(&self, symbol: &str) -> (OrderBookHandle, bool) {
        let (handle, created) = self.with_channel(ChannelKey::order_book(symbol), |channel| {
            channel.as_book().map(|book| book.handle())
        });
        let handle =
            handle.unwrap_or_else(|| OrderBookHandle::detached(self.id.clone(), symbol.to_uppercase()));
        (handle, created)
    }

    pub fn order_book_events(&self, symbol: &str) -> (FeedReceiver<OrderBookChange>, bool) {
        let (rx, created) = self.with_channel(ChannelKey::order_book(symbol), |channel| {
            channel.as_book().map(|book| book.subscribe())
        });
        (rx.unwrap_or_else(FeedReceiver::closed), created)
    }

    pub fn subscribe_candles(&self, symbol: &str, timeframe: Timeframe) -> (FeedReceiver<CandleStick>, bool) {
        let (rx, created) = self.with_channel(ChannelKey::candles(symbol, timeframe), |channel| {
            channel.as_candles().map(|candles| candles.subscribe())
        });
        (rx.unwrap_or_else(FeedReceiver::closed), created)
    }

    /// Drop interest in a channel; the wire teardown follows once unused
    pub fn release(&self, key: ChannelKey) {
        let outcome = self.session.lock().release(&key, &*self.transport);
        tracing::debug!(exchange = %self.id, channel = %key, ?outcome, "Released channel");
    }

    pub fn cached_pairs(&self) -> Option<Vec<AssetPair>> {
        self.pairs.lock().clone()
    }

    pub fn store_pairs(&self, pairs: Vec<AssetPair>) {
        tracing::debug!(exchange = %self.id, count = pairs.len(), "Cached asset pairs");
        self.session.lock().set_pairs(pairs.clone());
        *self.pairs.lock() = Some(pairs);
    }

    /// Keep a background task so shutdown can stop it
    pub fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    pub fn shutdown(&self) {
        tracing::info!(exchange = %self.id, "Shutting down");
        self.queue.stop();
        if let Some(ws) = &self.ws {
            ws.close();
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.connected.send_replace(false);
    }
}

impl<P: ChannelProtocol + 'static> AdapterCore<P> {
    /// Run `path` through the request queue and hand the outcome to `apply`
    pub fn fetch_with<F>(self: &Arc<Self>, path: String, apply: F)
    where
        F: FnOnce(&Self, Result<Value, FetchError>) + Send + 'static,
    {
        let queue = self.queue.clone();
        let core = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let result = queue.request(path).await;
            if let Some(core) = core.upgrade() {
                apply(&*core, result);
            }
        });
        self.track(task);
    }

    /// Run `path` through the request queue and hand the body to `apply`.
    /// Failures are logged and dropped.
    pub fn fetch_then<F>(self: &Arc<Self>, path: String, apply: F)
    where
        F: FnOnce(&Self, Value) + Send + 'static,
    {
        let logged = path.clone();
        self.fetch_with(path, move |core, result| match result {
            Ok(body) => apply(core, body),
            Err(e) => {
                tracing::warn!(exchange = %core.id, path = %logged, error = %e, "REST request failed")
            }
        });
    }

    /// Load the history of a new candle series from `path`.
    ///
    /// Without a path, or when the request fails, the series starts empty
    /// so live trades still fold into it.
    pub fn seed_candles<F>(self: &Arc<Self>, symbol: &str, timeframe: Timeframe, path: Option<String>, parse: F)
    where
        F: FnOnce(&Value) -> Vec<CandleStick> + Send + 'static,
    {
        let symbol = symbol.to_uppercase();
        let Some(path) = path else {
            tracing::warn!(exchange = %self.id, %symbol, %timeframe, "Candle history window out of range, starting empty");
            self.resolve_candles(&symbol, timeframe, Vec::new());
            return;
        };
        self.fetch_with(path, move |core, result| {
            let bars = match result {
                Ok(body) => parse(&body),
                Err(e) => {
                    tracing::warn!(exchange = %core.id, %symbol, %timeframe, error = %e, "Candle history unavailable, starting empty");
                    Vec::new()
                }
            };
            core.resolve_candles(&symbol, timeframe, bars);
        });
    }

    fn resolve_candles(&self, symbol: &str, timeframe: Timeframe, bars: Vec<CandleStick>) {
        if let Some(candles) = self.session.lock().existing_candles(symbol, timeframe) {
            candles.resolve_snapshot(bars);
        }
    }

    pub fn candle_snapshot_ready(self: &Arc<Self>, symbol: &str, timeframe: Timeframe) -> (watch::Receiver<bool>, bool) {
        let (ready, created) = self.with_channel(ChannelKey::candles(symbol, timeframe), |channel| {
            channel.as_candles().map(|candles| candles.ready())
        });
        let ready = ready.unwrap_or_else(|| watch::channel(false).1);
        if created {
            self.hold_until_ready(ChannelKey::candles(symbol, timeframe), ready.clone());
        }
        (ready, created)
    }

    pub fn candle_snapshot(self: &Arc<Self>, symbol: &str, timeframe: Timeframe) -> (Vec<CandleStick>, bool) {
        let (found, created) = self.with_channel(ChannelKey::candles(symbol, timeframe), |channel| {
            channel.as_candles().map(|candles| (candles.candles(), candles.ready()))
        });
        let Some((candles, ready)) = found else {
            return (Vec::new(), created);
        };
        if created {
            self.hold_until_ready(ChannelKey::candles(symbol, timeframe), ready);
        }
        (candles, created)
    }

    /// Keep a channel opened by a snapshot query alive until its snapshot
    /// resolves, then release it like any other listener would.
    fn hold_until_ready(self: &Arc<Self>, key: ChannelKey, mut ready: watch::Receiver<bool>) {
        let core = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let _ = ready.wait_for(|ready| *ready).await;
            drop(ready);
            if let Some(core) = core.upgrade() {
                core.release(key);
            }
        });
        self.track(task);
    }
}

/// `(now - bars × period, now)`, or `None` when the start falls outside
/// the representable time range.
pub(crate) fn candle_window(timeframe: Timeframe, bars: i64) -> Option<(Timestamp, Timestamp)> {
    let end = Utc::now();
    let span = ChronoDuration::try_seconds(timeframe.seconds().checked_mul(bars)?)?;
    Some((end.checked_sub_signed(span)?, end))
}

/// Feed transport events to `handle` until the stream ends or the target
/// is dropped.
pub(crate) fn spawn_event_loop<T, F>(
    target: &Arc<T>,
    mut events: mpsc::Receiver<WsEvent>,
    handle: F,
) -> JoinHandle<()>
where
    T: Send + Sync + 'static,
    F: Fn(&Arc<T>, WsEvent) + Send + 'static,
{
    let target = Arc::downgrade(target);
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(target) = target.upgrade() else {
                break;
            };
            handle(&target, event);
        }
    })
}
