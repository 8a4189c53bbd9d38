//! Channel bookkeeping for one exchange connection.
//!
//! Wraps the [`ChannelRegistry`] with the normalized stream types and the
//! dependencies between channels: a local channel (one the exchange has no
//! wire subscription for, such as candles built from trades) pins the wire
//! channel that feeds it and releases it again when torn down.

use marketfeed_core::{AssetPair, AssetTrade, OrderBook, Timeframe};

use super::channel_registry::{Channel, ChannelRegistry, Release};
use super::streams::{
    BookStream, CandleStream, StreamChannel, TickerStream, TradeStream,
};
use crate::domain::{ChannelKey, ChannelProtocol, ExchangeId, InformationKind, WsTransport};

/// Sizing of the streams a session creates
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub channel_capacity: usize,
    /// Externally visible book levels per side
    pub visible_depth: Option<usize>,
    /// Bars kept per candle series
    pub candle_retention: Option<usize>,
    /// Book deltas held while waiting for a snapshot
    pub max_book_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            channel_capacity: 1024,
            visible_depth: None,
            candle_retention: None,
            max_book_buffer: 1000,
        }
    }
}

pub struct MarketSession<P> {
    exchange: ExchangeId,
    registry: ChannelRegistry<StreamChannel, P>,
    settings: SessionSettings,
    pairs: Vec<AssetPair>,
}

impl<P: ChannelProtocol> MarketSession<P> {
    pub fn new(exchange: ExchangeId, protocol: P, settings: SessionSettings) -> Self {
        MarketSession {
            registry: ChannelRegistry::new(exchange.clone(), protocol),
            exchange,
            settings,
            pairs: Vec::new(),
        }
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    pub fn registry(&self) -> &ChannelRegistry<StreamChannel, P> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ChannelRegistry<StreamChannel, P> {
        &mut self.registry
    }

    pub fn protocol(&self) -> &P {
        self.registry.protocol()
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        self.registry.protocol_mut()
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn pairs(&self) -> &[AssetPair] {
        &self.pairs
    }

    pub fn set_pairs(&mut self, pairs: Vec<AssetPair>) {
        self.pairs = pairs;
    }

    /// Known pair for `symbol`, or one split from the symbol itself
    pub fn resolve_pair(&self, symbol: &str) -> AssetPair {
        resolve_pair(&self.pairs, symbol)
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.registry.contains(key)
    }

    /// Ensure the channel exists, pinning whatever feeds it first
    pub fn ensure(&mut self, key: ChannelKey, transport: &dyn WsTransport) -> &mut StreamChannel {
        if !self.registry.contains(&key)
            && let Some(parent) = self.registry.protocol().feeding_channel(&key)
        {
            self.ensure(parent, transport).pin();
        }

        let settings = &self.settings;
        let exchange = &self.exchange;
        let pairs = &self.pairs;
        let create_key = key.clone();
        self.registry.ensure(key, transport, move || {
            create_stream(settings, exchange, pairs, &create_key)
        })
    }

    pub fn trades(&mut self, symbol: &str, transport: &dyn WsTransport) -> Option<&mut TradeStream> {
        self.ensure(ChannelKey::trades(symbol), transport).as_trades()
    }

    pub fn ticker(&mut self, symbol: &str, transport: &dyn WsTransport) -> Option<&mut TickerStream> {
        self.ensure(ChannelKey::ticker(symbol), transport).as_ticker()
    }

    pub fn book(&mut self, symbol: &str, transport: &dyn WsTransport) -> Option<&mut BookStream> {
        self.ensure(ChannelKey::order_book(symbol), transport).as_book()
    }

    pub fn candles(
        &mut self,
        symbol: &str,
        timeframe: Timeframe,
        transport: &dyn WsTransport,
    ) -> Option<&mut CandleStream> {
        self.ensure(ChannelKey::candles(symbol, timeframe), transport)
            .as_candles()
    }

    pub fn existing(&mut self, key: &ChannelKey) -> Option<&mut StreamChannel> {
        self.registry.decoder_mut(key)
    }

    pub fn existing_trades(&mut self, symbol: &str) -> Option<&mut TradeStream> {
        self.existing(&ChannelKey::trades(symbol))?.as_trades()
    }

    pub fn existing_ticker(&mut self, symbol: &str) -> Option<&mut TickerStream> {
        self.existing(&ChannelKey::ticker(symbol))?.as_ticker()
    }

    pub fn existing_book(&mut self, symbol: &str) -> Option<&mut BookStream> {
        self.existing(&ChannelKey::order_book(symbol))?.as_book()
    }

    pub fn existing_candles(&mut self, symbol: &str, timeframe: Timeframe) -> Option<&mut CandleStream> {
        self.existing(&ChannelKey::candles(symbol, timeframe))?
            .as_candles()
    }

    /// Publish trades for `symbol` and fold them into candle series built
    /// from this trade channel.
    pub fn publish_trades(&mut self, symbol: &str, trades: Vec<AssetTrade>) {
        let Some(stream) = self.existing_trades(symbol) else {
            return;
        };
        let published = stream.publish_batch(trades);
        if published.is_empty() {
            return;
        }

        let trades_key = ChannelKey::trades(symbol);
        let protocol = self.registry.protocol();
        let dependents: Vec<ChannelKey> = self
            .registry
            .keys()
            .filter(|key| {
                key.kind == InformationKind::Candles
                    && protocol.feeding_channel(key).as_ref() == Some(&trades_key)
            })
            .cloned()
            .collect();

        for key in dependents {
            if let Some(candles) = self.existing(&key).and_then(StreamChannel::as_candles) {
                for trade in &published {
                    candles.fold_trade(trade);
                }
            }
        }
    }

    /// Drop a listener's interest in `key`; tears down feeding channels too
    pub fn release(&mut self, key: &ChannelKey, transport: &dyn WsTransport) -> Release {
        let outcome = self.registry.release(key, transport);
        if outcome == Release::Removed {
            self.unpin_feeder(key, transport);
        }
        outcome
    }

    /// Subscribe acknowledgment
    pub fn confirm(&mut self, key: &ChannelKey, transport_id: impl Into<String>, transport: &dyn WsTransport) -> bool {
        self.registry.confirm(key, transport_id, transport)
    }

    /// Unsubscribe acknowledgment carrying the exchange's channel id
    pub fn on_unsubscribed(&mut self, transport_id: &str, transport: &dyn WsTransport) {
        if let Some(channel) = self.registry.on_unsubscribed(transport_id, transport) {
            self.unpin_feeder(&channel.key, transport);
        }
    }

    /// Unsubscribe acknowledgment naming the channel
    pub fn on_unsubscribed_key(&mut self, key: &ChannelKey, transport: &dyn WsTransport) {
        if let Some(channel) = self.registry.on_unsubscribed_key(key, transport) {
            self.unpin_feeder(&channel.key, transport);
        }
    }

    /// Forget a channel the exchange refused
    pub fn reject(&mut self, key: &ChannelKey, transport: &dyn WsTransport) -> Option<Channel<StreamChannel>> {
        let channel = self.registry.remove(key)?;
        self.unpin_feeder(key, transport);
        Some(channel)
    }

    pub fn on_transport_open(&mut self, transport: &dyn WsTransport) {
        self.registry.on_transport_open(transport);
    }

    /// Connection lost: books are stale until their next snapshot
    pub fn on_transport_closed(&mut self) {
        self.registry.on_transport_closed();
        for channel in self.registry.channels_mut() {
            if let StreamChannel::Book(book) = &mut channel.decoder {
                book.mark_out_of_sync();
            }
        }
    }

    fn unpin_feeder(&mut self, key: &ChannelKey, transport: &dyn WsTransport) {
        let Some(parent) = self.registry.protocol().feeding_channel(key) else {
            return;
        };
        if let Some(decoder) = self.registry.decoder_mut(&parent) {
            decoder.unpin();
            self.release(&parent, transport);
        }
    }
}

fn resolve_pair(pairs: &[AssetPair], symbol: &str) -> AssetPair {
    pairs
        .iter()
        .find(|pair| pair.matches(symbol))
        .cloned()
        .unwrap_or_else(|| AssetPair::from_symbol(symbol))
}

fn create_stream(
    settings: &SessionSettings,
    exchange: &ExchangeId,
    pairs: &[AssetPair],
    key: &ChannelKey,
) -> StreamChannel {
    if key.is_aggregate() {
        return StreamChannel::Relay(0);
    }
    let capacity = settings.channel_capacity;
    match (key.kind, key.timeframe) {
        (InformationKind::Trades, _) => {
            StreamChannel::Trades(TradeStream::new(resolve_pair(pairs, &key.symbol), capacity))
        }
        (InformationKind::Ticker, _) => StreamChannel::Ticker(TickerStream::new(capacity)),
        (InformationKind::OrderBook, _) => {
            let book = settings
                .visible_depth
                .map_or_else(OrderBook::new, OrderBook::with_visible_depth);
            let mut stream = BookStream::new(
                exchange.clone(),
                key.symbol.clone(),
                book,
                capacity,
                settings.max_book_buffer,
            );
            stream.begin_sync();
            StreamChannel::Book(stream)
        }
        (InformationKind::Candles, Some(timeframe)) => StreamChannel::Candles(CandleStream::new(
            key.symbol.clone(),
            timeframe,
            capacity,
            settings.candle_retention,
        )),
        (InformationKind::Candles, None) | (InformationKind::Market, _) => StreamChannel::Relay(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::channel_registry::tests::RecordingTransport;
    use chrono::{TimeZone, Utc};
    use marketfeed_core::CandleStick;
    use rust_decimal_macros::dec;

    /// Candles are built from trades, trades ride on a market channel
    struct LayeredProtocol;

    impl ChannelProtocol for LayeredProtocol {
        fn subscribe_command(&self, key: &ChannelKey) -> Option<String> {
            match key.kind {
                InformationKind::Market => Some(format!("sub:{}", key)),
                InformationKind::Ticker if key.is_aggregate() => Some(format!("sub:{}", key)),
                _ => None,
            }
        }

        fn unsubscribe_command(&self, key: &ChannelKey, _id: Option<&str>) -> Option<String> {
            Some(format!("unsub:{}", key))
        }

        fn acknowledges_unsubscribe(&self) -> bool {
            false
        }

        fn feeding_channel(&self, key: &ChannelKey) -> Option<ChannelKey> {
            match key.kind {
                InformationKind::Candles => Some(ChannelKey::trades(&key.symbol)),
                InformationKind::Trades | InformationKind::OrderBook => {
                    Some(ChannelKey::market(&key.symbol))
                }
                InformationKind::Ticker if !key.is_aggregate() => {
                    Some(ChannelKey::aggregate(InformationKind::Ticker))
                }
                _ => None,
            }
        }
    }

    fn session() -> (MarketSession<LayeredProtocol>, RecordingTransport) {
        let transport = RecordingTransport::default();
        let mut session =
            MarketSession::new(ExchangeId::new("test"), LayeredProtocol, SessionSettings::default());
        session.on_transport_open(&transport);
        (session, transport)
    }

    #[test]
    fn test_local_channels_pin_their_feeders() {
        let (mut session, transport) = session();
        let tf = Timeframe::one_minute();

        let rx = session.candles("ETHBTC", tf, &transport).map(|c| c.subscribe());
        assert!(rx.is_some());
        assert!(session.contains(&ChannelKey::trades("ETHBTC")));
        assert!(session.contains(&ChannelKey::market("ETHBTC")));
        assert_eq!(transport.take(), vec!["sub:market:ETHBTC".to_string()]);
        assert!(session.confirm(&ChannelKey::market("ETHBTC"), "7", &transport));

        // book shares the market channel; no second subscribe
        let handle = session.book("ETHBTC", &transport).map(|b| b.handle());
        assert!(transport.take().is_empty());

        drop(rx);
        session.release(&ChannelKey::candles("ETHBTC", tf), &transport);
        assert!(!session.contains(&ChannelKey::trades("ETHBTC")));
        assert!(session.contains(&ChannelKey::market("ETHBTC")));
        assert!(transport.take().is_empty());

        drop(handle);
        session.release(&ChannelKey::order_book("ETHBTC"), &transport);
        assert!(!session.contains(&ChannelKey::market("ETHBTC")));
        assert_eq!(transport.take(), vec!["unsub:market:ETHBTC".to_string()]);
    }

    #[test]
    fn test_trades_fold_into_dependent_candles() {
        let (mut session, transport) = session();
        let tf = Timeframe::one_minute();
        let pair = session.resolve_pair("ETHBTC");

        let candles = session.candles("ETHBTC", tf, &transport).unwrap();
        candles.resolve_snapshot(Vec::<CandleStick>::new());

        let ts = Utc.timestamp_opt(120, 0).unwrap();
        session.publish_trades(
            "ETHBTC",
            vec![AssetTrade::from_signed_amount(&pair, dec!(0.05), dec!(2), ts)],
        );

        let bars = session.existing_candles("ETHBTC", tf).unwrap().candles();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, dec!(0.05));
        assert_eq!(bars[0].volume, dec!(2));
    }

    #[test]
    fn test_close_marks_books_out_of_sync() {
        let (mut session, transport) = session();
        let book = session.book("ETHBTC", &transport).unwrap();
        book.apply_snapshot(vec![(dec!(1), dec!(1), 0)], Vec::new(), None);
        assert!(book.status().is_ready());

        session.on_transport_closed();
        assert!(!session.existing_book("ETHBTC").unwrap().status().is_ready());
    }

    #[test]
    fn test_resolve_pair_prefers_known_pairs() {
        let (mut session, _) = session();
        session.set_pairs(vec![AssetPair::new("DASH", "BTC")]);
        let pair = session.resolve_pair("dashbtc");
        assert_eq!(pair.primary.shortcode(), "DASH");
        assert_eq!(session.resolve_pair("ETHBTC").primary.shortcode(), "ETH");
    }

    #[test]
    fn test_aggregate_feeder_shared_by_symbols() {
        let (mut session, transport) = session();
        let all = ChannelKey::aggregate(InformationKind::Ticker);

        let btc = session.ticker("BTCUSD", &transport).map(|t| t.subscribe());
        let eth = session.ticker("ETHUSD", &transport).map(|t| t.subscribe());
        assert_eq!(transport.take(), vec!["sub:ticker:*".to_string()]);
        assert!(matches!(session.existing(&all), Some(StreamChannel::Relay(2))));
        assert!(session.confirm(&all, "1002", &transport));

        drop(btc);
        session.release(&ChannelKey::ticker("BTCUSD"), &transport);
        assert!(session.contains(&all));

        drop(eth);
        session.release(&ChannelKey::ticker("ETHUSD"), &transport);
        assert!(!session.contains(&all));
        assert_eq!(transport.take(), vec!["unsub:ticker:*".to_string()]);
    }
}
