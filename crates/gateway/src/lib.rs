//! Marketfeed Gateway
//!
//! Market-data layer over several crypto exchanges. Provides:
//! - One adapter per exchange behind the [`ExchangeAdapter`] contract
//! - Reference-counted channel subscriptions with replay on reconnect
//! - A throttled REST queue with a one-way burst downgrade
//! - Order book, candle, trade and ticker streams in normalized form
//!
//! ## Architecture
//!
//! ```text
//! Exchanges (Bitfinex, GDAX, Bitstamp, Poloniex)
//!         │ WebSocket frames / REST bodies
//!    ┌────▼─────────┐
//!    │Infrastructure│  WsClient (reconnect), RestClient
//!    └────┬─────────┘
//!    ┌────▼────┐
//!    │Exchanges│  wire decoders, per-exchange ChannelProtocol
//!    └────┬────┘
//!    ┌────▼──────┐
//!    │Application│  ChannelRegistry, MarketSession, streams, request queue
//!    └────┬──────┘
//!         │ FeedReceiver<AssetTrade | TickerUpdate | OrderBookChange | CandleStick>
//!    ┌────▼────┐
//!    │Consumers│
//!    └─────────┘
//! ```
//!
//! Adapters are looked up by id in an [`ExchangeRegistry`], usually built
//! from a config file with [`build_registry`].

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchanges;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{
    ExchangeAdapter, ExchangeRegistry, Feed, FeedReceiver, OrderBookHandle, RequestLimits,
    ThrottledRequestQueue,
};
pub use config::{ExchangeConfig, GatewayConfigFile, GlobalConfig, load_config, load_default_config};
pub use domain::{ChannelKey, ExchangeId, InformationKind, RestFetcher, SyncStatus, WsEvent, WsTransport};
pub use error::{AdapterError, FetchError, TransportError};
pub use exchanges::{
    AdapterOptions, BitfinexAdapter, BitstampAdapter, GdaxAdapter, PoloniexAdapter, build_registry,
    create_adapter,
};
