pub mod adapter;
pub mod channel_registry;
pub mod feed;
pub mod registry;
pub mod request_queue;
pub mod session;
pub mod streams;

pub use adapter::ExchangeAdapter;
pub use channel_registry::{Channel, ChannelRegistry, Release};
pub use feed::{Feed, FeedReceiver};
pub use registry::ExchangeRegistry;
pub use request_queue::{RequestLimits, ThrottledRequestQueue};
pub use session::{MarketSession, SessionSettings};
pub use streams::{
    BookDelta, BookStream, CandleStream, OrderBookHandle, StreamChannel, TickerStream, TradeStream,
};
