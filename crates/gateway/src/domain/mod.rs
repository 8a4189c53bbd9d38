mod events;
mod exchange;
mod subscription;
mod sync_status;
mod traits;

pub use events::WsEvent;
pub use exchange::{ALL_SYMBOLS, ChannelKey, ExchangeId, InformationKind};
pub use subscription::SubscriptionState;
pub use sync_status::SyncStatus;
pub use traits::{ChannelDecoder, ChannelProtocol, RestFetcher, WsTransport};
