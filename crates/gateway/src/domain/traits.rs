use async_trait::async_trait;
use serde_json::Value;

use super::exchange::ChannelKey;
use crate::error::{FetchError, TransportError};

/// Trait for issuing public REST GET requests
///
/// Implements Interface Segregation - the request queue only needs this.
/// `path` is appended verbatim to the exchange's REST base URL.
#[async_trait]
pub trait RestFetcher: Send + Sync {
    async fn get(&self, path: &str) -> Result<Value, FetchError>;
}

/// Trait for writing text frames to an exchange WebSocket
///
/// Sending never blocks; frames are handed to the connection task.
pub trait WsTransport: Send + Sync {
    fn send(&self, text: String) -> Result<(), TransportError>;
}

/// Per-channel decoder state held by a channel registry
pub trait ChannelDecoder {
    /// Local consumers still attached to this channel's feeds
    fn listener_count(&self) -> usize;
}

/// Exchange-specific subscription wire commands
///
/// Implements Open/Closed - each exchange plugs its protocol into the
/// shared channel registry.
pub trait ChannelProtocol: Send {
    /// Subscribe frame for `key`, or `None` for channels with no wire presence
    fn subscribe_command(&self, key: &ChannelKey) -> Option<String>;

    /// Unsubscribe frame for `key`; `transport_id` is set once acknowledged
    fn unsubscribe_command(&self, key: &ChannelKey, transport_id: Option<&str>) -> Option<String>;

    /// Whether the exchange confirms teardown with an acknowledgment
    fn acknowledges_unsubscribe(&self) -> bool {
        true
    }

    /// Wire channel whose frames feed `key`, for channels built locally
    fn feeding_channel(&self, _key: &ChannelKey) -> Option<ChannelKey> {
        None
    }
}
