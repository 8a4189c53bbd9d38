//! Error types for the gateway crate

use thiserror::Error;

/// Transport-level errors (WebSocket send path)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Channel closed")]
    ChannelClosed,
}

/// Errors from REST requests, as seen by the request queue and its callers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// HTTP 429 or equivalent; retried inside the request queue
    #[error("Rate limited by exchange")]
    RateLimited,

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// The request was dropped before a response was produced
    #[error("Request queue stopped")]
    Stopped,
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

/// Errors building an exchange adapter from configuration
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Unsupported exchange: {0}")]
    Unsupported(String),

    #[error("Failed to build REST client: {0}")]
    Rest(#[from] crate::infrastructure::RestError),
}
