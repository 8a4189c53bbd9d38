//! Infrastructure Layer - connections to exchange endpoints
//!
//! - RestClient: HTTP client for public exchange REST APIs
//! - WsClient: reconnecting WebSocket client for exchange streams
//! - json: field helpers shared by the exchange decoders

pub mod json;
pub mod rest_client;
pub mod ws_client;

pub use rest_client::{RestClient, RestError};
pub use ws_client::{ReconnectPolicy, WsClient, WsError, WsHandle};
