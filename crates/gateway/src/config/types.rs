use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::{RequestLimits, SessionSettings};
use crate::infrastructure::ReconnectPolicy;

/// Root configuration for the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigFile {
    pub exchanges: Vec<ExchangeConfig>,
    #[serde(default)]
    pub global: GlobalConfig,
}

/// Configuration for a single exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Adapter identifier ("bitfinex", "gdax", "bitstamp", "poloniex")
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Public REST base; request paths are appended verbatim
    pub rest_url: String,
    pub ws_url: String,
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
    /// Symbols the binary subscribes to on startup
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub market_data: MarketDataConfigJson,
}

/// Public REST budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Elevated budget used until the first rate-limit rejection
    #[serde(default)]
    pub burst_requests_per_second: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            requests_per_second: default_requests_per_second(),
            burst_requests_per_second: None,
        }
    }
}

impl RateLimitConfig {
    pub fn to_request_limits(&self) -> RequestLimits {
        let limits = RequestLimits::new(self.requests_per_second);
        match self.burst_requests_per_second {
            Some(burst) => limits.with_burst(burst),
            None => limits,
        }
    }
}

/// Market data configuration (JSON representation)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfigJson {
    /// Book levels exposed per side; the internal ladder is never truncated
    #[serde(default)]
    pub visible_depth: Option<usize>,
    /// Bars requested for candle snapshots where the exchange takes a count
    #[serde(default = "default_candle_history")]
    pub candle_history: usize,
    /// Bars kept per candle series
    #[serde(default)]
    pub candle_retention: Option<usize>,
    #[serde(default = "default_ticker_poll_interval")]
    pub ticker_poll_interval_ms: u64,
    /// Per-listener backlog before values are skipped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

impl Default for MarketDataConfigJson {
    fn default() -> Self {
        MarketDataConfigJson {
            visible_depth: None,
            candle_history: default_candle_history(),
            candle_retention: None,
            ticker_poll_interval_ms: default_ticker_poll_interval(),
            channel_capacity: default_channel_capacity(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

impl MarketDataConfigJson {
    /// Convert to the stream sizing used by adapter sessions
    pub fn to_session_settings(&self) -> SessionSettings {
        SessionSettings {
            channel_capacity: self.channel_capacity,
            visible_depth: self.visible_depth,
            candle_retention: self.candle_retention,
            max_book_buffer: self.max_buffer_size,
        }
    }

    pub fn ticker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ticker_poll_interval_ms)
    }
}

/// Global configuration that applies to all exchanges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Consecutive failed attempts before giving up, 0 for unlimited
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval(),
        }
    }
}

impl GlobalConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            delay: self.reconnect_delay(),
            max_attempts: (self.max_reconnect_attempts > 0).then_some(self.max_reconnect_attempts),
            heartbeat: self.heartbeat_interval(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_requests_per_second() -> u32 {
    3
}

fn default_candle_history() -> usize {
    200
}

fn default_ticker_poll_interval() -> u64 {
    5000
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_max_buffer_size() -> usize {
    1000
}

fn default_reconnect_delay() -> u64 {
    5000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_heartbeat_interval() -> u64 {
    30000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_exchange_config() {
        let json = r#"{
            "id": "gdax",
            "name": "GDAX",
            "enabled": true,
            "rest_url": "https://api.gdax.com",
            "ws_url": "wss://ws-feed.gdax.com",
            "rate_limits": { "requests_per_second": 3, "burst_requests_per_second": 6 },
            "symbols": ["BTCUSD", "ETHUSD"]
        }"#;

        let config: ExchangeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.id, "gdax");
        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.rate_limits.burst_requests_per_second, Some(6));
        assert_eq!(config.rate_limits.to_request_limits().burst_requests_per_second, Some(6));
    }

    #[test]
    fn test_deserialize_full_config() {
        let json = r#"{
            "exchanges": [
                {
                    "id": "bitstamp",
                    "name": "Bitstamp",
                    "rest_url": "https://www.bitstamp.net/api/v2/",
                    "ws_url": "wss://ws.bitstamp.net",
                    "market_data": { "visible_depth": 25 }
                }
            ],
            "global": {
                "reconnect_delay_ms": 3000,
                "max_reconnect_attempts": 0
            }
        }"#;

        let config: GatewayConfigFile = serde_json::from_str(json).unwrap();
        assert_eq!(config.exchanges.len(), 1);
        assert_eq!(config.exchanges[0].market_data.visible_depth, Some(25));
        assert_eq!(config.global.reconnect_delay_ms, 3000);
        assert_eq!(config.global.reconnect_policy().max_attempts, None);
    }

    #[test]
    fn test_defaults() {
        let json = r#"{
            "id": "test",
            "name": "Test",
            "rest_url": "http://localhost",
            "ws_url": "ws://localhost"
        }"#;

        let config: ExchangeConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.rate_limits.requests_per_second, 3);
        assert_eq!(config.rate_limits.burst_requests_per_second, None);
        assert_eq!(config.market_data.candle_history, 200);

        let settings = config.market_data.to_session_settings();
        assert_eq!(settings.visible_depth, None);
        assert_eq!(settings.channel_capacity, 1024);
    }
}
