use std::path::Path;
use thiserror::Error;

use super::types::{ExchangeConfig, GatewayConfigFile};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("No enabled exchanges in config")]
    NoEnabledExchanges,
    #[error("Unsupported exchange: {0}")]
    UnsupportedExchange(String),
    #[error("Invalid rate limit for {0}: requests_per_second must be positive")]
    InvalidRateLimit(String),
}

/// Exchanges this build has adapters for
pub const SUPPORTED_EXCHANGES: [&str; 4] = ["bitfinex", "gdax", "bitstamp", "poloniex"];

/// Load gateway configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GatewayConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<GatewayConfigFile, ConfigError> {
    let config: GatewayConfigFile = serde_json::from_str(json)?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<GatewayConfigFile, ConfigError> {
    load_config_from_str(include_str!("gateway_config.json"))
}

impl GatewayConfigFile {
    /// Get only enabled exchanges
    pub fn enabled_exchanges(&self) -> Vec<&ExchangeConfig> {
        self.exchanges.iter().filter(|e| e.enabled).collect()
    }

    /// Get a specific exchange by ID
    pub fn get_exchange(&self, id: &str) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.id.eq_ignore_ascii_case(id))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let enabled = self.enabled_exchanges();
        if enabled.is_empty() {
            return Err(ConfigError::NoEnabledExchanges);
        }
        for exchange in enabled {
            if !SUPPORTED_EXCHANGES
                .iter()
                .any(|id| id.eq_ignore_ascii_case(&exchange.id))
            {
                return Err(ConfigError::UnsupportedExchange(exchange.id.clone()));
            }
            if exchange.rate_limits.requests_per_second == 0 {
                return Err(ConfigError::InvalidRateLimit(exchange.id.clone()));
            }
        }
        Ok(())
    }
}
