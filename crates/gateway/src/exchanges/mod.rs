//! Exchange adapters
//!
//! One module per exchange. Each translates its wire protocol into calls on
//! the shared stream state and exposes the [`ExchangeAdapter`] contract.

pub mod bitfinex;
pub mod bitstamp;
pub mod gdax;
pub mod poloniex;

mod common;
#[cfg(test)]
mod testing;

pub use bitfinex::{BitfinexAdapter, BitfinexProtocol};
pub use bitstamp::{BitstampAdapter, BitstampProtocol};
pub use common::AdapterOptions;
pub use gdax::{GdaxAdapter, GdaxProtocol};
pub use poloniex::{PoloniexAdapter, PoloniexProtocol};

use std::sync::Arc;

use crate::application::{ExchangeAdapter, ExchangeRegistry};
use crate::config::{ExchangeConfig, GatewayConfigFile, GlobalConfig};
use crate::error::AdapterError;

/// Build and connect the adapter named by `config.id`
pub fn create_adapter(
    config: &ExchangeConfig,
    global: &GlobalConfig,
) -> Result<Arc<dyn ExchangeAdapter>, AdapterError> {
    let adapter: Arc<dyn ExchangeAdapter> = match config.id.to_lowercase().as_str() {
        "bitfinex" => Arc::new(BitfinexAdapter::connect(config, global)?),
        "gdax" => Arc::new(GdaxAdapter::connect(config, global)?),
        "bitstamp" => Arc::new(BitstampAdapter::connect(config, global)?),
        "poloniex" => Arc::new(PoloniexAdapter::connect(config, global)?),
        other => return Err(AdapterError::Unsupported(other.to_string())),
    };
    Ok(adapter)
}

/// Registry holding an adapter for every enabled exchange. Exchanges whose
/// adapter cannot be built are logged and left out.
pub fn build_registry(config: &GatewayConfigFile) -> ExchangeRegistry {
    let registry = ExchangeRegistry::new();
    for exchange in config.enabled_exchanges() {
        match create_adapter(exchange, &config.global) {
            Ok(adapter) => {
                registry.register(adapter);
            }
            Err(e) => {
                tracing::error!(exchange = %exchange.id, error = %e, "Failed to create adapter");
            }
        }
    }
    registry
}
