use serde::{Deserialize, Serialize};

use crate::values::{Price, Quantity, Timestamp};

/// One OHLCV bar; `timestamp` is the bucket start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleStick {
    pub timestamp: Timestamp,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Quantity,
}

impl CandleStick {
    /// A bar opened by a single trade
    pub fn opening(timestamp: Timestamp, price: Price, volume: Quantity) -> Self {
        CandleStick {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }

    /// The bar that results from adding one trade to this one
    pub fn with_trade(&self, price: Price, volume: Quantity) -> Self {
        CandleStick {
            timestamp: self.timestamp,
            open: self.open,
            high: self.high.max(price),
            low: self.low.min(price),
            close: price,
            volume: self.volume + volume,
        }
    }
}
