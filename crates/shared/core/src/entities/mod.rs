mod asset;
mod candle;
mod ticker;
mod timeframe;
mod trade;

pub use asset::{Asset, AssetPair, split_symbol_pair};
pub use candle::CandleStick;
pub use ticker::{TickerDirection, TickerSnapshot, TickerUpdate};
pub use timeframe::{TimeUnit, Timeframe, TimeframeError};
pub use trade::{AssetTrade, TradeType};
