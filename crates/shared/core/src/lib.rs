//! Marketfeed Core Domain
//!
//! Pure market-data types for the marketfeed workspace.
//! This crate contains no async and no I/O: everything here is driven by the
//! gateway's exchange adapters and is fully unit testable.
//!
//! - [`OrderBook`] rebuilds an L2 book from snapshot + delta messages.
//! - [`CandleSeries`] keeps an ordered, timestamp-deduplicated OHLCV series.
//! - [`split_symbol_pair`] and [`Timeframe`] resolve symbols and periods.

pub mod candle_series;
pub mod entities;
pub mod order_book;
pub mod values;

// Re-export commonly used types at crate root
pub use candle_series::CandleSeries;
pub use entities::{
    // Assets
    Asset,
    AssetPair,
    // Market events
    AssetTrade,
    CandleStick,
    TickerDirection,
    TickerSnapshot,
    TickerUpdate,
    // Periods
    TimeUnit,
    Timeframe,
    TimeframeError,
    TradeType,
    split_symbol_pair,
};
pub use order_book::{BookAction, BookError, BookSide, OrderBook, OrderBookChange, OrderBookPosition};
pub use values::{Price, Quantity, Symbol, Timestamp};
