//! Exchange-agnostic stream state.
//!
//! Each exchange decodes its wire frames into calls on these types; they own
//! the incremental state (book ladders, candle series, last trade time) and
//! publish normalized events to every attached listener.

mod book;
mod candles;
mod ticker;
mod trades;

pub use book::{BookDelta, BookStream, OrderBookHandle};
pub use candles::CandleStream;
pub use ticker::TickerStream;
pub use trades::TradeStream;

use crate::domain::ChannelDecoder;

/// Decoder state behind one registry channel
pub enum StreamChannel {
    Trades(TradeStream),
    Ticker(TickerStream),
    Book(BookStream),
    Candles(CandleStream),
    /// Wire channel that only feeds local channels; counts their pins
    Relay(usize),
}

impl StreamChannel {
    /// Keep this channel alive on behalf of a dependent local channel
    pub fn pin(&mut self) {
        match self {
            StreamChannel::Trades(trades) => trades.pin(),
            StreamChannel::Relay(pins) => *pins += 1,
            _ => {}
        }
    }

    pub fn unpin(&mut self) {
        match self {
            StreamChannel::Trades(trades) => trades.unpin(),
            StreamChannel::Relay(pins) => *pins = pins.saturating_sub(1),
            _ => {}
        }
    }

    pub fn as_trades(&mut self) -> Option<&mut TradeStream> {
        match self {
            StreamChannel::Trades(trades) => Some(trades),
            _ => None,
        }
    }

    pub fn as_ticker(&mut self) -> Option<&mut TickerStream> {
        match self {
            StreamChannel::Ticker(ticker) => Some(ticker),
            _ => None,
        }
    }

    pub fn as_book(&mut self) -> Option<&mut BookStream> {
        match self {
            StreamChannel::Book(book) => Some(book),
            _ => None,
        }
    }

    pub fn as_candles(&mut self) -> Option<&mut CandleStream> {
        match self {
            StreamChannel::Candles(candles) => Some(candles),
            _ => None,
        }
    }
}

impl ChannelDecoder for StreamChannel {
    fn listener_count(&self) -> usize {
        match self {
            StreamChannel::Trades(trades) => trades.listener_count(),
            StreamChannel::Ticker(ticker) => ticker.listener_count(),
            StreamChannel::Book(book) => book.listener_count(),
            StreamChannel::Candles(candles) => candles.listener_count(),
            StreamChannel::Relay(pins) => *pins,
        }
    }
}
