//! Bitfinex v2 frame decoding.
//!
//! Data frames are `[chanId, payload]` or `[chanId, "te"|"tu", trade]`;
//! control frames are JSON objects with an `event` field.

use chrono::Utc;
use marketfeed_core::{AssetPair, AssetTrade, BookSide, CandleStick, TickerSnapshot, Timeframe};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::application::BookDelta;
use crate::domain::ChannelKey;
use crate::infrastructure::json;

/// Control frame
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Event {
    Subscribed {
        key: Option<ChannelKey>,
        chan_id: String,
    },
    Unsubscribed {
        chan_id: String,
    },
    Error {
        key: Option<ChannelKey>,
        message: String,
    },
    Info(String),
}

/// Payload of a data frame
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Payload<'a> {
    Heartbeat,
    /// List of entries, sent first after subscribing
    Snapshot(&'a [Value]),
    /// One entry
    Update(&'a Value),
    /// Trade executed; the final record follows as `TradeUpdate`
    TradeExecuted,
    TradeUpdate(&'a Value),
    /// Empty array, sent as a housekeeping frame
    Empty,
}

pub(super) fn trading_symbol(symbol: &str) -> String {
    format!("t{}", symbol.to_uppercase())
}

fn plain_symbol(trading: &str) -> &str {
    trading.strip_prefix('t').unwrap_or(trading)
}

/// Candle channel key, e.g. `trade:1m:tBTCUSD`
pub(super) fn candle_key(symbol: &str, timeframe: Timeframe) -> String {
    format!("trade:{}:{}", timeframe, trading_symbol(symbol))
}

fn channel_key(frame: &Value) -> Option<ChannelKey> {
    let channel = json::str_field(frame, "channel")?;
    if channel == "candles" {
        let key = json::str_field(frame, "key")?;
        let mut parts = key.split(':');
        let _ = parts.next()?;
        let timeframe: Timeframe = parts.next()?.parse().ok()?;
        let symbol = plain_symbol(parts.next()?);
        return Some(ChannelKey::candles(symbol, timeframe));
    }

    let symbol = json::str_field(frame, "symbol")
        .map(plain_symbol)
        .or_else(|| json::str_field(frame, "pair"))?;
    match channel {
        "trades" => Some(ChannelKey::trades(symbol)),
        "ticker" => Some(ChannelKey::ticker(symbol)),
        "book" => Some(ChannelKey::order_book(symbol)),
        _ => None,
    }
}

fn chan_id(frame: &Value) -> Option<String> {
    match frame.get("chanId")? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

pub(super) fn parse_event(frame: &Value) -> Option<Event> {
    match json::str_field(frame, "event")? {
        "subscribed" => Some(Event::Subscribed {
            key: channel_key(frame),
            chan_id: chan_id(frame)?,
        }),
        "unsubscribed" => Some(Event::Unsubscribed {
            chan_id: chan_id(frame)?,
        }),
        "error" => Some(Event::Error {
            key: channel_key(frame),
            message: json::str_field(frame, "msg").unwrap_or_default().to_string(),
        }),
        other => Some(Event::Info(other.to_string())),
    }
}

/// Split a data frame into its channel id and payload
pub(super) fn classify(frame: &Value) -> Option<(String, Payload<'_>)> {
    let items = frame.as_array()?;
    let chan_id = match items.first()? {
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let payload = match items.get(1)? {
        Value::String(s) if s == "hb" => Payload::Heartbeat,
        Value::String(s) if s == "te" => Payload::TradeExecuted,
        Value::String(s) if s == "tu" => Payload::TradeUpdate(items.get(2)?),
        Value::Array(entries) if entries.is_empty() => Payload::Empty,
        Value::Array(entries) if entries[0].is_array() => Payload::Snapshot(entries),
        value @ Value::Array(_) => Payload::Update(value),
        _ => return None,
    };
    Some((chan_id, payload))
}

/// `[id, mts, amount, price]`
pub(super) fn parse_trade(pair: &AssetPair, entry: &Value) -> Option<AssetTrade> {
    let timestamp = json::from_millis(json::integer(entry.get(1)?)?)?;
    let amount = json::decimal_at(entry, 2)?;
    let price = json::decimal_at(entry, 3)?;
    Some(AssetTrade::from_signed_amount(pair, price, amount, timestamp))
}

/// `[price, count, amount]`.
///
/// A positive count upserts on the side given by the sign of `amount`. A zero
/// count deletes: `amount` 1 means bids and -1 means asks. Any other zero-count
/// entry is ambiguous and dropped.
pub(super) fn parse_book_entry(entry: &Value) -> Option<BookDelta> {
    let price = json::decimal_at(entry, 0)?;
    let count = json::integer(entry.get(1)?)?;
    let amount = json::decimal_at(entry, 2)?;

    if count > 0 {
        let side = if amount.is_sign_positive() {
            BookSide::Bid
        } else {
            BookSide::Ask
        };
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        return Some(BookDelta::new(side, price, amount.abs()).with_order_count(count));
    }

    if count == 0 {
        if amount == Decimal::ONE {
            return Some(BookDelta::new(BookSide::Bid, price, Decimal::ZERO));
        }
        if amount == Decimal::NEGATIVE_ONE {
            return Some(BookDelta::new(BookSide::Ask, price, Decimal::ZERO));
        }
    }

    tracing::warn!(%price, count, %amount, "Ambiguous book entry, dropping");
    None
}

/// Snapshot entries split into `(bids, asks)` ladders
pub(super) fn split_book_snapshot(
    entries: &[Value],
) -> (Vec<(Decimal, Decimal, u32)>, Vec<(Decimal, Decimal, u32)>) {
    let mut bids = Vec::new();
    let mut asks = Vec::new();
    for delta in entries.iter().filter_map(parse_book_entry) {
        if delta.size.is_zero() {
            continue;
        }
        let level = (delta.price, delta.size, delta.order_count);
        match delta.side {
            BookSide::Bid => bids.push(level),
            BookSide::Ask => asks.push(level),
        }
    }
    (bids, asks)
}

/// `[bid, bidSize, ask, askSize, change, changePct, last, volume, high, low]`
pub(super) fn parse_ticker(payload: &Value) -> Option<TickerSnapshot> {
    let field = |index| json::decimal_at(payload, index);
    let snapshot = TickerSnapshot {
        bid: field(0)?,
        bid_size: field(1)?,
        ask: field(2)?,
        ask_size: field(3)?,
        daily_change: field(4)?,
        // fractional on the wire, 0.01 == 1%
        daily_change_percent: field(5)? * Decimal::ONE_HUNDRED,
        last_price: field(6)?,
        volume: field(7)?,
        high: field(8)?,
        low: field(9)?,
        timestamp: Utc::now(),
        ..Default::default()
    };
    Some(snapshot.with_open_from_change())
}

/// `[mts, open, close, high, low, volume]`
pub(super) fn parse_candle(entry: &Value) -> Option<CandleStick> {
    Some(CandleStick {
        timestamp: json::from_millis(json::integer(entry.get(0)?)?)?,
        open: json::decimal_at(entry, 1)?,
        close: json::decimal_at(entry, 2)?,
        high: json::decimal_at(entry, 3)?,
        low: json::decimal_at(entry, 4)?,
        volume: json::decimal_at(entry, 5)?,
    })
}

/// Pairs listed by the exchange; Bitfinex offers no CORS-free public list
pub(super) const PAIRS: &[&str] = &[
    "BTCUSD", "ETHUSD", "ETHBTC", "XMRUSD", "XMRBTC", "LTCUSD", "LTCBTC", "ETCBTC", "ETCUSD",
    "RRTUSD", "RRTBTC", "ZECUSD", "ZECBTC", "DSHUSD", "DSHBTC", "BCCBTC", "BCUBTC", "BCCUSD",
    "BCUUSD", "XRPUSD", "XRPBTC", "IOTUSD", "IOTBTC", "IOTETH", "EOSUSD", "EOSBTC", "EOSETH",
    "SANUSD", "SANBTC", "SANETH", "OMGUSD", "OMGBTC", "OMGETH", "BCHUSD", "BCHBTC", "BCHETH",
    "NEOUSD", "NEOBTC", "NEOETH", "ETPUSD", "ETPBTC", "ETPETH", "QTMUSD", "QTMBTC", "QTMETH",
    "BT1USD", "BT2USD", "BT1BTC", "BT2BTC", "AVTUSD", "AVTBTC", "AVTETH", "EDOUSD", "EDOBTC",
    "EDOETH", "BG1USD", "BG2USD", "BG1BTC", "BG2BTC", "BTGUSD", "BTGBTC",
];
