//! Bitstamp v2 websocket events and REST payloads

use marketfeed_core::{AssetPair, AssetTrade, BookSide, CandleStick, TickerSnapshot, TradeType};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::application::BookDelta;
use crate::domain::{ChannelKey, InformationKind};
use crate::infrastructure::json;

const TRADES_PREFIX: &str = "live_trades_";
const BOOK_PREFIX: &str = "diff_order_book_";

/// Every websocket frame
#[derive(Debug, Clone, Deserialize)]
pub(super) struct Envelope {
    pub event: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub data: Value,
}

/// Lower-case pair used in channel names and REST paths
pub(super) fn url_symbol(symbol: &str) -> String {
    symbol.to_lowercase()
}

pub(super) fn channel_name(key: &ChannelKey) -> Option<String> {
    let prefix = match key.kind {
        InformationKind::Trades => TRADES_PREFIX,
        InformationKind::OrderBook => BOOK_PREFIX,
        _ => return None,
    };
    Some(format!("{prefix}{}", url_symbol(&key.symbol)))
}

pub(super) fn channel_key(channel: &str) -> Option<ChannelKey> {
    if let Some(symbol) = channel.strip_prefix(TRADES_PREFIX) {
        return Some(ChannelKey::trades(symbol));
    }
    channel.strip_prefix(BOOK_PREFIX).map(ChannelKey::order_book)
}

/// Microseconds since the epoch; diffs and snapshots are ordered by it
pub(super) fn microtimestamp(data: &Value) -> Option<i64> {
    json::integer_field(data, "microtimestamp")
}

/// `data` of a `trade` event. `type` 0 is a buy, 1 a sell.
pub(super) fn parse_trade(pair: &AssetPair, data: &Value) -> Option<AssetTrade> {
    let price = json::decimal_field(data, "price_str").or_else(|| json::decimal_field(data, "price"))?;
    let amount =
        json::decimal_field(data, "amount_str").or_else(|| json::decimal_field(data, "amount"))?;
    let trade_type = match json::integer_field(data, "type")? {
        0 => TradeType::Buy,
        1 => TradeType::Sell,
        _ => return None,
    };
    let timestamp = microtimestamp(data)
        .and_then(json::from_micros)
        .or_else(|| json::integer_field(data, "timestamp").and_then(json::from_secs))?;
    Some(AssetTrade::new(pair, price, amount, trade_type, timestamp))
}

fn levels(data: &Value, side: &str) -> Vec<(Decimal, Decimal)> {
    data.get(side)
        .and_then(Value::as_array)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|level| Some((json::decimal_at(level, 0)?, json::decimal_at(level, 1)?)))
                .collect()
        })
        .unwrap_or_default()
}

/// `data` of a `diff_order_book` event; every level carries the event's
/// microtimestamp as its sequence
pub(super) fn parse_diff(data: &Value) -> Vec<BookDelta> {
    let sequence = microtimestamp(data);
    let bids = levels(data, "bids").into_iter().map(|l| (BookSide::Bid, l));
    let asks = levels(data, "asks").into_iter().map(|l| (BookSide::Ask, l));
    bids.chain(asks)
        .map(|(side, (price, size))| {
            let delta = BookDelta::new(side, price, size);
            match sequence {
                Some(seq) => delta.with_sequence(seq),
                None => delta,
            }
        })
        .collect()
}

/// Full ladder from REST `order_book/{pair}/`
pub(super) struct BookSnapshot {
    pub bids: Vec<(Decimal, Decimal, u32)>,
    pub asks: Vec<(Decimal, Decimal, u32)>,
    pub sequence: Option<i64>,
}

pub(super) fn parse_book_snapshot(body: &Value) -> BookSnapshot {
    let ladder = |side| {
        levels(body, side)
            .into_iter()
            .map(|(price, size)| (price, size, 0))
            .collect()
    };
    BookSnapshot {
        bids: ladder("bids"),
        asks: ladder("asks"),
        sequence: microtimestamp(body),
    }
}

/// REST `ticker/{pair}/`
pub(super) fn parse_ticker(body: &Value) -> Option<TickerSnapshot> {
    let field = |name| json::decimal_field(body, name);
    let snapshot = TickerSnapshot {
        last_price: field("last")?,
        bid: field("bid").unwrap_or_default(),
        ask: field("ask").unwrap_or_default(),
        high: field("high").unwrap_or_default(),
        low: field("low").unwrap_or_default(),
        open: field("open").unwrap_or_default(),
        volume: field("volume").unwrap_or_default(),
        timestamp: json::integer_field(body, "timestamp").and_then(json::from_secs)?,
        ..Default::default()
    };
    Some(snapshot.with_change_from_open())
}

/// REST `ohlc/{pair}/`: `{"data": {"ohlc": [{timestamp, open, high, low, close, volume}]}}`
pub(super) fn parse_ohlc(body: &Value) -> Vec<CandleStick> {
    let Some(rows) = body.pointer("/data/ohlc").and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(CandleStick {
                timestamp: json::integer_field(row, "timestamp").and_then(json::from_secs)?,
                open: json::decimal_field(row, "open")?,
                high: json::decimal_field(row, "high")?,
                low: json::decimal_field(row, "low")?,
                close: json::decimal_field(row, "close")?,
                volume: json::decimal_field(row, "volume")?,
            })
        })
        .collect()
}

/// REST `trading-pairs-info/`: names such as `BTC/USD`
pub(super) fn parse_pairs(body: &Value) -> Vec<AssetPair> {
    body.as_array()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| json::str_field(entry, "name"))
                .filter_map(|name| AssetPair::from_delimited(name, '/'))
                .collect()
        })
        .unwrap_or_default()
}
