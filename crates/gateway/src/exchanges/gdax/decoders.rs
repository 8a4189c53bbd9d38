//! GDAX feed messages and REST payloads

use chrono::{DateTime, Utc};
use marketfeed_core::{AssetPair, AssetTrade, BookSide, CandleStick, TickerSnapshot, TradeType};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::application::BookDelta;
use crate::domain::InformationKind;
use crate::infrastructure::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(super) enum Side {
    Buy,
    Sell,
}

impl Side {
    fn trade_type(self) -> TradeType {
        match self {
            Side::Buy => TradeType::Buy,
            Side::Sell => TradeType::Sell,
        }
    }

    fn book_side(self) -> BookSide {
        match self {
            Side::Buy => BookSide::Bid,
            Side::Sell => BookSide::Ask,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct ChannelInfo {
    pub name: String,
    #[serde(default)]
    pub product_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Match {
    pub product_id: String,
    pub time: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Ticker {
    pub product_id: String,
    pub price: Decimal,
    #[serde(default)]
    pub open_24h: Decimal,
    #[serde(default)]
    pub volume_24h: Decimal,
    #[serde(default)]
    pub low_24h: Decimal,
    #[serde(default)]
    pub high_24h: Decimal,
    #[serde(default)]
    pub best_bid: Decimal,
    #[serde(default)]
    pub best_ask: Decimal,
    /// Absent on the first ticker after subscribing
    pub time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum Message {
    Subscriptions {
        channels: Vec<ChannelInfo>,
    },
    Snapshot {
        product_id: String,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    },
    #[serde(rename = "l2update")]
    L2Update {
        product_id: String,
        changes: Vec<(Side, Decimal, Decimal)>,
    },
    Match(Match),
    LastMatch(Match),
    Ticker(Ticker),
    Error {
        message: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Heartbeat,
    #[serde(other)]
    Other,
}

/// Feed channel carrying `kind`
pub(super) fn channel_name(kind: InformationKind) -> Option<&'static str> {
    match kind {
        InformationKind::Trades => Some("matches"),
        InformationKind::Ticker => Some("ticker"),
        InformationKind::OrderBook => Some("level2"),
        InformationKind::Candles | InformationKind::Market => None,
    }
}

pub(super) fn channel_kind(name: &str) -> Option<InformationKind> {
    match name {
        "matches" => Some(InformationKind::Trades),
        "ticker" => Some(InformationKind::Ticker),
        "level2" => Some(InformationKind::OrderBook),
        _ => None,
    }
}

/// `BTC-USD` → `BTCUSD`
pub(super) fn symbol_of(product_id: &str) -> String {
    product_id.replace('-', "").to_uppercase()
}

pub(super) fn to_trade(pair: &AssetPair, m: &Match) -> AssetTrade {
    AssetTrade::new(pair, m.price, m.size, m.side.trade_type(), m.time)
}

pub(super) fn to_ticker(t: &Ticker) -> TickerSnapshot {
    TickerSnapshot {
        bid: t.best_bid,
        ask: t.best_ask,
        last_price: t.price,
        open: t.open_24h,
        high: t.high_24h,
        low: t.low_24h,
        volume: t.volume_24h,
        timestamp: t.time.unwrap_or_else(Utc::now),
        ..Default::default()
    }
    .with_change_from_open()
}

pub(super) fn to_deltas(changes: &[(Side, Decimal, Decimal)]) -> impl Iterator<Item = BookDelta> + '_ {
    changes
        .iter()
        .map(|(side, price, size)| BookDelta::new(side.book_side(), *price, *size))
}

pub(super) fn to_levels(levels: &[(Decimal, Decimal)]) -> Vec<(Decimal, Decimal, u32)> {
    levels.iter().map(|(price, size)| (*price, *size, 0)).collect()
}

/// REST `/products/{id}/trades` entry
#[derive(Debug, Clone, Deserialize)]
pub(super) struct RestTrade {
    pub time: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
    pub side: Side,
}

pub(super) fn parse_rest_trades(pair: &AssetPair, body: Value) -> Vec<AssetTrade> {
    match serde_json::from_value::<Vec<RestTrade>>(body) {
        Ok(trades) => trades
            .iter()
            .map(|t| AssetTrade::new(pair, t.price, t.size, t.side.trade_type(), t.time))
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Malformed trade history");
            Vec::new()
        }
    }
}

/// REST candle row: `[time, low, high, open, close, volume]`
pub(super) fn parse_candle_row(row: &Value) -> Option<CandleStick> {
    Some(CandleStick {
        timestamp: json::from_secs(json::integer(row.get(0)?)?)?,
        low: json::decimal_at(row, 1)?,
        high: json::decimal_at(row, 2)?,
        open: json::decimal_at(row, 3)?,
        close: json::decimal_at(row, 4)?,
        volume: json::decimal_at(row, 5)?,
    })
}

pub(super) fn parse_candles(body: &Value) -> Vec<CandleStick> {
    body.as_array()
        .map(|rows| rows.iter().filter_map(parse_candle_row).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
struct Product {
    id: String,
    base_currency: Option<String>,
    quote_currency: Option<String>,
}

/// REST `/products` → pairs, keyed by product id
pub(super) fn parse_products(body: Value) -> Vec<(String, AssetPair)> {
    let products: Vec<Product> = match serde_json::from_value(body) {
        Ok(products) => products,
        Err(e) => {
            tracing::debug!(error = %e, "Malformed product list");
            return Vec::new();
        }
    };
    products
        .into_iter()
        .filter_map(|p| {
            let pair = match (&p.base_currency, &p.quote_currency) {
                (Some(base), Some(quote)) => AssetPair::new(base.as_str(), quote.as_str()),
                _ => AssetPair::from_delimited(&p.id, '-')?,
            };
            Some((p.id, pair))
        })
        .collect()
}
