//! Poloniex push API frames and REST payloads.
//!
//! Every frame is an array led by a numeric channel id. Pair channels carry
//! `[chanId, seq, [update...]]`; the combined ticker is channel 1002.

use chrono::Utc;
use marketfeed_core::{AssetPair, AssetTrade, BookSide, CandleStick, TickerSnapshot, TradeType};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::application::BookDelta;
use crate::infrastructure::json;

pub(super) const TICKER_CHANNEL: i64 = 1002;
pub(super) const HEARTBEAT_CHANNEL: i64 = 1010;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Frame<'a> {
    Heartbeat,
    /// `[chanId, 1]`, sent once a subscription is accepted
    Ack(i64),
    /// One pair's ticker row
    Ticker(&'a Value),
    Market {
        chan_id: i64,
        seq: i64,
        updates: &'a [Value],
    },
}

pub(super) fn classify(frame: &Value) -> Option<Frame<'_>> {
    let items = frame.as_array()?;
    let chan_id = json::integer(items.first()?)?;
    if chan_id == HEARTBEAT_CHANNEL {
        return Some(Frame::Heartbeat);
    }
    match (items.get(1), items.get(2)) {
        (Some(_), None) => Some(Frame::Ack(chan_id)),
        (_, Some(row)) if chan_id == TICKER_CHANNEL => Some(Frame::Ticker(row)),
        (Some(seq), Some(Value::Array(updates))) => Some(Frame::Market {
            chan_id,
            seq: json::integer(seq)?,
            updates,
        }),
        _ => None,
    }
}

/// `BTC_ETH` → ETH/BTC: the quote currency leads on the wire
pub(super) fn pair_of(product: &str) -> Option<AssetPair> {
    let (quote, base) = product.split_once('_')?;
    if quote.is_empty() || base.is_empty() {
        return None;
    }
    Some(AssetPair::new(base, quote))
}

/// Currency pair named by an `i` snapshot, if the frame has one
pub(super) fn snapshot_product(updates: &[Value]) -> Option<&str> {
    updates
        .iter()
        .find(|entry| entry.get(0).and_then(Value::as_str) == Some("i"))
        .and_then(|entry| json::str_field(entry.get(1)?, "currencyPair"))
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum MarketUpdate {
    Snapshot {
        bids: Vec<(Decimal, Decimal, u32)>,
        asks: Vec<(Decimal, Decimal, u32)>,
    },
    Delta(BookDelta),
    Trade(AssetTrade),
}

fn ladder(side: Option<&Value>) -> Vec<(Decimal, Decimal, u32)> {
    side.and_then(Value::as_object)
        .map(|levels| {
            levels
                .iter()
                .filter_map(|(price, size)| Some((price.parse().ok()?, json::decimal(size)?, 0)))
                .collect()
        })
        .unwrap_or_default()
}

/// One entry of a pair frame:
/// - `["i", {"currencyPair", "orderBook": [asks, bids]}]`
/// - `["o", 1=bid|0=ask, price, size]`
/// - `["t", id, 1=buy|0=sell, price, size, ts]`
pub(super) fn parse_update(pair: &AssetPair, entry: &Value, seq: i64) -> Option<MarketUpdate> {
    match entry.get(0)?.as_str()? {
        "i" => {
            let book = entry.get(1)?.get("orderBook")?;
            Some(MarketUpdate::Snapshot {
                asks: ladder(book.get(0)),
                bids: ladder(book.get(1)),
            })
        }
        "o" => {
            let side = match json::integer(entry.get(1)?)? {
                1 => BookSide::Bid,
                0 => BookSide::Ask,
                _ => return None,
            };
            let delta = BookDelta::new(side, json::decimal_at(entry, 2)?, json::decimal_at(entry, 3)?);
            Some(MarketUpdate::Delta(delta.with_sequence(seq)))
        }
        "t" => {
            let trade_type = match json::integer(entry.get(2)?)? {
                1 => TradeType::Buy,
                0 => TradeType::Sell,
                _ => return None,
            };
            let timestamp = json::from_secs(json::integer(entry.get(5)?)?)?;
            Some(MarketUpdate::Trade(AssetTrade::new(
                pair,
                json::decimal_at(entry, 3)?,
                json::decimal_at(entry, 4)?,
                trade_type,
                timestamp,
            )))
        }
        _ => None,
    }
}

/// Change given as a fraction of the open: `open = last / (1 + pct)`
fn ticker_from_change(
    last: Decimal,
    ask: Decimal,
    bid: Decimal,
    fraction: Decimal,
    volume: Decimal,
    high: Decimal,
    low: Decimal,
) -> TickerSnapshot {
    let divisor = Decimal::ONE + fraction;
    let open = if divisor.is_zero() { last } else { last / divisor };
    TickerSnapshot {
        last_price: last,
        ask,
        bid,
        high,
        low,
        volume,
        open,
        daily_change: last - open,
        daily_change_percent: fraction * Decimal::ONE_HUNDRED,
        timestamp: Utc::now(),
        ..Default::default()
    }
}

/// `[pairId, last, lowestAsk, highestBid, pctChange, baseVol, quoteVol, isFrozen, high, low]`
pub(super) fn parse_ticker_row(row: &Value) -> Option<(i64, TickerSnapshot)> {
    let pair_id = json::integer(row.get(0)?)?;
    let field = |index| json::decimal_at(row, index);
    let snapshot = ticker_from_change(
        field(1)?,
        field(2)?,
        field(3)?,
        field(4)?,
        field(6)?,
        field(8).unwrap_or_default(),
        field(9).unwrap_or_default(),
    );
    Some((pair_id, snapshot))
}

/// One market from REST `returnTicker`
#[derive(Debug, Clone)]
pub(super) struct Market {
    pub product: String,
    pub id: Option<i64>,
    pub pair: AssetPair,
    pub ticker: TickerSnapshot,
    /// Ranking weight: base volume times last price
    pub weight: Decimal,
}

pub(super) fn parse_markets(body: &Value) -> Vec<Market> {
    let Some(table) = body.as_object() else {
        return Vec::new();
    };
    let mut markets: Vec<Market> = table
        .iter()
        .filter_map(|(product, row)| {
            let field = |name| json::decimal_field(row, name);
            let last = field("last")?;
            let ticker = ticker_from_change(
                last,
                field("lowestAsk").unwrap_or_default(),
                field("highestBid").unwrap_or_default(),
                field("percentChange").unwrap_or_default(),
                field("quoteVolume").unwrap_or_default(),
                field("high24hr").unwrap_or_default(),
                field("low24hr").unwrap_or_default(),
            );
            Some(Market {
                product: product.clone(),
                id: json::integer_field(row, "id"),
                pair: pair_of(product)?,
                weight: field("baseVolume").unwrap_or_default() * last,
                ticker,
            })
        })
        .collect();
    markets.sort_by(|a, b| b.weight.cmp(&a.weight));
    markets
}

/// REST `returnChartData` row
pub(super) fn parse_chart(body: &Value) -> Vec<CandleStick> {
    let Some(rows) = body.as_array() else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            Some(CandleStick {
                timestamp: json::from_secs(json::integer_field(row, "date")?)?,
                open: json::decimal_field(row, "open")?,
                high: json::decimal_field(row, "high")?,
                low: json::decimal_field(row, "low")?,
                close: json::decimal_field(row, "close")?,
                volume: json::decimal_field(row, "volume")?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_classify() {
        assert_eq!(classify(&json!([1010])), Some(Frame::Heartbeat));
        assert_eq!(classify(&json!([1002, 1])), Some(Frame::Ack(1002)));
        assert!(matches!(classify(&json!([1002, null, [148, "1"]])), Some(Frame::Ticker(_))));
        assert!(matches!(
            classify(&json!([148, 7, [["o", 1, "0.1", "2"]]])),
            Some(Frame::Market { chan_id: 148, seq: 7, .. })
        ));
        assert_eq!(classify(&json!({"error": "x"})), None);
    }

    #[test]
    fn test_pair_reversed() {
        let pair = pair_of("BTC_ETH").unwrap();
        assert_eq!(pair.symbol, "ETHBTC");
        assert_eq!(pair.secondary.shortcode(), "BTC");
        assert!(pair_of("BTCETH").is_none());
    }

    #[test]
    fn test_updates() {
        let pair = pair_of("BTC_ETH").unwrap();
        let snapshot = json!(["i", {"currencyPair": "BTC_ETH", "orderBook": [{"0.052": "1.5"}, {"0.051": "2", "0.050": "3"}]}]);
        assert_eq!(snapshot_product(std::slice::from_ref(&snapshot)), Some("BTC_ETH"));
        let Some(MarketUpdate::Snapshot { bids, asks }) = parse_update(&pair, &snapshot, 1) else {
            panic!("expected snapshot");
        };
        assert_eq!(asks, vec![(dec!(0.052), dec!(1.5), 0)]);
        assert_eq!(bids.len(), 2);

        let Some(MarketUpdate::Delta(delta)) = parse_update(&pair, &json!(["o", 0, "0.053", "0"]), 9) else {
            panic!("expected delta");
        };
        assert_eq!((delta.side, delta.sequence), (BookSide::Ask, Some(9)));

        let Some(MarketUpdate::Trade(trade)) =
            parse_update(&pair, &json!(["t", "42", 0, "0.05", "1.25", 1500000000]), 9)
        else {
            panic!("expected trade");
        };
        assert_eq!(trade.trade_type, TradeType::Sell);
        assert_eq!(trade.volume, dec!(1.25));

        assert_eq!(parse_update(&pair, &json!(["o", 5, "1", "1"]), 1), None);
    }

    #[test]
    fn test_ticker_open_from_fraction() {
        let (id, ticker) =
            parse_ticker_row(&json!([148, "110", "111", "109", "0.1", "50", "5", 0, "120", "90"])).unwrap();
        assert_eq!(id, 148);
        assert_eq!(ticker.open, dec!(100));
        assert_eq!(ticker.daily_change, dec!(10));
        assert_eq!(ticker.daily_change_percent, dec!(10));
        assert_eq!(ticker.volume, dec!(5));
    }

    #[test]
    fn test_markets_sorted_by_weight() {
        let body = json!({
            "BTC_LTC": {"id": 50, "last": "0.01", "baseVolume": "10", "percentChange": "0"},
            "BTC_ETH": {"id": 148, "last": "0.05", "baseVolume": "100", "percentChange": "0.02"},
            "USDT_BTC": {"id": 121, "last": "4000", "baseVolume": "0"}
        });
        let markets = parse_markets(&body);
        let symbols: Vec<_> = markets.iter().map(|m| m.pair.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETHBTC", "LTCBTC", "BTCUSDT"]);
        assert_eq!(markets[0].id, Some(148));
    }
}
