use marketfeed_core::Timeframe;
use std::fmt;

/// Unique identifier for an exchange
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeId(String);

impl ExchangeId {
    pub fn new(id: impl Into<String>) -> Self {
        ExchangeId(id.into().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ExchangeId {
    fn from(s: &str) -> Self {
        ExchangeId::new(s)
    }
}

impl From<String> for ExchangeId {
    fn from(s: String) -> Self {
        ExchangeId::new(s)
    }
}

/// Well-known exchange identifiers
impl ExchangeId {
    pub fn bitfinex() -> Self {
        ExchangeId::new("bitfinex")
    }

    pub fn gdax() -> Self {
        ExchangeId::new("gdax")
    }

    pub fn bitstamp() -> Self {
        ExchangeId::new("bitstamp")
    }

    pub fn poloniex() -> Self {
        ExchangeId::new("poloniex")
    }
}

/// Kind of market information carried by a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InformationKind {
    Trades,
    Ticker,
    OrderBook,
    Candles,
    /// Trades and book deltas multiplexed on one wire channel
    Market,
}

impl fmt::Display for InformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InformationKind::Trades => "trades",
            InformationKind::Ticker => "ticker",
            InformationKind::OrderBook => "book",
            InformationKind::Candles => "candles",
            InformationKind::Market => "market",
        };
        f.write_str(name)
    }
}

/// Symbol of channels that carry every pair at once
pub const ALL_SYMBOLS: &str = "*";

/// Composite key identifying one logical subscription on one exchange
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub kind: InformationKind,
    pub symbol: String,
    pub timeframe: Option<Timeframe>,
}

impl ChannelKey {
    pub fn new(kind: InformationKind, symbol: impl Into<String>) -> Self {
        ChannelKey {
            kind,
            symbol: symbol.into().to_uppercase(),
            timeframe: None,
        }
    }

    pub fn trades(symbol: impl Into<String>) -> Self {
        ChannelKey::new(InformationKind::Trades, symbol)
    }

    pub fn ticker(symbol: impl Into<String>) -> Self {
        ChannelKey::new(InformationKind::Ticker, symbol)
    }

    pub fn order_book(symbol: impl Into<String>) -> Self {
        ChannelKey::new(InformationKind::OrderBook, symbol)
    }

    pub fn market(symbol: impl Into<String>) -> Self {
        ChannelKey::new(InformationKind::Market, symbol)
    }

    /// Channel carrying `kind` for every pair, such as a combined ticker
    pub fn aggregate(kind: InformationKind) -> Self {
        ChannelKey::new(kind, ALL_SYMBOLS)
    }

    pub fn is_aggregate(&self) -> bool {
        self.symbol == ALL_SYMBOLS
    }

    pub fn candles(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        ChannelKey {
            timeframe: Some(timeframe),
            ..ChannelKey::new(InformationKind::Candles, symbol)
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.timeframe {
            Some(tf) => write!(f, "{}:{}:{}", self.kind, self.symbol, tf),
            None => write!(f, "{}:{}", self.kind, self.symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_id() {
        let id = ExchangeId::new("Bitfinex");
        assert_eq!(id.as_str(), "bitfinex");
        assert_eq!(id, ExchangeId::bitfinex());
    }

    #[test]
    fn test_channel_key() {
        let key = ChannelKey::trades("btcusd");
        assert_eq!(key.symbol, "BTCUSD");
        assert_eq!(key, ChannelKey::trades("BTCUSD"));
        assert_ne!(key, ChannelKey::ticker("BTCUSD"));
        assert_eq!(key.to_string(), "trades:BTCUSD");

        let candles = ChannelKey::candles("ethbtc", Timeframe::one_minute());
        assert_eq!(candles.to_string(), "candles:ETHBTC:1m");
        assert_ne!(
            candles,
            ChannelKey::candles("ETHBTC", Timeframe::one_hour())
        );
    }

    #[test]
    fn test_aggregate_key() {
        let all = ChannelKey::aggregate(InformationKind::Ticker);
        assert!(all.is_aggregate());
        assert_eq!(all.to_string(), "ticker:*");
        assert!(!ChannelKey::ticker("BTCUSD").is_aggregate());
    }
}
