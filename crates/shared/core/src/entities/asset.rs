use serde::{Deserialize, Serialize};
use std::fmt;

/// A single asset, identified by its shortcode (e.g. "BTC")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Asset(String);

impl Asset {
    pub fn new(shortcode: impl Into<String>) -> Self {
        Asset(shortcode.into().to_uppercase())
    }

    pub fn shortcode(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Asset {
    fn from(s: &str) -> Self {
        Asset::new(s)
    }
}

/// A tradeable pair as exposed to consumers
///
/// `symbol` is the exchange-agnostic lookup key (primary followed by secondary,
/// upper case). Comparisons against external strings are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetPair {
    pub primary: Asset,
    pub secondary: Asset,
    pub symbol: String,
}

impl AssetPair {
    pub fn new(primary: impl Into<Asset>, secondary: impl Into<Asset>) -> Self {
        let primary = primary.into();
        let secondary = secondary.into();
        let symbol = format!("{}{}", primary, secondary);
        AssetPair {
            primary,
            secondary,
            symbol,
        }
    }

    /// Build a pair from a combined symbol such as "btcusd"
    pub fn from_symbol(symbol: &str) -> Self {
        let (primary, secondary) = split_symbol_pair(symbol);
        AssetPair::new(primary, secondary)
    }

    /// Build a pair from a delimited product name such as "BTC/USD" or "BTC-USD"
    pub fn from_delimited(name: &str, delimiter: char) -> Option<Self> {
        let (primary, secondary) = name.split_once(delimiter)?;
        if primary.is_empty() || secondary.is_empty() {
            return None;
        }
        Some(AssetPair::new(primary, secondary))
    }

    /// Case-insensitive comparison against a combined symbol
    pub fn matches(&self, symbol: &str) -> bool {
        self.symbol.eq_ignore_ascii_case(symbol)
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.primary, self.secondary)
    }
}

/// Split a combined pair string into its primary and secondary assets.
///
/// The primary asset is the first three characters; everything after is the
/// secondary asset. Symbols shorter than that yield an empty secondary.
pub fn split_symbol_pair(symbol: &str) -> (Asset, Asset) {
    let split = symbol
        .char_indices()
        .nth(3)
        .map(|(idx, _)| idx)
        .unwrap_or(symbol.len());
    let (primary, secondary) = symbol.split_at(split);
    (Asset::new(primary), Asset::new(secondary))
}
