use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::asset::{Asset, AssetPair};
use crate::values::{Price, Quantity, Timestamp};

/// Aggressor side of an executed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeType {
    Buy,
    Sell,
}

impl TradeType {
    /// Classify a signed wire amount: negative means sell
    pub fn from_signed(amount: Decimal) -> Self {
        if amount.is_sign_negative() && !amount.is_zero() {
            TradeType::Sell
        } else {
            TradeType::Buy
        }
    }
}

/// Normalized trade execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetTrade {
    pub primary: Asset,
    pub secondary: Asset,
    pub price: Price,
    /// Traded amount, never negative
    pub volume: Quantity,
    pub trade_type: TradeType,
    pub timestamp: Timestamp,
}

impl AssetTrade {
    pub fn new(
        pair: &AssetPair,
        price: Price,
        volume: Quantity,
        trade_type: TradeType,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            primary: pair.primary.clone(),
            secondary: pair.secondary.clone(),
            price,
            volume: volume.abs(),
            trade_type,
            timestamp,
        }
    }

    /// Create a trade from an exchange that encodes the side in the amount sign
    pub fn from_signed_amount(
        pair: &AssetPair,
        price: Price,
        amount: Decimal,
        timestamp: Timestamp,
    ) -> Self {
        Self::new(pair, price, amount, TradeType::from_signed(amount), timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_signed_amount_normalized() {
        let pair = AssetPair::from_symbol("BTCUSD");
        let ts = Utc.timestamp_opt(1_500_000_000, 0).unwrap();

        let sell = AssetTrade::from_signed_amount(&pair, dec!(4000), dec!(-0.25), ts);
        assert_eq!(sell.trade_type, TradeType::Sell);
        assert_eq!(sell.volume, dec!(0.25));

        let buy = AssetTrade::from_signed_amount(&pair, dec!(4000), dec!(1.5), ts);
        assert_eq!(buy.trade_type, TradeType::Buy);
        assert_eq!(buy.volume, dec!(1.5));
        assert_eq!(buy.primary.shortcode(), "BTC");
        assert_eq!(buy.secondary.shortcode(), "USD");
    }

    #[test]
    fn test_volume_never_negative() {
        let pair = AssetPair::from_symbol("ETHBTC");
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let trade = AssetTrade::new(&pair, dec!(0.05), dec!(-3), TradeType::Sell, ts);
        assert_eq!(trade.volume, dec!(3));
    }
}
