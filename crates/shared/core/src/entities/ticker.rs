use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::values::{Price, Quantity, Timestamp};

/// 24h ticker summary for one pair. Replaced wholesale on every update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub bid: Price,
    pub bid_size: Quantity,
    pub ask: Price,
    pub ask_size: Quantity,
    pub last_price: Price,
    pub high: Price,
    pub low: Price,
    pub open: Price,
    pub daily_change: Decimal,
    /// Percent, already scaled (2.5 means 2.5%)
    pub daily_change_percent: Decimal,
    pub volume: Quantity,
    pub timestamp: Timestamp,
}

impl TickerSnapshot {
    /// Derive the absolute and percent change from `open` and `last_price`
    pub fn with_change_from_open(mut self) -> Self {
        self.daily_change = self.last_price - self.open;
        self.daily_change_percent = if self.open.is_zero() {
            Decimal::ZERO
        } else {
            self.daily_change / self.open * Decimal::ONE_HUNDRED
        };
        self
    }

    /// Derive `open` from `last_price` and the absolute change
    pub fn with_open_from_change(mut self) -> Self {
        self.open = self.last_price - self.daily_change;
        self
    }
}

/// Direction of the last price relative to the previous update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickerDirection {
    Up,
    Down,
    Unchanged,
}

impl TickerDirection {
    pub fn between(previous: Option<&TickerSnapshot>, next: &TickerSnapshot) -> Self {
        match previous {
            Some(prev) if next.last_price > prev.last_price => TickerDirection::Up,
            Some(prev) if next.last_price < prev.last_price => TickerDirection::Down,
            _ => TickerDirection::Unchanged,
        }
    }
}

/// A ticker snapshot tagged with its price direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub snapshot: TickerSnapshot,
    pub direction: TickerDirection,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ticker(last: Decimal) -> TickerSnapshot {
        TickerSnapshot {
            last_price: last,
            ..Default::default()
        }
    }

    #[test]
    fn test_direction() {
        let prev = ticker(dec!(100));
        assert_eq!(
            TickerDirection::between(Some(&prev), &ticker(dec!(101))),
            TickerDirection::Up
        );
        assert_eq!(
            TickerDirection::between(Some(&prev), &ticker(dec!(99.5))),
            TickerDirection::Down
        );
        assert_eq!(
            TickerDirection::between(Some(&prev), &ticker(dec!(100))),
            TickerDirection::Unchanged
        );
        assert_eq!(
            TickerDirection::between(None, &ticker(dec!(100))),
            TickerDirection::Unchanged
        );
    }

    #[test]
    fn test_change_from_open() {
        let t = TickerSnapshot {
            open: dec!(200),
            last_price: dec!(210),
            ..Default::default()
        }
        .with_change_from_open();

        assert_eq!(t.daily_change, dec!(10));
        assert_eq!(t.daily_change_percent, dec!(5));
    }

    #[test]
    fn test_change_from_zero_open() {
        let t = ticker(dec!(5)).with_change_from_open();
        assert_eq!(t.daily_change, dec!(5));
        assert_eq!(t.daily_change_percent, Decimal::ZERO);
    }

    #[test]
    fn test_open_from_change() {
        let t = TickerSnapshot {
            last_price: dec!(4100),
            daily_change: dec!(-100),
            ..Default::default()
        }
        .with_open_from_change();
        assert_eq!(t.open, dec!(4200));
    }
}
