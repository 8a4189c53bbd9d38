//! L2 order book reconstruction from snapshot + delta messages.
//!
//! Both ladders are kept sorted (bids descending, asks ascending) and every
//! position carries the cumulative depth of all equal-or-better levels on its
//! side. Cumulative depth is recomputed over the whole side after each mutation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::values::{Price, Quantity};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookError {
    #[error("Negative size {size} at {price} on {side:?}")]
    NegativeSize {
        side: BookSide,
        price: Price,
        size: Quantity,
    },
    #[error("Invalid price level {0}")]
    InvalidPrice(Price),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookSide {
    Bid,
    Ask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookAction {
    Update,
    Delete,
}

/// One aggregated price level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookPosition {
    pub side: BookSide,
    pub price: Price,
    pub size: Quantity,
    /// Number of orders at this level, 0 when the exchange does not report it
    pub order_count: u32,
    /// Sum of sizes at this and every better price on the same side
    pub cumulative: Quantity,
}

/// A single price-level mutation, as delivered to change listeners
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookChange {
    pub action: BookAction,
    pub side: BookSide,
    /// Resulting position for updates, removed position for deletes
    pub position: OrderBookPosition,
}

#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    bids: Vec<OrderBookPosition>,
    asks: Vec<OrderBookPosition>,
    /// Externally visible levels per side; the full ladder is always kept
    visible_depth: Option<usize>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book that exposes only the top `depth` levels per side
    pub fn with_visible_depth(depth: usize) -> Self {
        OrderBook {
            visible_depth: Some(depth),
            ..Self::default()
        }
    }

    pub fn visible_depth(&self) -> Option<usize> {
        self.visible_depth
    }

    /// Replace both ladders from a full snapshot of `(price, size, order_count)`.
    ///
    /// Zero-size levels are skipped; invalid levels are skipped and counted.
    /// Returns the number of rejected levels.
    pub fn apply_snapshot<B, A>(&mut self, bids: B, asks: A) -> usize
    where
        B: IntoIterator<Item = (Price, Quantity, u32)>,
        A: IntoIterator<Item = (Price, Quantity, u32)>,
    {
        let mut rejected = 0;
        self.bids = build_ladder(BookSide::Bid, bids, &mut rejected);
        self.asks = build_ladder(BookSide::Ask, asks, &mut rejected);
        rejected
    }

    /// Apply one price-level delta. `size == 0` deletes the level.
    ///
    /// Returns the changes to the visible book, best first. Empty when
    /// nothing observable changed (deleting an absent level, or a mutation
    /// outside the visible window). A mutation that shifts the window edge
    /// also reports the level that left or entered view.
    pub fn apply_delta(
        &mut self,
        side: BookSide,
        price: Price,
        size: Quantity,
        order_count: u32,
    ) -> Result<Vec<OrderBookChange>, BookError> {
        if price.is_sign_negative() || price.is_zero() {
            return Err(BookError::InvalidPrice(price));
        }
        if size.is_sign_negative() && !size.is_zero() {
            return Err(BookError::NegativeSize { side, price, size });
        }

        let visible = self.visible_depth.unwrap_or(usize::MAX);
        let ladder = self.ladder_mut(side);
        let found = ladder.binary_search_by(|pos| compare_level(side, &pos.price, &price));
        let mut changes = Vec::new();

        if size.is_zero() {
            let Ok(idx) = found else {
                return Ok(changes);
            };
            let removed = ladder.remove(idx);
            recompute_cumulative(ladder);
            if idx < visible {
                changes.push(OrderBookChange {
                    action: BookAction::Delete,
                    side,
                    position: removed,
                });
                // hidden level moves up into the window
                if let Some(entering) = visible.checked_sub(1).and_then(|last| ladder.get(last)) {
                    changes.push(OrderBookChange {
                        action: BookAction::Update,
                        side,
                        position: entering.clone(),
                    });
                }
            }
            return Ok(changes);
        }

        let (idx, inserted) = match found {
            Ok(idx) => {
                let pos = &mut ladder[idx];
                pos.size = size;
                pos.order_count = order_count;
                (idx, false)
            }
            Err(idx) => {
                ladder.insert(
                    idx,
                    OrderBookPosition {
                        side,
                        price,
                        size,
                        order_count,
                        cumulative: size,
                    },
                );
                (idx, true)
            }
        };
        recompute_cumulative(ladder);

        if idx < visible {
            changes.push(OrderBookChange {
                action: BookAction::Update,
                side,
                position: ladder[idx].clone(),
            });
            // previous last visible level is pushed out of the window
            if let Some(leaving) = ladder.get(visible).filter(|_| inserted) {
                changes.push(OrderBookChange {
                    action: BookAction::Delete,
                    side,
                    position: leaving.clone(),
                });
            }
        }
        Ok(changes)
    }

    /// Visible bids, best first
    pub fn bids(&self) -> &[OrderBookPosition] {
        self.visible(&self.bids)
    }

    /// Visible asks, best first
    pub fn asks(&self) -> &[OrderBookPosition] {
        self.visible(&self.asks)
    }

    /// Every bid level held, including those beyond the visible window
    pub fn full_bids(&self) -> &[OrderBookPosition] {
        &self.bids
    }

    /// Every ask level held, including those beyond the visible window
    pub fn full_asks(&self) -> &[OrderBookPosition] {
        &self.asks
    }

    pub fn best_bid(&self) -> Option<&OrderBookPosition> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&OrderBookPosition> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Price> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    fn ladder_mut(&mut self, side: BookSide) -> &mut Vec<OrderBookPosition> {
        match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        }
    }

    fn visible<'a>(&self, ladder: &'a [OrderBookPosition]) -> &'a [OrderBookPosition] {
        match self.visible_depth {
            Some(depth) if depth < ladder.len() => &ladder[..depth],
            _ => ladder,
        }
    }
}

/// Ordering of an existing level relative to `target` in ladder order
fn compare_level(side: BookSide, level: &Price, target: &Price) -> Ordering {
    match side {
        BookSide::Bid => target.cmp(level),
        BookSide::Ask => level.cmp(target),
    }
}

fn build_ladder<I>(side: BookSide, levels: I, rejected: &mut usize) -> Vec<OrderBookPosition>
where
    I: IntoIterator<Item = (Price, Quantity, u32)>,
{
    let mut by_price: BTreeMap<Price, (Quantity, u32)> = BTreeMap::new();
    for (price, size, count) in levels {
        if price.is_sign_negative() || price.is_zero() || size.is_sign_negative() {
            *rejected += 1;
            continue;
        }
        if size.is_zero() {
            continue;
        }
        by_price.insert(price, (size, count));
    }

    let into_position = |(price, (size, order_count)): (Price, (Quantity, u32))| OrderBookPosition {
        side,
        price,
        size,
        order_count,
        cumulative: size,
    };
    let mut ladder: Vec<OrderBookPosition> = match side {
        BookSide::Bid => by_price.into_iter().rev().map(into_position).collect(),
        BookSide::Ask => by_price.into_iter().map(into_position).collect(),
    };
    recompute_cumulative(&mut ladder);
    ladder
}

fn recompute_cumulative(ladder: &mut [OrderBookPosition]) {
    let mut total = Quantity::ZERO;
    for pos in ladder.iter_mut() {
        total += pos.size;
        pos.cumulative = total;
    }
}
