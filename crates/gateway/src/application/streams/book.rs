use marketfeed_core::{
    BookAction, BookSide, OrderBook, OrderBookChange, OrderBookPosition, Price, Quantity,
};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::application::feed::{Feed, FeedReceiver};
use crate::domain::{ExchangeId, SyncStatus};

/// Shared, read-only view of a live order book.
///
/// Every clone is counted as a listener of the book channel; drop the handle
/// to let the channel tear down.
#[derive(Clone)]
pub struct OrderBookHandle {
    exchange: ExchangeId,
    symbol: String,
    book: Arc<RwLock<OrderBook>>,
}

impl OrderBookHandle {
    pub fn new(exchange: ExchangeId, symbol: impl Into<String>, book: OrderBook) -> Self {
        OrderBookHandle {
            exchange,
            symbol: symbol.into(),
            book: Arc::new(RwLock::new(book)),
        }
    }

    /// Empty book not backed by any channel
    pub fn detached(exchange: ExchangeId, symbol: impl Into<String>) -> Self {
        Self::new(exchange, symbol, OrderBook::new())
    }

    pub fn exchange(&self) -> &ExchangeId {
        &self.exchange
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn read(&self) -> RwLockReadGuard<'_, OrderBook> {
        self.book.read()
    }

    /// Visible bids, best first
    pub fn bids(&self) -> Vec<OrderBookPosition> {
        self.book.read().bids().to_vec()
    }

    /// Visible asks, best first
    pub fn asks(&self) -> Vec<OrderBookPosition> {
        self.book.read().asks().to_vec()
    }

    pub fn best_bid(&self) -> Option<OrderBookPosition> {
        self.book.read().best_bid().cloned()
    }

    pub fn best_ask(&self) -> Option<OrderBookPosition> {
        self.book.read().best_ask().cloned()
    }

    pub fn spread(&self) -> Option<Price> {
        self.book.read().spread()
    }

    pub fn is_empty(&self) -> bool {
        self.book.read().is_empty()
    }

    fn holders(&self) -> usize {
        Arc::strong_count(&self.book).saturating_sub(1)
    }
}

impl std::fmt::Debug for OrderBookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderBookHandle")
            .field("exchange", &self.exchange)
            .field("symbol", &self.symbol)
            .finish()
    }
}

/// Price-level delta as decoded from the wire
#[derive(Debug, Clone, PartialEq)]
pub struct BookDelta {
    pub side: BookSide,
    pub price: Price,
    pub size: Quantity,
    pub order_count: u32,
    /// Exchange sequence number, when the venue provides one
    pub sequence: Option<i64>,
}

impl BookDelta {
    pub fn new(side: BookSide, price: Price, size: Quantity) -> Self {
        BookDelta {
            side,
            price,
            size,
            order_count: 0,
            sequence: None,
        }
    }

    pub fn with_order_count(mut self, order_count: u32) -> Self {
        self.order_count = order_count;
        self
    }

    pub fn with_sequence(mut self, sequence: i64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// Book state machine for one symbol.
///
/// Deltas received before the snapshot are buffered and replayed once it
/// lands; deltas the snapshot already covers are discarded.
pub struct BookStream {
    symbol: String,
    handle: OrderBookHandle,
    changes: Feed<OrderBookChange>,
    status: SyncStatus,
    buffer: VecDeque<BookDelta>,
    max_buffer: usize,
}

impl BookStream {
    pub fn new(
        exchange: ExchangeId,
        symbol: impl Into<String>,
        book: OrderBook,
        capacity: usize,
        max_buffer: usize,
    ) -> Self {
        let symbol = symbol.into();
        BookStream {
            handle: OrderBookHandle::new(exchange, symbol.clone(), book),
            symbol,
            changes: Feed::new(capacity),
            status: SyncStatus::Uninitialized,
            buffer: VecDeque::new(),
            max_buffer,
        }
    }

    pub fn handle(&self) -> OrderBookHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> FeedReceiver<OrderBookChange> {
        self.changes.subscribe()
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    /// Start buffering deltas until a snapshot arrives
    pub fn begin_sync(&mut self) {
        self.status = SyncStatus::Syncing;
        self.buffer.clear();
    }

    /// Rebuild the book from a full snapshot.
    ///
    /// With a sequence number, buffered deltas newer than the snapshot are
    /// replayed on top of it. Without one, the buffer is discarded.
    pub fn apply_snapshot<B, A>(&mut self, bids: B, asks: A, sequence: Option<i64>)
    where
        B: IntoIterator<Item = (Price, Quantity, u32)>,
        A: IntoIterator<Item = (Price, Quantity, u32)>,
    {
        let (rejected, removed, visible) = {
            let mut book = self.handle.book.write();
            let before: Vec<OrderBookPosition> =
                book.bids().iter().chain(book.asks()).cloned().collect();
            let rejected = book.apply_snapshot(bids, asks);
            let visible: Vec<OrderBookPosition> =
                book.bids().iter().chain(book.asks()).cloned().collect();
            let removed: Vec<OrderBookPosition> = before
                .into_iter()
                .filter(|old| {
                    !visible
                        .iter()
                        .any(|new| new.side == old.side && new.price == old.price)
                })
                .collect();
            (rejected, removed, visible)
        };

        if rejected > 0 {
            tracing::warn!(symbol = %self.symbol, rejected, "Skipped invalid snapshot levels");
        }

        for position in removed {
            self.changes.publish(OrderBookChange {
                action: BookAction::Delete,
                side: position.side,
                position,
            });
        }
        for position in visible {
            self.changes.publish(OrderBookChange {
                action: BookAction::Update,
                side: position.side,
                position,
            });
        }

        self.status = SyncStatus::Synced;

        let buffered: Vec<BookDelta> = self.buffer.drain(..).collect();
        let Some(snapshot_seq) = sequence else {
            if !buffered.is_empty() {
                tracing::debug!(symbol = %self.symbol, dropped = buffered.len(), "Discarded deltas preceding snapshot");
            }
            return;
        };
        let mut replayed = 0usize;
        for delta in buffered {
            if delta.sequence.is_some_and(|seq| seq <= snapshot_seq) {
                continue;
            }
            self.apply(delta);
            replayed += 1;
        }
        tracing::debug!(symbol = %self.symbol, snapshot_seq, replayed, "Book synced");
    }

    /// Apply a delta, or buffer it while waiting for the snapshot
    pub fn handle_delta(&mut self, delta: BookDelta) {
        if self.status.buffers_deltas() {
            if self.buffer.len() >= self.max_buffer {
                tracing::warn!(symbol = %self.symbol, "Delta buffer full, dropping oldest");
                self.buffer.pop_front();
            }
            self.buffer.push_back(delta);
            return;
        }
        self.apply(delta);
    }

    fn apply(&mut self, delta: BookDelta) {
        let result = self.handle.book.write().apply_delta(
            delta.side,
            delta.price,
            delta.size,
            delta.order_count,
        );
        match result {
            Ok(changes) => {
                for change in changes {
                    self.changes.publish(change);
                }
            }
            Err(e) => {
                tracing::warn!(symbol = %self.symbol, error = %e, "Dropping invalid book delta");
            }
        }
    }

    /// Connection dropped: the next snapshot has to rebuild the book
    pub fn mark_out_of_sync(&mut self) {
        self.status = self.status.on_disconnect();
        self.buffer.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn listener_count(&self) -> usize {
        self.changes.listener_count() + self.handle.holders()
    }
}
