//! Broadcast feeds for normalized market data.
//!
//! A [`Feed`] is a multi-value, unbounded-lifetime stream with any number of
//! listeners. Each [`FeedReceiver`] is one listener; dropping it detaches
//! immediately, which is what the channel registry reference-counts.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Publishing side of a feed
pub struct Feed<T> {
    tx: broadcast::Sender<T>,
    /// Latest value, replayed to new listeners when replay is enabled
    latest: Option<Arc<Mutex<Option<T>>>>,
}

impl<T: Clone> Feed<T> {
    /// Feed that delivers only values published after subscription
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Feed { tx, latest: None }
    }

    /// Feed that hands the most recent value to every new listener first
    pub fn replaying(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Feed {
            tx,
            latest: Some(Arc::new(Mutex::new(None))),
        }
    }

    /// Publish a value to all current listeners. Returns how many received it.
    pub fn publish(&self, value: T) -> usize {
        match &self.latest {
            Some(latest) => {
                let mut guard = latest.lock();
                *guard = Some(value.clone());
                self.tx.send(value).unwrap_or(0)
            }
            None => self.tx.send(value).unwrap_or(0),
        }
    }

    /// Attach a new listener
    pub fn subscribe(&self) -> FeedReceiver<T> {
        match &self.latest {
            Some(latest) => {
                let guard = latest.lock();
                FeedReceiver {
                    pending: guard.clone(),
                    rx: self.tx.subscribe(),
                }
            }
            None => FeedReceiver {
                pending: None,
                rx: self.tx.subscribe(),
            },
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn latest(&self) -> Option<T> {
        self.latest.as_ref().and_then(|latest| latest.lock().clone())
    }
}

/// One listener on a feed
pub struct FeedReceiver<T> {
    pending: Option<T>,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> FeedReceiver<T> {
    /// A receiver with no publisher; `recv` returns `None` immediately
    pub fn closed() -> Self {
        let (_, rx) = broadcast::channel(1);
        FeedReceiver { pending: None, rx }
    }

    /// Next value, or `None` once the feed is gone.
    ///
    /// Values dropped because this listener fell behind are skipped.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Feed listener lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next value if one is ready, without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Drain every value that is ready now
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
