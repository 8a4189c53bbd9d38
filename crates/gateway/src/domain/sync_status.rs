/// Sync state of an order book rebuilt from a snapshot plus a delta stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Channel requested, nothing received yet
    Uninitialized,
    /// Snapshot requested; deltas are buffered until it lands
    Syncing,
    /// Snapshot applied; deltas go straight to the book
    Synced,
    /// Transport dropped; the book is stale until the next snapshot
    OutOfSync,
}

impl SyncStatus {
    /// Deltas can be applied to the book directly
    pub fn is_ready(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }

    /// Deltas must be held back until a snapshot arrives
    pub fn buffers_deltas(&self) -> bool {
        !self.is_ready()
    }

    /// State after the transport drops
    pub fn on_disconnect(self) -> Self {
        match self {
            SyncStatus::Uninitialized => SyncStatus::Uninitialized,
            _ => SyncStatus::OutOfSync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_synced_applies_deltas() {
        assert!(SyncStatus::Synced.is_ready());
        for status in [
            SyncStatus::Uninitialized,
            SyncStatus::Syncing,
            SyncStatus::OutOfSync,
        ] {
            assert!(status.buffers_deltas());
        }
    }

    #[test]
    fn test_disconnect_transition() {
        assert_eq!(SyncStatus::Synced.on_disconnect(), SyncStatus::OutOfSync);
        assert_eq!(SyncStatus::Syncing.on_disconnect(), SyncStatus::OutOfSync);
        assert_eq!(
            SyncStatus::Uninitialized.on_disconnect(),
            SyncStatus::Uninitialized
        );
    }
}
