/// Lifecycle of one channel subscription.
/// A key absent from the registry is implicitly unrequested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Subscribe command queued or sent, not yet acknowledged
    QueuedSubscribe,
    /// Acknowledged by the exchange; transport id known
    Subscribed,
    /// Unsubscribe command sent, waiting for the exchange to confirm teardown
    Unsubscribed,
}

impl SubscriptionState {
    /// Check if the exchange is currently delivering data for the channel
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionState::Subscribed)
    }

    /// Check if the channel still waits for a subscribe acknowledgment
    pub fn is_queued(&self) -> bool {
        matches!(self, SubscriptionState::QueuedSubscribe)
    }
}
