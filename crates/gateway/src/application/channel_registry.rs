//! Channel Subscription Registry
//!
//! Tracks every channel one exchange connection knows about, keyed by
//! [`ChannelKey`]. Subscribe commands are sent at most once per connection:
//! while the transport is down they are queued, and every (re)open replays
//! all live channels in the order they were first requested.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::domain::{
    ChannelDecoder, ChannelKey, ChannelProtocol, ExchangeId, SubscriptionState, WsTransport,
};

/// Follow-up work remembered while a command is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    None,
    /// Last listener left before the subscribe was acknowledged
    Release,
    /// A listener re-attached while the unsubscribe was in flight
    Resubscribe,
}

/// One channel and its decoder state
pub struct Channel<D> {
    pub key: ChannelKey,
    pub state: SubscriptionState,
    /// Assigned by the exchange on acknowledgment
    pub transport_id: Option<String>,
    pub decoder: D,
    /// Has a wire subscription at all (local channels are fed by other channels)
    wire: bool,
    /// Subscribe command written on the current connection
    sent: bool,
    deferred: Deferred,
    /// Request order, used for FIFO replay
    seq: u64,
}

/// Outcome of [`ChannelRegistry::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// No such channel
    Unknown,
    /// Other listeners remain; nothing sent
    InUse,
    /// Teardown deferred until an in-flight command is acknowledged
    Pending,
    /// Unsubscribe sent; waiting for the exchange to confirm
    Unsubscribing,
    /// Channel dropped locally
    Removed,
}

pub struct ChannelRegistry<D, P> {
    exchange: ExchangeId,
    protocol: P,
    channels: HashMap<ChannelKey, Channel<D>>,
    by_transport_id: HashMap<String, ChannelKey>,
    open: bool,
    next_seq: u64,
}

impl<D: ChannelDecoder, P: ChannelProtocol> ChannelRegistry<D, P> {
    pub fn new(exchange: ExchangeId, protocol: P) -> Self {
        ChannelRegistry {
            exchange,
            protocol,
            channels: HashMap::new(),
            by_transport_id: HashMap::new(),
            open: false,
            next_seq: 0,
        }
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.channels.contains_key(key)
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Return the decoder for `key`, creating the channel if needed.
    ///
    /// Idempotent: an existing channel (queued or active) is returned as is
    /// and no second subscribe command is sent.
    pub fn ensure<F>(&mut self, key: ChannelKey, transport: &dyn WsTransport, create: F) -> &mut D
    where
        F: FnOnce() -> D,
    {
        let channel = match self.channels.entry(key) {
            Entry::Occupied(entry) => {
                let channel = entry.into_mut();
                match (channel.state, channel.deferred) {
                    (SubscriptionState::QueuedSubscribe, Deferred::Release) => {
                        channel.deferred = Deferred::None
                    }
                    (SubscriptionState::Unsubscribed, _) => {
                        channel.deferred = Deferred::Resubscribe
                    }
                    _ => {}
                }
                channel
            }
            Entry::Vacant(entry) => {
                let seq = self.next_seq;
                self.next_seq += 1;
                let key = entry.key().clone();
                tracing::debug!(exchange = %self.exchange, channel = %key, "Creating channel");

                let mut channel = Channel {
                    wire: self.protocol.subscribe_command(&key).is_some(),
                    key,
                    state: SubscriptionState::QueuedSubscribe,
                    transport_id: None,
                    decoder: create(),
                    sent: false,
                    deferred: Deferred::None,
                    seq,
                };
                send_subscribe(&self.protocol, self.open, &self.exchange, &mut channel, transport);
                entry.insert(channel)
            }
        };
        &mut channel.decoder
    }

    pub fn get(&self, key: &ChannelKey) -> Option<&Channel<D>> {
        self.channels.get(key)
    }

    pub fn get_mut(&mut self, key: &ChannelKey) -> Option<&mut Channel<D>> {
        self.channels.get_mut(key)
    }

    pub fn decoder_mut(&mut self, key: &ChannelKey) -> Option<&mut D> {
        self.channels.get_mut(key).map(|c| &mut c.decoder)
    }

    /// Look up a channel by the id the exchange assigned to it
    pub fn by_transport_id_mut(&mut self, transport_id: &str) -> Option<&mut Channel<D>> {
        let key = self.by_transport_id.get(transport_id)?;
        self.channels.get_mut(key)
    }

    pub fn key_for_transport_id(&self, transport_id: &str) -> Option<&ChannelKey> {
        self.by_transport_id.get(transport_id)
    }

    /// Handle a subscribe acknowledgment: queued → active.
    ///
    /// Returns false if no queued channel matches `key`.
    pub fn confirm(
        &mut self,
        key: &ChannelKey,
        transport_id: impl Into<String>,
        transport: &dyn WsTransport,
    ) -> bool {
        let Some(channel) = self.channels.get_mut(key) else {
            return false;
        };
        if !channel.state.is_queued() {
            return false;
        }

        let transport_id = transport_id.into();
        channel.state = SubscriptionState::Subscribed;
        channel.transport_id = Some(transport_id.clone());
        tracing::debug!(exchange = %self.exchange, channel = %key, transport_id = %transport_id, "Channel subscribed");
        self.by_transport_id.insert(transport_id, key.clone());

        let release_now = channel.deferred == Deferred::Release;
        channel.deferred = Deferred::None;
        if release_now {
            self.release(key, transport);
        }
        true
    }

    /// Detach from `key`. The wire unsubscribe is only sent once no local
    /// listener remains.
    pub fn release(&mut self, key: &ChannelKey, transport: &dyn WsTransport) -> Release {
        let Some(channel) = self.channels.get_mut(key) else {
            return Release::Unknown;
        };
        if channel.decoder.listener_count() > 0 {
            return Release::InUse;
        }

        match channel.state {
            SubscriptionState::QueuedSubscribe if channel.sent => {
                channel.deferred = Deferred::Release;
                Release::Pending
            }
            SubscriptionState::Unsubscribed => {
                channel.deferred = Deferred::None;
                Release::Pending
            }
            SubscriptionState::Subscribed if channel.wire && self.open => {
                let sent = self
                    .protocol
                    .unsubscribe_command(key, channel.transport_id.as_deref())
                    .map(|command| transport.send(command).is_ok())
                    .unwrap_or(false);

                if sent && self.protocol.acknowledges_unsubscribe() {
                    channel.state = SubscriptionState::Unsubscribed;
                    channel.deferred = Deferred::None;
                    tracing::debug!(exchange = %self.exchange, channel = %key, "Unsubscribe sent");
                    Release::Unsubscribing
                } else {
                    self.remove(key);
                    Release::Removed
                }
            }
            _ => {
                self.remove(key);
                Release::Removed
            }
        }
    }

    /// Handle an unsubscribe acknowledgment.
    ///
    /// Returns the torn-down channel, or `None` if it was resubscribed
    /// because a listener attached in the meantime.
    pub fn on_unsubscribed(
        &mut self,
        transport_id: &str,
        transport: &dyn WsTransport,
    ) -> Option<Channel<D>> {
        let key = self.by_transport_id.get(transport_id)?.clone();
        self.on_unsubscribed_key(&key, transport)
    }

    /// Same as [`Self::on_unsubscribed`] for exchanges that name the channel
    pub fn on_unsubscribed_key(
        &mut self,
        key: &ChannelKey,
        transport: &dyn WsTransport,
    ) -> Option<Channel<D>> {
        let channel = self.channels.get_mut(key)?;
        let resubscribe =
            channel.deferred == Deferred::Resubscribe || channel.decoder.listener_count() > 0;
        if !resubscribe {
            return self.remove(key);
        }

        if let Some(id) = channel.transport_id.take() {
            self.by_transport_id.remove(&id);
        }
        channel.state = SubscriptionState::QueuedSubscribe;
        channel.deferred = Deferred::None;
        channel.sent = false;
        send_subscribe(&self.protocol, self.open, &self.exchange, channel, transport);
        None
    }

    /// Drop a channel and its decoder without any wire traffic
    pub fn remove(&mut self, key: &ChannelKey) -> Option<Channel<D>> {
        let channel = self.channels.remove(key)?;
        if let Some(id) = &channel.transport_id {
            self.by_transport_id.remove(id);
        }
        tracing::debug!(exchange = %self.exchange, channel = %key, "Channel removed");
        Some(channel)
    }

    /// Transport (re)opened: replay every live channel in request order.
    pub fn on_transport_open(&mut self, transport: &dyn WsTransport) {
        self.open = true;
        self.by_transport_id.clear();

        let abandoned: Vec<ChannelKey> = self
            .channels
            .values()
            .filter(|c| {
                c.decoder.listener_count() == 0
                    && (c.state == SubscriptionState::Unsubscribed
                        || c.deferred == Deferred::Release)
            })
            .map(|c| c.key.clone())
            .collect();
        for key in abandoned {
            tracing::debug!(exchange = %self.exchange, channel = %key, "Dropping abandoned channel on reconnect");
            self.channels.remove(&key);
        }

        let mut replay: Vec<&mut Channel<D>> = self.channels.values_mut().collect();
        replay.sort_by_key(|c| c.seq);
        for channel in replay {
            channel.state = SubscriptionState::QueuedSubscribe;
            channel.transport_id = None;
            channel.deferred = Deferred::None;
            channel.sent = false;
            send_subscribe(&self.protocol, self.open, &self.exchange, channel, transport);
        }
    }

    /// Transport closed: everything must be resent on the next open
    pub fn on_transport_closed(&mut self) {
        self.open = false;
        for channel in self.channels.values_mut() {
            channel.sent = false;
        }
    }

    /// Keys waiting for a subscribe acknowledgment, in request order
    pub fn queued_keys(&self) -> Vec<ChannelKey> {
        self.keys_in_state(SubscriptionState::QueuedSubscribe)
    }

    /// Keys the exchange has acknowledged, in request order
    pub fn active_keys(&self) -> Vec<ChannelKey> {
        self.keys_in_state(SubscriptionState::Subscribed)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ChannelKey> {
        self.channels.keys()
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut Channel<D>> {
        self.channels.values_mut()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn keys_in_state(&self, state: SubscriptionState) -> Vec<ChannelKey> {
        let mut matching: Vec<&Channel<D>> =
            self.channels.values().filter(|c| c.state == state).collect();
        matching.sort_by_key(|c| c.seq);
        matching.into_iter().map(|c| c.key.clone()).collect()
    }
}

fn send_subscribe<D, P: ChannelProtocol>(
    protocol: &P,
    open: bool,
    exchange: &ExchangeId,
    channel: &mut Channel<D>,
    transport: &dyn WsTransport,
) {
    let Some(command) = protocol.subscribe_command(&channel.key) else {
        // Local channel: nothing to acknowledge
        channel.state = SubscriptionState::Subscribed;
        return;
    };
    if !open {
        return;
    }
    match transport.send(command) {
        Ok(()) => channel.sent = true,
        Err(e) => {
            tracing::warn!(exchange = %exchange, channel = %channel.key, error = %e, "Subscribe send failed, will replay on reconnect");
        }
    }
}
