//! Channel registry: the authoritative map from [`ChannelKey`] to its
//! subscription record.
//!
//! Each record tracks the original [`ChannelRequest`], its lifecycle state,
//! the live subscriber senders (their count is the subscriber count) and
//! which wire request is currently outstanding. All operations take one
//! mutex, so application tasks subscribing and dropping handles can race
//! freely with the I/O task applying acks and replaying.
//!
//! # Record lifecycle
//!
//! ```text
//! Pending --subscribe-ack / first payload--> Active
//! Active  --last handle dropped (online)---> Unsubscribing --ack or timeout--> removed
//! Active  --connection lost----------------> Pending (replayed on reconnect)
//! any     --subscribe-error----------------> removed, error fanned out
//! ```
//!
//! The registry also records whether the connection is online (connected
//! and past login). While offline, dropping the last handle removes the
//! record at once since there is no wire subscription to tear down.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ahash::AHashMap;
use tokio::sync::mpsc;

use super::key::{ChannelKey, ChannelRequest};
use crate::error::MuxError;

/// What subscribers receive: a payload, or one terminal error.
pub type Delivery<N> = Result<N, MuxError>;

/// Lifecycle state of one subscription record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Wanted, not yet confirmed on the current connection.
    Pending,
    /// Confirmed by the exchange (or data is flowing).
    Active,
    /// No subscribers left; unsubscribe requested or about to be.
    Unsubscribing,
}

/// Identifies one subscriber slot. Releasing with a ticket whose generation
/// no longer matches the record (the record failed and was recreated) is a
/// no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
    subscriber: u64,
}

/// Result of [`ChannelRegistry::acquire`].
pub struct Acquired<N> {
    pub ticket: Ticket,
    pub receiver: mpsc::UnboundedReceiver<Delivery<N>>,
    /// This caller moved the subscriber count from 0 to 1.
    pub is_first_subscriber: bool,
}

/// Result of [`ChannelRegistry::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Other subscribers remain.
    Retained,
    /// Last subscriber gone; an unsubscribe request should be sent.
    Unsubscribe,
    /// Last subscriber gone; nothing was live on the wire, record removed.
    Removed,
    /// Ticket did not match a live subscriber.
    Stale,
}

/// Result of [`ChannelRegistry::due_requests`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueRequests {
    pub subscribe: Vec<ChannelKey>,
    pub unsubscribe: Vec<ChannelKey>,
}

impl DueRequests {
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }
}

/// Result of [`ChannelRegistry::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered(usize),
    NoSubscribers,
}

struct Subscriber<N> {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery<N>>,
}

struct SubscriptionRecord<N> {
    request: ChannelRequest,
    /// Acquisition order; also the ticket generation.
    seq: u64,
    state: SubscriptionState,
    subscribers: Vec<Subscriber<N>>,
    /// Subscribe written on the current connection, ack outstanding.
    subscribe_sent: bool,
    /// Unsubscribe written, ack outstanding since this instant.
    unsubscribe_sent: Option<Instant>,
    /// State restored if an unwritten unsubscribe is cancelled.
    resume_state: SubscriptionState,
}

impl<N> SubscriptionRecord<N> {
    fn live_on_wire(&self) -> bool {
        self.state == SubscriptionState::Active || self.subscribe_sent
    }
}

struct RegistryInner<N> {
    records: AHashMap<ChannelKey, SubscriptionRecord<N>>,
    next_seq: u64,
    next_subscriber: u64,
    online: bool,
}

/// Thread-safe channel registry.
pub struct ChannelRegistry<N> {
    inner: Mutex<RegistryInner<N>>,
}

impl<N: Clone> ChannelRegistry<N> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                records: AHashMap::new(),
                next_seq: 0,
                next_subscriber: 0,
                online: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner<N>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber to `key`, creating the record (as `Pending`) if
    /// absent.
    pub fn acquire(&self, key: ChannelKey, request: ChannelRequest) -> Acquired<N> {
        let mut inner = self.lock();
        let inner = &mut *inner;
        let fresh_seq = inner.next_seq;
        inner.next_seq += 1;
        let subscriber = inner.next_subscriber;
        inner.next_subscriber += 1;
        let (tx, receiver) = mpsc::unbounded_channel();

        let record = inner.records.entry(key).or_insert_with(|| SubscriptionRecord {
            request: request.clone(),
            seq: fresh_seq,
            state: SubscriptionState::Pending,
            subscribers: Vec::new(),
            subscribe_sent: false,
            unsubscribe_sent: None,
            resume_state: SubscriptionState::Pending,
        });

        if record.state == SubscriptionState::Unsubscribing {
            if record.unsubscribe_sent.is_some() {
                // The wire subscription is being torn down: start over.
                record.seq = fresh_seq;
                record.request = request;
                record.state = SubscriptionState::Pending;
                record.subscribe_sent = false;
            } else {
                record.state = record.resume_state;
            }
        }

        let is_first_subscriber = record.subscribers.is_empty();
        record.subscribers.push(Subscriber { id: subscriber, tx });

        Acquired {
            ticket: Ticket { generation: record.seq, subscriber },
            receiver,
            is_first_subscriber,
        }
    }

    /// Remove one subscriber.
    pub fn release(&self, key: &ChannelKey, ticket: Ticket) -> Release {
        let mut inner = self.lock();
        let online = inner.online;
        let Some(record) = inner.records.get_mut(key) else {
            return Release::Stale;
        };
        if record.seq != ticket.generation {
            return Release::Stale;
        }

        let before = record.subscribers.len();
        record.subscribers.retain(|s| s.id != ticket.subscriber);
        if record.subscribers.len() == before {
            return Release::Stale;
        }
        if !record.subscribers.is_empty() {
            return Release::Retained;
        }

        if online && record.live_on_wire() {
            record.resume_state = record.state;
            record.state = SubscriptionState::Unsubscribing;
            Release::Unsubscribe
        } else {
            inner.records.remove(key);
            Release::Removed
        }
    }

    /// Subscribe acknowledged: `Pending -> Active`.
    pub fn activate(&self, key: &ChannelKey) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.records.get_mut(key) else {
            return false;
        };
        record.subscribe_sent = false;
        match record.state {
            SubscriptionState::Pending => {
                record.state = SubscriptionState::Active;
                true
            }
            SubscriptionState::Unsubscribing => {
                record.resume_state = SubscriptionState::Active;
                false
            }
            SubscriptionState::Active => false,
        }
    }

    /// Subscribe rejected: deliver `error` to every subscriber of `key` and
    /// remove the record. Returns the number of subscribers notified.
    pub fn mark_failed(&self, key: &ChannelKey, error: MuxError) -> usize {
        let mut inner = self.lock();
        let Some(record) = inner.records.remove(key) else {
            return 0;
        };
        let mut notified = 0;
        for sub in &record.subscribers {
            if sub.tx.send(Err(error.clone())).is_ok() {
                notified += 1;
            }
        }
        notified
    }

    /// Unsubscribe acknowledged. Removes the record unless it was
    /// re-acquired in the meantime.
    pub fn unsubscribe_acked(&self, key: &ChannelKey) -> bool {
        let mut inner = self.lock();
        let Some(record) = inner.records.get_mut(key) else {
            return false;
        };
        if record.unsubscribe_sent.take().is_none() {
            return false;
        }
        if record.subscribers.is_empty() {
            inner.records.remove(key);
        }
        true
    }

    /// Drop a record nobody subscribes to any more (unsubscribe abandoned).
    pub fn forget(&self, key: &ChannelKey) -> bool {
        let mut inner = self.lock();
        let empty = inner.records.get(key).is_some_and(|r| r.subscribers.is_empty());
        if empty {
            inner.records.remove(key);
        }
        empty
    }

    /// Snapshot of every wanted channel, in original acquisition order.
    pub fn all_active_in_order(&self) -> Vec<(ChannelKey, ChannelRequest)> {
        let inner = self.lock();
        let mut wanted: Vec<_> = inner
            .records
            .iter()
            .filter(|(_, r)| !r.subscribers.is_empty() && r.state != SubscriptionState::Unsubscribing)
            .map(|(k, r)| (r.seq, k.clone(), r.request.clone()))
            .collect();
        wanted.sort_unstable_by_key(|(seq, _, _)| *seq);
        wanted.into_iter().map(|(_, k, r)| (k, r)).collect()
    }

    /// Channels with a wire request due on the current connection, each
    /// list in acquisition order. Empty while offline.
    pub fn due_requests(&self) -> DueRequests {
        let inner = self.lock();
        let mut due = DueRequests::default();
        if !inner.online {
            return due;
        }
        let mut records: Vec<_> = inner.records.iter().collect();
        records.sort_unstable_by_key(|(_, r)| r.seq);
        for (key, record) in records {
            let idle = record.subscribers.is_empty();
            match record.state {
                SubscriptionState::Pending if !idle && !record.subscribe_sent => due.subscribe.push(key.clone()),
                SubscriptionState::Unsubscribing if idle && record.unsubscribe_sent.is_none() => {
                    due.unsubscribe.push(key.clone())
                }
                _ => {}
            }
        }
        due
    }

    /// Claim the right to write a subscribe for `key`.
    ///
    /// Returns the request only if the connection is online, the record is
    /// `Pending`, has subscribers, and no subscribe is already outstanding.
    pub fn begin_subscribe(&self, key: &ChannelKey) -> Option<ChannelRequest> {
        let mut inner = self.lock();
        if !inner.online {
            return None;
        }
        let record = inner.records.get_mut(key)?;
        if record.state != SubscriptionState::Pending || record.subscribe_sent || record.subscribers.is_empty() {
            return None;
        }
        record.subscribe_sent = true;
        Some(record.request.clone())
    }

    /// Claim the right to write an unsubscribe for `key`.
    ///
    /// While offline the record is removed instead and `None` is returned.
    pub fn begin_unsubscribe(&self, key: &ChannelKey) -> Option<ChannelRequest> {
        let mut inner = self.lock();
        let online = inner.online;
        let record = inner.records.get_mut(key)?;
        if record.state != SubscriptionState::Unsubscribing
            || !record.subscribers.is_empty()
            || record.unsubscribe_sent.is_some()
        {
            return None;
        }
        if !online {
            inner.records.remove(key);
            return None;
        }
        record.unsubscribe_sent = Some(Instant::now());
        Some(record.request.clone())
    }

    /// Mark the connection online (after login) or offline (lost).
    ///
    /// Going offline demotes `Active` records to `Pending`, clears
    /// outstanding requests, and removes `Unsubscribing` records.
    pub fn set_online(&self, online: bool) {
        let mut inner = self.lock();
        inner.online = online;
        if online {
            return;
        }
        inner.records.retain(|_, record| {
            record.subscribe_sent = false;
            record.unsubscribe_sent = None;
            match record.state {
                SubscriptionState::Unsubscribing => false,
                SubscriptionState::Active => {
                    record.state = SubscriptionState::Pending;
                    true
                }
                SubscriptionState::Pending => true,
            }
        });
    }

    /// Remove `Unsubscribing` records whose ack did not arrive within
    /// `timeout`. Returns the number removed.
    pub fn expire_unsubscribes(&self, timeout: Duration) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let before = inner.records.len();
        inner.records.retain(|_, record| match record.unsubscribe_sent {
            Some(sent) if now.duration_since(sent) >= timeout => {
                record.unsubscribe_sent = None;
                !record.subscribers.is_empty()
            }
            _ => true,
        });
        before - inner.records.len()
    }

    /// Push a payload to every subscriber of `key`.
    ///
    /// Data for a `Pending` record activates it. Records being unsubscribed
    /// receive nothing.
    pub fn dispatch(&self, key: &ChannelKey, payload: N) -> Dispatch {
        let mut inner = self.lock();
        let Some(record) = inner.records.get_mut(key) else {
            return Dispatch::NoSubscribers;
        };
        if record.subscribers.is_empty() || record.state == SubscriptionState::Unsubscribing {
            return Dispatch::NoSubscribers;
        }
        if record.state == SubscriptionState::Pending {
            record.state = SubscriptionState::Active;
            record.subscribe_sent = false;
        }
        let mut delivered = 0;
        for sub in &record.subscribers {
            if sub.tx.send(Ok(payload.clone())).is_ok() {
                delivered += 1;
            }
        }
        Dispatch::Delivered(delivered)
    }

    pub fn state(&self, key: &ChannelKey) -> Option<SubscriptionState> {
        self.lock().records.get(key).map(|r| r.state)
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.lock().records.get(key).map_or(0, |r| r.subscribers.len())
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// Number of records (including ones being unsubscribed).
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<N: Clone> Default for ChannelRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}
