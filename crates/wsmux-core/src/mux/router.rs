//! Message router: decode each inbound frame with the codec and deliver it.
//!
//! Control events update the [`ChannelRegistry`]; data payloads are resolved
//! to a [`ChannelKey`] and pushed to that channel's subscribers. Frames that
//! fail to decode are counted and dropped without touching the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, trace, warn};

use super::codec::{ControlEvent, Envelope, WireCodec};
use super::registry::{ChannelRegistry, Dispatch};
use crate::error::MuxError;
use crate::ws::Frame;

/// Counters maintained by the router; shared with the client façade.
#[derive(Debug, Default)]
pub struct RouterStats {
    frames: AtomicU64,
    delivered: AtomicU64,
    decode_errors: AtomicU64,
    stale: AtomicU64,
    unroutable: AtomicU64,
    control: AtomicU64,
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Data frames handed to the codec.
    pub frames: u64,
    /// Notifications pushed to at least one subscriber.
    pub delivered: u64,
    /// Frames the codec could not decode.
    pub decode_errors: u64,
    /// Payloads for channels nobody subscribes to.
    pub stale: u64,
    /// Payloads the codec could not assign to a channel.
    pub unroutable: u64,
    /// Control events applied.
    pub control: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            control: self.control.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What happened to one routed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Payload pushed to this many subscribers.
    Delivered(usize),
    /// Control event applied.
    Control,
    /// Payload for a channel with no subscribers.
    Stale,
    /// Payload with no resolvable channel.
    Unroutable,
    /// Frame failed to decode.
    Malformed,
}

/// Reply to a frame received while waiting for the login acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    Ack,
    Rejected(String),
    /// Not a login reply; dropped.
    Ignored,
}

pub struct MessageRouter<C: WireCodec> {
    label: Arc<str>,
    codec: Arc<C>,
    registry: Arc<ChannelRegistry<C::Notification>>,
    stats: Arc<RouterStats>,
}

impl<C: WireCodec> MessageRouter<C> {
    pub fn new(
        label: Arc<str>,
        codec: Arc<C>,
        registry: Arc<ChannelRegistry<C::Notification>>,
        stats: Arc<RouterStats>,
    ) -> Self {
        Self { label, codec, registry, stats }
    }

    /// Route one data frame received while connected.
    pub fn route(&self, frame: &Frame) -> Routed {
        RouterStats::bump(&self.stats.frames);
        let envelope = match self.codec.decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                RouterStats::bump(&self.stats.decode_errors);
                warn!("[{}] dropping undecodable frame: {e}", self.label);
                return Routed::Malformed;
            }
        };

        match envelope {
            Envelope::Data(payload) => self.deliver(payload),
            Envelope::Control(event) => {
                RouterStats::bump(&self.stats.control);
                self.apply(event);
                Routed::Control
            }
        }
    }

    /// Route one frame received while the login handshake is outstanding.
    pub fn route_login(&self, frame: &Frame) -> LoginReply {
        RouterStats::bump(&self.stats.frames);
        match self.codec.decode(frame) {
            Ok(Envelope::Control(ControlEvent::LoginAck)) => LoginReply::Ack,
            Ok(Envelope::Control(ControlEvent::LoginError(reason) | ControlEvent::Error(reason))) => {
                LoginReply::Rejected(reason)
            }
            Ok(other) => {
                trace!("[{}] ignoring pre-login message: {other:?}", self.label);
                LoginReply::Ignored
            }
            Err(e) => {
                RouterStats::bump(&self.stats.decode_errors);
                warn!("[{}] dropping undecodable frame during login: {e}", self.label);
                LoginReply::Ignored
            }
        }
    }

    fn deliver(&self, payload: C::Notification) -> Routed {
        let Some(key) = self.codec.channel_key_of(&payload) else {
            RouterStats::bump(&self.stats.unroutable);
            debug!("[{}] payload without a channel", self.label);
            return Routed::Unroutable;
        };
        match self.registry.dispatch(&key, payload) {
            Dispatch::Delivered(n) => {
                RouterStats::bump(&self.stats.delivered);
                Routed::Delivered(n)
            }
            Dispatch::NoSubscribers => {
                RouterStats::bump(&self.stats.stale);
                trace!("[{}] stale payload for {key}", self.label);
                Routed::Stale
            }
        }
    }

    fn apply(&self, event: ControlEvent) {
        match event {
            ControlEvent::SubscribeAck(key) => {
                if self.registry.activate(&key) {
                    debug!("[{}] subscribed {key}", self.label);
                }
            }
            ControlEvent::SubscribeError { key, reason } => {
                warn!("[{}] subscribe rejected for {key}: {reason}", self.label);
                let err = MuxError::Subscribe { key: key.clone(), reason };
                self.registry.mark_failed(&key, err);
            }
            ControlEvent::UnsubscribeAck(key) => {
                if self.registry.unsubscribe_acked(&key) {
                    debug!("[{}] unsubscribed {key}", self.label);
                }
            }
            ControlEvent::Error(reason) => warn!("[{}] exchange error: {reason}", self.label),
            ControlEvent::LoginAck | ControlEvent::LoginError(_) => {
                debug!("[{}] unexpected login reply while connected", self.label);
            }
            ControlEvent::Heartbeat => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::key::{ChannelKey, ChannelRequest};
    use crate::mux::registry::SubscriptionState;
    use crate::testing::{TestCodec, TestEvent};

    fn router() -> (MessageRouter<TestCodec>, Arc<ChannelRegistry<TestEvent>>, Arc<RouterStats>) {
        let registry = Arc::new(ChannelRegistry::new());
        registry.set_online(true);
        let stats = Arc::new(RouterStats::default());
        let router = MessageRouter::new("test".into(), Arc::new(TestCodec::new()), registry.clone(), stats.clone());
        (router, registry, stats)
    }

    fn trades(sym: &str) -> (ChannelKey, ChannelRequest) {
        let req = ChannelRequest::new("trades", [sym]);
        (req.default_key(), req)
    }

    #[test]
    fn data_reaches_only_its_channel() {
        let (router, registry, _) = router();
        let (ka, ra) = trades("A");
        let (kb, rb) = trades("B");
        let mut a = registry.acquire(ka, ra);
        let mut b = registry.acquire(kb, rb);

        let routed = router.route(&TestCodec::data_frame("trades:A", 1));
        assert_eq!(routed, Routed::Delivered(1));
        assert_eq!(a.receiver.try_recv().unwrap().unwrap().value, 1);
        assert!(b.receiver.try_recv().is_err());
    }

    #[test]
    fn malformed_frame_is_counted_and_dropped() {
        let (router, _, stats) = router();
        assert_eq!(router.route(&Frame::Text("{not json".into())), Routed::Malformed);
        assert_eq!(stats.snapshot().decode_errors, 1);
    }

    #[test]
    fn stale_and_unroutable_payloads_are_dropped() {
        let (router, _, stats) = router();
        assert_eq!(router.route(&TestCodec::data_frame("trades:X", 1)), Routed::Stale);
        assert_eq!(router.route(&TestCodec::data_frame("", 1)), Routed::Unroutable);
        let s = stats.snapshot();
        assert_eq!((s.stale, s.unroutable, s.frames), (1, 1, 2));
    }

    #[test]
    fn subscribe_ack_and_error_update_registry() {
        let (router, registry, _) = router();
        let (ka, ra) = trades("A");
        let (kb, rb) = trades("B");
        let _a = registry.acquire(ka.clone(), ra);
        let mut b = registry.acquire(kb.clone(), rb);

        router.route(&TestCodec::subscribe_ack_frame("trades:A"));
        assert_eq!(registry.state(&ka), Some(SubscriptionState::Active));

        router.route(&TestCodec::subscribe_error_frame("trades:B", "no such symbol"));
        assert_eq!(registry.state(&kb), None);
        let err = b.receiver.try_recv().unwrap().unwrap_err();
        assert_eq!(err, MuxError::Subscribe { key: kb, reason: "no such symbol".into() });
        assert_eq!(registry.state(&ka), Some(SubscriptionState::Active));
    }

    #[test]
    fn login_replies() {
        let (router, _, _) = router();
        assert_eq!(router.route_login(&TestCodec::login_ack_frame()), LoginReply::Ack);
        assert_eq!(
            router.route_login(&TestCodec::login_error_frame("bad key")),
            LoginReply::Rejected("bad key".into())
        );
        assert_eq!(router.route_login(&TestCodec::data_frame("trades:A", 1)), LoginReply::Ignored);
    }
}
