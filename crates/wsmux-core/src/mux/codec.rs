//! The per-exchange wire contract.
//!
//! A [`WireCodec`] is a value handed to the generic engine. It knows how to
//! build subscribe/unsubscribe (and optionally login) frames and how to turn
//! an inbound frame into an [`Envelope`]. The engine never inspects payloads
//! beyond asking the codec which channel they belong to.

use super::key::{ChannelKey, ChannelRequest};
use crate::error::Result;
use crate::ws::Frame;

/// Protocol-level events that are not channel payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// Login accepted; replay may start.
    LoginAck,
    /// Login rejected.
    LoginError(String),
    /// Exchange confirmed a subscription.
    SubscribeAck(ChannelKey),
    /// Exchange rejected a subscription.
    SubscribeError { key: ChannelKey, reason: String },
    /// Exchange confirmed an unsubscription.
    UnsubscribeAck(ChannelKey),
    /// Error not attributable to a channel.
    Error(String),
    /// Keep-alive reply or informational frame with no effect.
    Heartbeat,
}

/// The decoded result of one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<N> {
    /// Channel payload; the codec resolves its key via
    /// [`WireCodec::channel_key_of`].
    Data(N),
    Control(ControlEvent),
}

/// Encoder/decoder for one exchange's streaming protocol.
pub trait WireCodec: Send + Sync + 'static {
    /// Typed notification delivered to channel subscribers.
    type Notification: Clone + std::fmt::Debug + Send + Sync + 'static;

    /// Frame that subscribes to `request`.
    fn encode_subscribe(&self, request: &ChannelRequest) -> Result<Frame>;

    /// Frame that unsubscribes from `request`.
    fn encode_unsubscribe(&self, request: &ChannelRequest) -> Result<Frame>;

    /// Decode one inbound data frame.
    fn decode(&self, frame: &Frame) -> Result<Envelope<Self::Notification>>;

    /// Channel a decoded notification belongs to; `None` if unroutable.
    fn channel_key_of(&self, notification: &Self::Notification) -> Option<ChannelKey>;

    /// Canonical key for a request. Must agree with [`channel_key_of`]
    /// for payloads of that channel.
    ///
    /// [`channel_key_of`]: WireCodec::channel_key_of
    fn subscription_key(&self, request: &ChannelRequest) -> ChannelKey {
        request.default_key()
    }

    /// Login frame for private connections, built fresh on every connect
    /// attempt. `None` means the connection needs no handshake.
    fn encode_login(&self) -> Result<Option<Frame>> {
        Ok(None)
    }

    /// A new physical connection is open; nothing sent on the previous one
    /// will be answered. Called before login and replay.
    fn reset(&self) {}
}
