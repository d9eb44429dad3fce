//! The channel multiplexer.
//!
//! Many logical channel subscriptions share one physical connection:
//!
//! - [`key`]: channel identity ([`ChannelKey`], [`ChannelRequest`]).
//! - [`codec`]: the per-exchange [`WireCodec`] contract.
//! - [`registry`]: ref-counted subscription records.
//! - [`router`]: inbound frame decoding and dispatch.
//! - [`connection`]: the I/O task (connect, login, replay, keep-alive).
//! - [`client`]: the [`MuxClient`] façade and [`ChannelStream`] handles.

pub mod client;
pub mod codec;
pub mod config;
pub(crate) mod connection;
pub mod key;
pub mod registry;
pub mod router;
pub mod state;
pub mod stream;
mod throttle;

pub use client::MuxClient;
pub use codec::{ControlEvent, Envelope, WireCodec};
pub use config::MuxConfig;
pub use key::{ChannelKey, ChannelRequest, KEY_DELIMITER};
pub use registry::{ChannelRegistry, DueRequests, SubscriptionState};
pub use router::{RouterStats, StatsSnapshot};
pub use state::{ConnectionEvent, ConnectionEventReceiver, ConnectionState, StateWatch};
pub use stream::ChannelStream;
