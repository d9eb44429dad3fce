//! # wsmux-core
//!
//! Channel-multiplexed streaming client engine:
//!
//! - **Multiplexer** (`mux`) — channel keys, the wire codec contract, the
//!   channel registry, message router, connection manager and the
//!   `MuxClient` façade with its `ChannelStream` handles
//! - **Transport** (`ws`) — frames, the connector seam, the WebSocket
//!   connector and reconnect backoff
//! - **Configuration** (`config`) — JSON config deserialization
//! - **Error types** (`error`) — `MuxError` via thiserror
//! - **Logging** (`logging`) — tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod mux;
pub mod ws;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{MuxError, Result};
pub use mux::{
    ChannelKey, ChannelRequest, ChannelStream, ConnectionEvent, ConnectionState, ControlEvent, Envelope, MuxClient,
    MuxConfig, SubscriptionState, WireCodec,
};
