//! Typed error definitions for the channel multiplexer.
//!
//! [`MuxError`] covers every failure the engine can report. The variants are
//! scoped so that callers can tell how far a failure reaches:
//!
//! - [`MuxError::Transport`] affects every channel on the connection and is
//!   recovered by the reconnect policy.
//! - [`MuxError::Decode`] affects one frame only; it is logged and dropped.
//! - [`MuxError::Subscribe`] affects one channel only and terminates that
//!   channel's streams.
//! - [`MuxError::Auth`] aborts a connect attempt before any replay.
//!
//! The enum is `Clone` so one terminal error can be fanned out to every
//! subscriber of a channel.

use thiserror::Error;

use crate::mux::ChannelKey;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Domain-specific errors for the multiplexed streaming client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MuxError {
    /// Connection could not be established, or dropped.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A codec could not build an outbound request.
    #[error("encode error: {0}")]
    Encode(String),

    /// The exchange rejected a channel subscription.
    #[error("subscribe error on {key}: {reason}")]
    Subscribe {
        /// Channel the exchange rejected.
        key: ChannelKey,
        /// Exchange-provided reason.
        reason: String,
    },

    /// The login handshake failed or was not acknowledged.
    #[error("auth error: {0}")]
    Auth(String),

    /// Invalid configuration (URL, headers, credentials).
    #[error("config error: {0}")]
    Config(String),

    /// An operation did not complete in time.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The reconnect policy gave up.
    #[error("gave up after {attempts} connection attempt(s)")]
    RetriesExhausted {
        /// Consecutive failed attempts.
        attempts: u32,
    },

    /// The client was shut down.
    #[error("client closed")]
    Closed,
}

impl MuxError {
    /// Whether this error ends the lifetime of a single channel only.
    pub fn is_channel_scoped(&self) -> bool {
        matches!(self, Self::Subscribe { .. })
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for MuxError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
