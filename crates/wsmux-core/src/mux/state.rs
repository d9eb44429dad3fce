//! Connection lifecycle state and the events emitted on transitions.
//!
//! The current [`ConnectionState`] is published on a `watch` channel;
//! [`ConnectionEvent`]s go out on a `broadcast` channel so any number of
//! observers can follow reconnects without affecting the I/O task.

use std::fmt;

use tokio::sync::{broadcast, watch};

use crate::error::MuxError;

/// Where the single physical connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected, waiting for the login acknowledgement.
    Authenticating,
    /// Connected (and logged in where required); subscriptions flow.
    Connected,
    /// Lost the connection; waiting out backoff or retrying.
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events for observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Transport established.
    Connected {
        /// Which endpoint.
        endpoint: String,
    },

    /// Login acknowledged.
    Authenticated,

    /// Every wanted channel was re-requested on a fresh connection.
    Replayed {
        /// Number of subscribe requests written.
        channels: usize,
    },

    /// The connection dropped.
    Disconnected {
        /// Human-readable reason.
        reason: String,
    },

    /// A connect or login attempt failed; the policy will retry.
    ReconnectFailed {
        /// Consecutive failed attempts so far.
        attempt: u32,
        /// Why it failed.
        error: MuxError,
    },

    /// The retry budget is spent; the connection manager has stopped.
    GaveUp {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

/// Sender half of the lifecycle event channel.
pub type ConnectionEventSender = broadcast::Sender<ConnectionEvent>;

/// Receiver half of the lifecycle event channel.
pub type ConnectionEventReceiver = broadcast::Receiver<ConnectionEvent>;

/// Observer of [`ConnectionState`] changes.
pub type StateWatch = watch::Receiver<ConnectionState>;
