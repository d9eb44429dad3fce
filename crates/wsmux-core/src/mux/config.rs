//! Engine configuration for one multiplexed connection.

use std::time::Duration;

use crate::ws::{PingConfig, ReconnectPolicy};

/// Tuning for one [`MuxClient`](super::MuxClient).
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Log prefix, e.g. `mux-okx_public`.
    pub label: String,
    /// Upper bound on one transport handshake.
    pub connect_timeout: Duration,
    /// How long to wait for the login acknowledgement.
    pub login_timeout: Duration,
    /// Application keep-alive; `None` relies on protocol pings only.
    pub ping: Option<PingConfig>,
    /// Treat the connection as lost when nothing arrives for this long.
    pub idle_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
    /// Forget an unsubscribing channel whose ack never arrives.
    pub unsubscribe_timeout: Duration,
    /// Cap on subscribe/unsubscribe frames written per second.
    pub max_outbound_per_sec: Option<u32>,
    /// Buffer of the lifecycle event broadcast.
    pub event_capacity: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            label: "mux".to_string(),
            connect_timeout: Duration::from_secs(10),
            login_timeout: Duration::from_secs(10),
            ping: None,
            idle_timeout: None,
            reconnect: ReconnectPolicy::default(),
            unsubscribe_timeout: Duration::from_secs(10),
            max_outbound_per_sec: None,
            event_capacity: 64,
        }
    }
}

impl MuxConfig {
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}
