//! Configuration file model.
//!
//! Feeds are described by one JSON file: optional module metadata (name, log
//! location) and a `connections` array. Each connection is one multiplexed
//! WebSocket to one exchange endpoint plus the channels to subscribe on it.
//!
//! # Example
//!
//! ```json
//! {
//!   "module": { "module_name": "okx_feed", "log_path": "/tmp/log" },
//!   "connections": [{
//!     "exchange": "okx",
//!     "ping_interval_sec": 20,
//!     "channels": [
//!       { "name": "tickers", "args": ["BTCUSDT"] },
//!       { "name": "books5",  "args": ["ETH-USDT"] }
//!     ]
//!   }, {
//!     "exchange": "bybit",
//!     "category": "linear",
//!     "private": true,
//!     "credentials": { "api_key": "...", "secret_key": "..." },
//!     "channels": [{ "name": "order" }]
//!   }]
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;

use crate::mux::{ChannelRequest, MuxConfig};
use crate::ws::{PingConfig, PingPayload, ReconnectPolicy};

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    pub module: Option<ModuleMeta>,

    /// One entry per multiplexed connection.
    pub connections: Vec<ConnectionConfig>,
}

impl AppConfig {
    pub fn module_name(&self) -> Option<&str> {
        self.module.as_ref().and_then(|m| m.module_name.as_deref())
    }

    pub fn log_path(&self) -> Option<&str> {
        self.module.as_ref().and_then(|m| m.log_path.as_deref())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// One multiplexed connection.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    /// Label used in logs; defaults to `<exchange>_<public|private>`.
    pub name: Option<String>,

    /// Exchange identifier: `"okx"` or `"bybit"`.
    pub exchange: String,

    /// Endpoint override; the exchange default is used otherwise.
    pub url: Option<String>,

    /// Private (login-gated) connection.
    #[serde(default)]
    pub private: bool,

    /// Bybit product category: `spot`, `linear`, `inverse`, `option`.
    pub category: Option<String>,

    /// API credentials, required for private connections.
    pub credentials: Option<Credentials>,

    /// Application keep-alive interval in seconds.
    pub ping_interval_sec: Option<u64>,

    /// Reconnect when nothing arrives for this many seconds.
    pub idle_timeout_sec: Option<u64>,

    pub connect_timeout_sec: Option<u64>,
    pub login_timeout_sec: Option<u64>,
    pub unsubscribe_timeout_sec: Option<u64>,

    /// Cap on subscribe/unsubscribe requests per second.
    pub max_outbound_per_sec: Option<u32>,

    pub reconnect: Option<ReconnectSettings>,

    /// Extra HTTP headers for the WebSocket handshake.
    pub extra_headers: Option<HashMap<String, String>>,

    /// Channels subscribed at start-up.
    #[serde(default)]
    pub channels: Vec<ChannelSpec>,
}

impl ConnectionConfig {
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}_{}", self.exchange, if self.private { "private" } else { "public" }),
        }
    }

    /// Credentials of a private connection; errors if they are missing.
    pub fn require_credentials(&self) -> anyhow::Result<&Credentials> {
        let creds = self
            .credentials
            .as_ref()
            .with_context(|| format!("connection {} is private but has no credentials", self.label()))?;
        if creds.api_key.is_empty() || creds.secret_key.is_empty() {
            bail!("connection {}: api_key and secret_key must be set", self.label());
        }
        Ok(creds)
    }

    pub fn headers(&self) -> HashMap<String, String> {
        self.extra_headers.clone().unwrap_or_default()
    }
}

/// API credentials. `Debug` never prints secret material.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
    /// OKX only.
    pub passphrase: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Reconnect tuning; unset fields keep the engine defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconnectSettings {
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub factor: Option<f64>,
    /// Omit for unlimited retries.
    pub max_retries: Option<u32>,
}

impl ReconnectSettings {
    pub fn to_policy(&self) -> ReconnectPolicy {
        let defaults = ReconnectPolicy::default();
        ReconnectPolicy {
            initial_delay: self.initial_delay_ms.map(Duration::from_millis).unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay_ms.map(Duration::from_millis).unwrap_or(defaults.max_delay),
            factor: self.factor.unwrap_or(defaults.factor),
            max_retries: self.max_retries,
        }
    }
}

/// One channel to subscribe at start-up.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelSpec {
    pub name: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ChannelSpec {
    pub fn request(&self) -> ChannelRequest {
        ChannelRequest::new(&self.name, &self.args)
    }
}

impl MuxConfig {
    /// Engine settings for one configured connection.
    ///
    /// Keep-alive uses a protocol ping; integrations with an application
    /// ping replace the payload.
    pub fn from_connection(conn: &ConnectionConfig, label: impl Into<String>) -> Self {
        let defaults = MuxConfig::default();
        let secs = |v: Option<u64>, default: Duration| v.map(Duration::from_secs).unwrap_or(default);
        Self {
            label: label.into(),
            connect_timeout: secs(conn.connect_timeout_sec, defaults.connect_timeout),
            login_timeout: secs(conn.login_timeout_sec, defaults.login_timeout),
            ping: conn
                .ping_interval_sec
                .filter(|s| *s > 0)
                .map(|s| PingConfig { interval: Duration::from_secs(s), payload: PingPayload::WebSocketPing }),
            idle_timeout: conn.idle_timeout_sec.filter(|s| *s > 0).map(Duration::from_secs),
            reconnect: conn.reconnect.as_ref().map(ReconnectSettings::to_policy).unwrap_or(defaults.reconnect),
            unsubscribe_timeout: secs(conn.unsubscribe_timeout_sec, defaults.unsubscribe_timeout),
            max_outbound_per_sec: conn.max_outbound_per_sec.filter(|n| *n > 0),
            event_capacity: defaults.event_capacity,
        }
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    parse_config(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Parse config JSON.
pub fn parse_config(content: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = serde_json::from_str(content)?;
    if config.connections.is_empty() {
        bail!("no connections configured");
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "module": { "module_name": "feeds", "log_path": "/tmp/log" },
        "connections": [
            {
                "exchange": "okx",
                "ping_interval_sec": 20,
                "reconnect": { "initial_delay_ms": 250, "max_retries": 5 },
                "channels": [
                    { "name": "tickers", "args": ["BTCUSDT"] },
                    { "name": "books5", "args": ["ETH-USDT"] }
                ]
            },
            {
                "name": "bybit_orders",
                "exchange": "bybit",
                "category": "linear",
                "private": true,
                "credentials": { "api_key": "key", "secret_key": "very-secret" },
                "channels": [{ "name": "order" }]
            }
        ]
    }"#;

    #[test]
    fn parses_sample() {
        let cfg = parse_config(SAMPLE).unwrap();
        assert_eq!(cfg.module_name(), Some("feeds"));
        assert_eq!(cfg.connections.len(), 2);

        let okx = &cfg.connections[0];
        assert_eq!(okx.label(), "okx_public");
        assert!(!okx.private);
        assert_eq!(okx.channels[0].request(), ChannelRequest::new("tickers", ["BTCUSDT"]));

        let bybit = &cfg.connections[1];
        assert_eq!(bybit.label(), "bybit_orders");
        assert!(bybit.channels[0].args.is_empty());
        assert_eq!(bybit.require_credentials().unwrap().api_key, "key");
    }

    #[test]
    fn maps_onto_engine_config() {
        let cfg = parse_config(SAMPLE).unwrap();
        let mux = MuxConfig::from_connection(&cfg.connections[0], "mux-okx");
        assert_eq!(mux.label, "mux-okx");
        assert_eq!(mux.ping.unwrap().interval, Duration::from_secs(20));
        assert_eq!(mux.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(mux.reconnect.max_delay, Duration::from_secs(30));
        assert_eq!(mux.reconnect.max_retries, Some(5));
        assert_eq!(mux.connect_timeout, Duration::from_secs(10));

        let mux = MuxConfig::from_connection(&cfg.connections[1], "mux-bybit");
        assert!(mux.ping.is_none());
        assert_eq!(mux.reconnect.max_retries, None);
    }

    #[test]
    fn secrets_are_redacted() {
        let cfg = parse_config(SAMPLE).unwrap();
        let debug = format!("{:?}", cfg.connections[1]);
        assert!(debug.contains("key"));
        assert!(!debug.contains("very-secret"));
    }

    #[test]
    fn private_without_credentials_is_rejected() {
        let json = r#"{ "connections": [{ "exchange": "okx", "private": true }] }"#;
        let cfg = parse_config(json).unwrap();
        assert!(cfg.connections[0].require_credentials().is_err());
    }

    #[test]
    fn empty_connections_rejected() {
        assert!(parse_config(r#"{ "connections": [] }"#).is_err());
    }
}
