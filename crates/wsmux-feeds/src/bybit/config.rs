//! Bybit-specific configuration extraction.

use anyhow::{Result, bail};
use wsmux_core::config::ConnectionConfig;

const BYBIT_WS_BASE: &str = "wss://stream.bybit.com/v5";

/// Product category of a public Bybit stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BybitCategory {
    Spot,
    Linear,
    Inverse,
    Option,
}

impl BybitCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Some(Self::Spot),
            "linear" => Some(Self::Linear),
            "inverse" => Some(Self::Inverse),
            "option" => Some(Self::Option),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Linear => "linear",
            Self::Inverse => "inverse",
            Self::Option => "option",
        }
    }
}

#[derive(Clone)]
pub struct BybitCredentials {
    pub api_key: String,
    pub secret_key: String,
}

impl std::fmt::Debug for BybitCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitCredentials").field("api_key", &self.api_key).finish_non_exhaustive()
    }
}

/// Parsed Bybit configuration.
#[derive(Debug, Clone)]
pub struct BybitConfig {
    pub url: String,
    pub category: BybitCategory,
    pub credentials: Option<BybitCredentials>,
    /// Ping interval in seconds (default: 20, as Bybit recommends).
    pub ping_interval_sec: u64,
}

impl BybitConfig {
    /// Extract Bybit config from a [`ConnectionConfig`].
    ///
    /// Public connections default to the `linear` category.
    pub fn from_connection(conn: &ConnectionConfig) -> Result<Self> {
        let category = match conn.category.as_deref() {
            None => BybitCategory::Linear,
            Some(raw) => match BybitCategory::parse(raw) {
                Some(c) => c,
                None => bail!("connection {}: unknown Bybit category {raw}", conn.label()),
            },
        };

        let credentials = if conn.private {
            let creds = conn.require_credentials()?;
            Some(BybitCredentials { api_key: creds.api_key.clone(), secret_key: creds.secret_key.clone() })
        } else {
            None
        };

        let default_url = if conn.private {
            format!("{BYBIT_WS_BASE}/private")
        } else {
            format!("{BYBIT_WS_BASE}/public/{}", category.as_str())
        };

        Ok(Self {
            url: conn.url.clone().unwrap_or(default_url),
            category,
            credentials,
            ping_interval_sec: conn.ping_interval_sec.unwrap_or(20),
        })
    }
}

/// Normalize a symbol to Bybit format (`btc-usdt` → `BTCUSDT`).
pub fn to_bybit_symbol(symbol: &str) -> String {
    symbol.trim().chars().filter(|c| *c != '-' && *c != '/').collect::<String>().to_ascii_uppercase()
}
