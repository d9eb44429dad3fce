//! OKX-specific configuration extraction.
//!
//! Handles conversion from the generic [`ConnectionConfig`] to OKX-specific
//! settings, including symbol format conversion (`BTCUSDT` → `BTC-USDT`).

use anyhow::{Context, Result};
use wsmux_core::config::ConnectionConfig;

pub const OKX_PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
pub const OKX_PRIVATE_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/private";

/// API key triple for the private login.
#[derive(Clone)]
pub struct OkxCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
}

impl std::fmt::Debug for OkxCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OkxCredentials").field("api_key", &self.api_key).finish_non_exhaustive()
    }
}

/// Parsed OKX configuration.
#[derive(Debug, Clone)]
pub struct OkxConfig {
    pub url: String,
    /// Present for private connections.
    pub credentials: Option<OkxCredentials>,
    /// Ping interval in seconds (default: 25; OKX drops idle sockets after 30).
    pub ping_interval_sec: u64,
}

impl OkxConfig {
    /// Extract OKX config from a [`ConnectionConfig`].
    pub fn from_connection(conn: &ConnectionConfig) -> Result<Self> {
        let credentials = if conn.private {
            let creds = conn.require_credentials()?;
            let passphrase = creds
                .passphrase
                .clone()
                .with_context(|| format!("connection {}: OKX login needs a passphrase", conn.label()))?;
            Some(OkxCredentials {
                api_key: creds.api_key.clone(),
                secret_key: creds.secret_key.clone(),
                passphrase,
            })
        } else {
            None
        };

        let default_url = if conn.private { OKX_PRIVATE_WS_URL } else { OKX_PUBLIC_WS_URL };
        Ok(Self {
            url: conn.url.clone().unwrap_or_else(|| default_url.to_string()),
            credentials,
            ping_interval_sec: conn.ping_interval_sec.unwrap_or(25),
        })
    }
}

/// Convert a standard symbol (e.g. `BTCUSDT`) to OKX spot instId (`BTC-USDT`).
///
/// Tries common quote currencies in order. If no match is found, returns the
/// input unchanged (assumes it is already in OKX format).
pub fn to_okx_inst_id(symbol: &str) -> String {
    let symbol = symbol.trim().to_ascii_uppercase();
    if symbol.contains('-') {
        return symbol;
    }
    const QUOTES: &[&str] = &["USDT", "USDC", "BTC", "ETH", "EUR", "DAI"];
    for q in QUOTES {
        if let Some(base) = symbol.strip_suffix(q) {
            if !base.is_empty() {
                return format!("{base}-{q}");
            }
        }
    }
    symbol
}

/// Convert a standard symbol to OKX swap instId (`BTC-USDT-SWAP`).
pub fn to_okx_swap_inst_id(symbol: &str) -> String {
    let inst = to_okx_inst_id(symbol);
    if inst.ends_with("-SWAP") { inst } else { format!("{inst}-SWAP") }
}

#[cfg(test)]
mod tests {
    use wsmux_core::config::parse_config;

    use super::*;

    #[test]
    fn symbol_conversion_spot() {
        assert_eq!(to_okx_inst_id("BTCUSDT"), "BTC-USDT");
        assert_eq!(to_okx_inst_id("ethusdc"), "ETH-USDC");
        assert_eq!(to_okx_inst_id("BTC-USDT"), "BTC-USDT");
        assert_eq!(to_okx_inst_id("USDT"), "USDT");
    }

    #[test]
    fn symbol_conversion_swap() {
        assert_eq!(to_okx_swap_inst_id("BTCUSDT"), "BTC-USDT-SWAP");
        assert_eq!(to_okx_swap_inst_id("ETH-USDT-SWAP"), "ETH-USDT-SWAP");
    }

    #[test]
    fn private_needs_passphrase() {
        let cfg = parse_config(
            r#"{ "connections": [{ "exchange": "okx", "private": true,
                 "credentials": { "api_key": "k", "secret_key": "s" } }] }"#,
        )
        .unwrap();
        assert!(OkxConfig::from_connection(&cfg.connections[0]).is_err());
    }

    #[test]
    fn picks_endpoint_by_visibility() {
        let cfg = parse_config(
            r#"{ "connections": [
                 { "exchange": "okx" },
                 { "exchange": "okx", "private": true,
                   "credentials": { "api_key": "k", "secret_key": "s", "passphrase": "p" } }] }"#,
        )
        .unwrap();
        let public = OkxConfig::from_connection(&cfg.connections[0]).unwrap();
        assert_eq!(public.url, OKX_PUBLIC_WS_URL);
        assert!(public.credentials.is_none());
        let private = OkxConfig::from_connection(&cfg.connections[1]).unwrap();
        assert_eq!(private.url, OKX_PRIVATE_WS_URL);
        assert_eq!(private.credentials.unwrap().passphrase, "p");
    }
}
