//! Request signing for private WebSocket logins.
//!
//! Both supported exchanges sign with HMAC-SHA256 over a short prehash
//! string; they differ only in how the digest is encoded:
//!
//! - **OKX** — Base64 of the digest over `timestamp + "GET" + "/users/self/verify"`.
//! - **Bybit** — lowercase hex of the digest over `"GET/realtime" + expires`.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use wsmux_core::{MuxError, Result};

type HmacSha256 = Hmac<Sha256>;

fn digest(secret: &str, message: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| MuxError::Encode(format!("invalid hmac key: {e}")))?;
    mac.update(message.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC-SHA256 signature as a lowercase hex string.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String> {
    Ok(hex::encode(digest(secret, message)?))
}

/// HMAC-SHA256 signature as standard Base64.
pub fn hmac_sha256_base64(secret: &str, message: &str) -> Result<String> {
    Ok(base64::engine::general_purpose::STANDARD.encode(digest(secret, message)?))
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}
