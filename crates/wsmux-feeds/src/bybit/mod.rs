//! Bybit v5 feed.
//!
//! Public connections go to `/v5/public/{category}`, private ones to
//! `/v5/private` after an `auth` handshake. Keep-alive is a JSON
//! `{"op":"ping"}` answered with an `op` reply that carries no channel.

pub mod codec;
pub mod config;

use std::time::Duration;

use anyhow::Result;
use wsmux_core::config::{ChannelSpec, ConnectionConfig};
use wsmux_core::ws::{PingConfig, PingPayload, WsConnector};
use wsmux_core::{MuxClient, MuxConfig};

use self::codec::BybitCodec;
use self::config::BybitConfig;
use crate::pipeline::{EventHandler, GenericFeed};

/// Build a Bybit feed from the connection config.
pub fn build(conn: &ConnectionConfig, handler: EventHandler) -> Result<GenericFeed<BybitCodec>> {
    let cfg = BybitConfig::from_connection(conn)?;
    let label = conn.label();

    let mut mux = MuxConfig::from_connection(conn, format!("mux-{label}"));
    mux.ping = (cfg.ping_interval_sec > 0).then(|| PingConfig {
        interval: Duration::from_secs(cfg.ping_interval_sec),
        payload: PingPayload::Json(serde_json::json!({ "req_id": "ping", "op": "ping" })),
    });

    let connector = WsConnector::new(cfg.url.clone(), conn.headers())?;
    let client = MuxClient::new(mux, connector, BybitCodec::new(cfg.credentials));
    let channels = conn.channels.iter().map(ChannelSpec::request).collect();
    Ok(GenericFeed::new(label, client, channels, handler))
}
