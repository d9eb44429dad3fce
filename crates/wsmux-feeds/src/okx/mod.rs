//! OKX v5 feed.
//!
//! One configured connection becomes one [`MuxClient`] on the public or the
//! private endpoint. Keep-alive is the literal text `"ping"`, answered with
//! `"pong"`. Private connections log in before any subscription is sent.

pub mod codec;
pub mod config;

use std::time::Duration;

use anyhow::Result;
use wsmux_core::config::{ChannelSpec, ConnectionConfig};
use wsmux_core::ws::{PingConfig, PingPayload, WsConnector};
use wsmux_core::{MuxClient, MuxConfig};

use self::codec::OkxCodec;
use self::config::OkxConfig;
use crate::pipeline::{EventHandler, GenericFeed};

/// Build an OKX feed from the connection config.
pub fn build(conn: &ConnectionConfig, handler: EventHandler) -> Result<GenericFeed<OkxCodec>> {
    let cfg = OkxConfig::from_connection(conn)?;
    let label = conn.label();

    let mut mux = MuxConfig::from_connection(conn, format!("mux-{label}"));
    mux.ping = (cfg.ping_interval_sec > 0).then(|| PingConfig {
        interval: Duration::from_secs(cfg.ping_interval_sec),
        payload: PingPayload::Text("ping".into()),
    });

    let connector = WsConnector::new(cfg.url.clone(), conn.headers())?;
    let client = MuxClient::new(mux, connector, OkxCodec::new(cfg.credentials));
    let channels = conn.channels.iter().map(ChannelSpec::request).collect();
    Ok(GenericFeed::new(label, client, channels, handler))
}
