//! Module registry: factory for creating feed modules from config.

use anyhow::{Result, anyhow};
use wsmux_core::config::ConnectionConfig;

use crate::FeedModule;
use crate::pipeline::EventHandler;

/// Create a [`FeedModule`] based on the `exchange` field in the config.
pub fn create_feed_module(config: &ConnectionConfig, handler: EventHandler) -> Result<Box<dyn FeedModule>> {
    let module: Box<dyn FeedModule> = match config.exchange.to_lowercase().as_str() {
        "okx" => Box::new(crate::okx::build(config, handler)?),
        "bybit" => Box::new(crate::bybit::build(config, handler)?),
        other => return Err(anyhow!("Unknown exchange: {other}")),
    };
    Ok(module)
}
