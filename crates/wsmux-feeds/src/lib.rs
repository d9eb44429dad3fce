//! # wsmux-feeds
//!
//! Exchange feeds built on the `wsmux-core` multiplexer.
//!
//! ## Architecture
//!
//! Each exchange provides a [`WireCodec`](wsmux_core::WireCodec) and a
//! `build(conn, handler)` function that wires it into a
//! [`MuxClient`](wsmux_core::MuxClient). The generic
//! [`pipeline::GenericFeed`] engine subscribes the configured channels,
//! drives the connection and hands decoded [`event::FeedEvent`]s to the
//! caller's handler.
//!
//! ## Shared infrastructure
//!
//! - [`pipeline`] — `GenericFeed` engine
//! - [`event`] — normalized notifications
//! - [`auth`] — login signatures
//! - [`json_util`] — JSON parsing helpers

pub mod auth;
pub mod bybit;
pub mod event;
pub mod json_util;
pub mod okx;
pub mod pipeline;
pub mod registry;

use anyhow::Result;
use async_trait::async_trait;

/// Trait implemented by all feed modules.
///
/// Only `Send` is required (not `Sync`) because modules are accessed
/// sequentially by the runner, never concurrently.
#[async_trait]
pub trait FeedModule: Send {
    /// Human-readable module name.
    fn name(&self) -> &str;
    /// Subscribe the configured channels and start connecting.
    async fn start(&mut self) -> Result<()>;
    /// Release every channel and close the connection.
    async fn stop(&mut self) -> Result<()>;
}
