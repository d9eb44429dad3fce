//! Transport seam between the connection manager and the physical socket.
//!
//! The connection manager only ever talks to a [`Connector`]. Production code
//! uses [`WsConnector`](super::client::WsConnector); tests plug in an
//! in-memory implementation.

use async_trait::async_trait;

use super::frame::Frame;
use crate::error::Result;

/// Write half of an established connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame.
    async fn send(&mut self, frame: Frame) -> Result<()>;
    /// Close the connection (best-effort).
    async fn close(&mut self);
}

/// Read half of an established connection.
///
/// `next_frame` must be cancel-safe: the connection manager polls it inside
/// `tokio::select!`.
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound frame, or `None` once the connection has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame>>;
}

/// Both halves of a freshly opened connection.
pub type Connection = (Box<dyn FrameSink>, Box<dyn FrameSource>);

/// Opens physical connections. Called once per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> &str;
}
