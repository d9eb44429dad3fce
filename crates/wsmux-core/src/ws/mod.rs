//! Physical connection layer: frames, the connector seam, the WebSocket
//! implementation and reconnect backoff.

pub mod backoff;
pub mod client;
pub mod frame;
pub mod transport;

pub use backoff::{Backoff, ReconnectPolicy};
pub use client::WsConnector;
pub use frame::{Frame, PingConfig, PingPayload};
pub use transport::{Connection, Connector, FrameSink, FrameSource};
