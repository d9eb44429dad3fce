//! Transport frames and keep-alive payloads.

use std::time::Duration;

use tokio_tungstenite::tungstenite::Message;

/// One message-framed unit on the physical connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Text content, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Whether this frame carries application data (text or binary).
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Text(_) | Self::Binary(_))
    }
}

impl From<Message> for Frame {
    fn from(msg: Message) -> Self {
        match msg {
            Message::Text(text) => Self::Text(text.as_str().to_owned()),
            Message::Binary(data) => Self::Binary(data.to_vec()),
            Message::Ping(data) => Self::Ping(data.to_vec()),
            Message::Pong(data) => Self::Pong(data.to_vec()),
            Message::Close(_) => Self::Close,
            // Raw frames are never surfaced while reading.
            Message::Frame(_) => Self::Binary(Vec::new()),
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close => Message::Close(None),
        }
    }
}

/// Keep-alive payload format, which varies by exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum PingPayload {
    /// Send a text frame (e.g. OKX sends `"ping"`).
    Text(String),
    /// Send a JSON object as text (e.g. Bybit `{"op":"ping"}`).
    Json(serde_json::Value),
    /// Use the standard WebSocket ping frame.
    WebSocketPing,
}

impl PingPayload {
    /// The frame written on every keep-alive tick.
    pub fn to_frame(&self) -> Frame {
        match self {
            Self::Text(t) => Frame::Text(t.clone()),
            Self::Json(j) => Frame::Text(j.to_string()),
            Self::WebSocketPing => Frame::Ping(Vec::new()),
        }
    }
}

/// Ping / keep-alive configuration for a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PingConfig {
    pub interval: Duration,
    pub payload: PingPayload,
}
