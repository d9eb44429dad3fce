//! WebSocket [`Connector`] over `tokio-tungstenite` (TLS).
//!
//! Each call to [`Connector::connect`] performs a fresh handshake against the
//! configured URL with any extra HTTP headers (e.g. API key headers) and
//! splits the stream into independent read and write halves.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::frame::Frame;
use super::transport::{Connection, Connector, FrameSink, FrameSource};
use crate::error::{MuxError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector for a single WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    extra_headers: HashMap<String, String>,
}

impl WsConnector {
    /// Create a connector, validating the URL scheme up front.
    pub fn new(url: impl Into<String>, extra_headers: HashMap<String, String>) -> Result<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url).map_err(|e| MuxError::Config(format!("invalid url {url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(MuxError::Config(format!("unsupported scheme in {url}")));
        }
        if parsed.host_str().is_none() {
            return Err(MuxError::Config(format!("missing host in {url}")));
        }
        Ok(Self { url, extra_headers })
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection> {
        let stream = connect_ws(&self.url, &self.extra_headers).await?;
        let (write, read) = stream.split();
        let sink: Box<dyn FrameSink> = Box::new(WsSink(write));
        let source: Box<dyn FrameSource> = Box::new(WsSource(read));
        Ok((sink, source))
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.0.send(frame.into()).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.0.close().await {
            debug!("ws close failed: {e}");
        }
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        while let Some(msg) = self.0.next().await {
            match msg {
                // Raw frames only appear when writing.
                Ok(Message::Frame(_)) => continue,
                Ok(msg) => return Some(Ok(msg.into())),
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }
}

/// Establish a TLS WebSocket connection with extra handshake headers.
async fn connect_ws(url: &str, extra_headers: &HashMap<String, String>) -> Result<WsStream> {
    let mut request = url.into_client_request()?;

    for (key, value) in extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| MuxError::Config(format!("invalid header name {key}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| MuxError::Config(format!("invalid header value for {key}: {e}")))?;
        request.headers_mut().insert(name, value);
    }

    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_websocket_urls() {
        assert!(matches!(WsConnector::new("https://ws.okx.com", HashMap::new()), Err(MuxError::Config(_))));
        assert!(matches!(WsConnector::new("not a url", HashMap::new()), Err(MuxError::Config(_))));
    }

    #[test]
    fn accepts_wss_url() {
        let c = WsConnector::new("wss://ws.okx.com:8443/ws/v5/public", HashMap::new()).unwrap();
        assert_eq!(c.endpoint(), "wss://ws.okx.com:8443/ws/v5/public");
    }
}
