//! In-memory transport and a small JSON codec for exercising the engine
//! without a network.
//!
//! [`mock_transport`] returns a [`MockConnector`] to hand to a `MuxClient`
//! and a [`MockServer`] that accepts its connections. Each accepted
//! [`ServerConn`] sees the frames the client writes and can push frames back
//! or drop the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::{MuxError, Result};
use crate::mux::{ChannelKey, ChannelRequest, ControlEvent, Envelope, WireCodec};
use crate::ws::{Connection, Connector, Frame, FrameSink, FrameSource};

const WAIT: Duration = Duration::from_secs(2);

pub fn mock_transport() -> (MockConnector, MockServer) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let refuse = Arc::new(AtomicU32::new(0));
    let attempts = Arc::new(AtomicU32::new(0));
    let connector = MockConnector { accepted: accepted_tx, refuse: refuse.clone(), attempts: attempts.clone() };
    let server = MockServer { accepted: accepted_rx, refuse, attempts };
    (connector, server)
}

pub struct MockConnector {
    accepted: mpsc::UnboundedSender<ServerConn>,
    refuse: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Connection> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self.refuse.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok();
        if refused {
            return Err(MuxError::Transport("connection refused".into()));
        }
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerConn { to_client: Some(to_client), from_client });
        let sink: Box<dyn FrameSink> = Box::new(MockSink(to_server));
        let source: Box<dyn FrameSource> = Box::new(MockSource(from_server));
        Ok((sink, source))
    }

    fn endpoint(&self) -> &str {
        "mock://server"
    }
}

struct MockSink(mpsc::UnboundedSender<Frame>);

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        self.0.send(frame).map_err(|_| MuxError::Transport("peer gone".into()))
    }

    async fn close(&mut self) {}
}

struct MockSource(mpsc::UnboundedReceiver<Frame>);

#[async_trait]
impl FrameSource for MockSource {
    async fn next_frame(&mut self) -> Option<Result<Frame>> {
        self.0.recv().await.map(Ok)
    }
}

pub struct MockServer {
    accepted: mpsc::UnboundedReceiver<ServerConn>,
    refuse: Arc<AtomicU32>,
    attempts: Arc<AtomicU32>,
}

impl MockServer {
    /// Wait for the client's next connection.
    pub async fn accept(&mut self) -> ServerConn {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("no connection within timeout")
            .expect("connector dropped")
    }

    /// Fail the next `n` connect attempts.
    pub fn refuse_next(&self, n: u32) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// Server end of one mock connection.
pub struct ServerConn {
    to_client: Option<mpsc::UnboundedSender<Frame>>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl ServerConn {
    pub fn push(&self, frame: Frame) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(frame);
        }
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Frame::Text(text.into()));
    }

    /// Next frame written by the client.
    pub async fn recv(&mut self) -> Frame {
        tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("client wrote nothing within timeout")
            .expect("client side closed")
    }

    /// Next frame written by the client, parsed as JSON.
    pub async fn recv_json(&mut self) -> serde_json::Value {
        match self.recv().await {
            Frame::Text(text) => serde_json::from_str(&text).expect("client wrote invalid json"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Assert the client writes nothing for `within`.
    pub async fn expect_silence(&mut self, within: Duration) {
        if let Ok(frame) = tokio::time::timeout(within, self.from_client.recv()).await {
            panic!("unexpected frame from client: {frame:?}");
        }
    }

    /// Everything written so far without waiting.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// End the connection from the server side.
    pub fn hang_up(&mut self) {
        self.to_client = None;
    }
}

/// Payload type of [`TestCodec`].
#[derive(Debug, Clone, PartialEq)]
pub struct TestEvent {
    pub channel: String,
    pub value: i64,
}

/// JSON protocol used by the engine tests.
///
/// Outbound: `{"op":"subscribe"|"unsubscribe","channel":KEY}` and, with
/// login enabled, `{"op":"login","token":"secret"}`.
/// Inbound: `{"event":...}` control frames or `{"channel":KEY,"value":N}`.
#[derive(Debug, Clone, Default)]
pub struct TestCodec {
    login: bool,
    unencodable: Option<String>,
    resets: Arc<AtomicU32>,
}

#[derive(Deserialize)]
struct Inbound {
    event: Option<String>,
    channel: Option<String>,
    msg: Option<String>,
    value: Option<i64>,
}

impl TestCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_login() -> Self {
        Self { login: true, ..Self::default() }
    }

    /// Refuse to encode subscribe requests for channel key `key`.
    pub fn failing_encode(mut self, key: &str) -> Self {
        self.unencodable = Some(key.to_string());
        self
    }

    /// Connections this codec (or a clone of it) has been reset for.
    pub fn resets(&self) -> u32 {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn data_frame(channel: &str, value: i64) -> Frame {
        Frame::Text(json!({ "channel": channel, "value": value }).to_string())
    }

    pub fn subscribe_ack_frame(channel: &str) -> Frame {
        Frame::Text(json!({ "event": "subscribed", "channel": channel }).to_string())
    }

    pub fn subscribe_error_frame(channel: &str, msg: &str) -> Frame {
        Frame::Text(json!({ "event": "error", "channel": channel, "msg": msg }).to_string())
    }

    pub fn unsubscribe_ack_frame(channel: &str) -> Frame {
        Frame::Text(json!({ "event": "unsubscribed", "channel": channel }).to_string())
    }

    pub fn login_ack_frame() -> Frame {
        Frame::Text(json!({ "event": "login" }).to_string())
    }

    pub fn login_error_frame(msg: &str) -> Frame {
        Frame::Text(json!({ "event": "login_error", "msg": msg }).to_string())
    }

    fn op(op: &str, request: &ChannelRequest) -> Frame {
        Frame::Text(json!({ "op": op, "channel": request.default_key().as_str() }).to_string())
    }
}

impl WireCodec for TestCodec {
    type Notification = TestEvent;

    fn encode_subscribe(&self, request: &ChannelRequest) -> Result<Frame> {
        if self.unencodable.as_deref() == Some(request.default_key().as_str()) {
            return Err(MuxError::Encode(format!("cannot encode {}", request.name)));
        }
        Ok(Self::op("subscribe", request))
    }

    fn encode_unsubscribe(&self, request: &ChannelRequest) -> Result<Frame> {
        Ok(Self::op("unsubscribe", request))
    }

    fn decode(&self, frame: &Frame) -> Result<Envelope<TestEvent>> {
        let text = frame.as_text().ok_or_else(|| MuxError::Decode("binary frame".into()))?;
        let msg: Inbound = serde_json::from_str(text).map_err(|e| MuxError::Decode(e.to_string()))?;
        let key = msg.channel.as_deref().map(ChannelKey::from_raw);
        let reason = msg.msg.unwrap_or_default();

        let event = match (msg.event.as_deref(), key) {
            (None, _) => {
                let value = msg.value.ok_or_else(|| MuxError::Decode("missing value".into()))?;
                return Ok(Envelope::Data(TestEvent { channel: msg.channel.unwrap_or_default(), value }));
            }
            (Some("login"), _) => ControlEvent::LoginAck,
            (Some("login_error"), _) => ControlEvent::LoginError(reason),
            (Some("subscribed"), Some(key)) => ControlEvent::SubscribeAck(key),
            (Some("unsubscribed"), Some(key)) => ControlEvent::UnsubscribeAck(key),
            (Some("error"), Some(key)) => ControlEvent::SubscribeError { key, reason },
            (Some("error"), None) => ControlEvent::Error(reason),
            (Some("pong"), _) => ControlEvent::Heartbeat,
            (Some(other), _) => return Err(MuxError::Decode(format!("unknown event {other}"))),
        };
        Ok(Envelope::Control(event))
    }

    fn channel_key_of(&self, event: &TestEvent) -> Option<ChannelKey> {
        (!event.channel.is_empty()).then(|| ChannelKey::from_raw(event.channel.as_str()))
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn encode_login(&self) -> Result<Option<Frame>> {
        Ok(self.login.then(|| Frame::Text(json!({ "op": "login", "token": "secret" }).to_string())))
    }
}
