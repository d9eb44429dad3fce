//! Generic feed engine.
//!
//! Provides [`GenericFeed`], the one [`FeedModule`] implementation shared by
//! every exchange. An exchange's `build()` only assembles a [`MuxClient`]
//! with its codec plus the configured channel list; this engine subscribes
//! the channels, drives the connection and forwards every decoded event to
//! the [`EventHandler`].
//!
//! # Architecture
//!
//! ```text
//! build(conn) ──► GenericFeed::new(client, channels, handler)
//!            ──► start()  ──► [ChannelStream + consumer task] per channel
//!                         ──► lifecycle log task + connect task
//!            ──► stop()   ──► abort consumers (unsubscribe) + disconnect
//! ```

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use wsmux_core::mux::ConnectionEventReceiver;
use wsmux_core::{ChannelRequest, ChannelStream, ConnectionEvent, MuxClient, WireCodec};

use crate::FeedModule;
use crate::event::FeedEvent;

/// Callback receiving every decoded event with the feed's name.
pub type EventHandler = Arc<dyn Fn(&str, &FeedEvent) + Send + Sync>;

/// Feed module driven by one [`MuxClient`] and a list of channels.
pub struct GenericFeed<C: WireCodec<Notification = FeedEvent>> {
    name: String,
    client: Arc<MuxClient<C>>,
    channels: Vec<ChannelRequest>,
    handler: EventHandler,
    tasks: Vec<JoinHandle<()>>,
}

impl<C: WireCodec<Notification = FeedEvent>> GenericFeed<C> {
    pub fn new(name: String, client: MuxClient<C>, channels: Vec<ChannelRequest>, handler: EventHandler) -> Self {
        Self { name, client: Arc::new(client), channels, handler, tasks: Vec::new() }
    }

    /// The underlying client, for status queries.
    pub fn client(&self) -> &MuxClient<C> {
        &self.client
    }

    pub fn channels(&self) -> &[ChannelRequest] {
        &self.channels
    }
}

#[async_trait]
impl<C: WireCodec<Notification = FeedEvent>> FeedModule for GenericFeed<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<()> {
        if !self.tasks.is_empty() {
            warn!("[{}] already started", self.name);
            return Ok(());
        }

        let name: Arc<str> = self.name.as_str().into();
        self.tasks.push(tokio::spawn(log_events(name.clone(), self.client.events())));

        // Register before connecting so the first connection replays them all.
        for request in &self.channels {
            let stream = self.client.subscribe_request(request.clone());
            debug!("[{}] subscribed {}", self.name, stream.key());
            self.tasks.push(tokio::spawn(consume(name.clone(), stream, self.handler.clone())));
        }

        let client = self.client.clone();
        let conn_name = name.clone();
        self.tasks.push(tokio::spawn(async move {
            match client.connect().await {
                Ok(()) => info!("[{conn_name}] connected"),
                Err(e) => error!("[{conn_name}] connection stopped: {e}"),
            }
        }));

        info!("[{}] started with {} channel(s)", self.name, self.channels.len());
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.client.disconnect().await?;
        let stats = self.client.stats();
        info!(
            "[{}] stopped: frames={} delivered={} decode_errors={} unroutable={}",
            self.name, stats.frames, stats.delivered, stats.decode_errors, stats.unroutable
        );
        Ok(())
    }
}

async fn consume(name: Arc<str>, mut stream: ChannelStream<FeedEvent>, handler: EventHandler) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(event) => handler(&name, &event),
            Err(e) => {
                error!("[{name}] channel {} terminated: {e}", stream.key());
                break;
            }
        }
    }
    debug!("[{name}] consumer for {} finished", stream.key());
}

async fn log_events(name: Arc<str>, mut events: ConnectionEventReceiver) {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Connected { endpoint }) => info!("[{name}] connected to {endpoint}"),
            Ok(ConnectionEvent::Authenticated) => info!("[{name}] authenticated"),
            Ok(ConnectionEvent::Replayed { channels }) => info!("[{name}] {channels} channel(s) requested"),
            Ok(ConnectionEvent::Disconnected { reason }) => warn!("[{name}] disconnected: {reason}"),
            Ok(ConnectionEvent::ReconnectFailed { attempt, error }) => {
                warn!("[{name}] reconnect attempt {attempt} failed: {error}")
            }
            Ok(ConnectionEvent::GaveUp { attempts }) => error!("[{name}] gave up after {attempts} attempt(s)"),
            Err(RecvError::Lagged(n)) => warn!("[{name}] missed {n} lifecycle event(s)"),
            Err(RecvError::Closed) => break,
        }
    }
}
