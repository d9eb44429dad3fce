//! Subscription façade: the public entry point of the engine.
//!
//! One [`MuxClient`] owns one logical connection to one endpoint, described
//! by a [`Connector`] and a [`WireCodec`]. Any number of tasks may call
//! [`subscribe_channel`](MuxClient::subscribe_channel) concurrently; the
//! client de-duplicates by [`ChannelKey`] so the exchange sees one subscribe
//! per channel however many handles exist.

use std::sync::{Arc, Mutex};

use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::codec::WireCodec;
use super::config::MuxConfig;
use super::connection::{ConnectionManager, LastError, load_error, store_error};
use super::key::{ChannelKey, ChannelRequest};
use super::registry::{ChannelRegistry, SubscriptionState};
use super::router::{RouterStats, StatsSnapshot};
use super::state::{ConnectionEvent, ConnectionEventReceiver, ConnectionState, StateWatch};
use super::stream::ChannelStream;
use crate::error::{MuxError, Result};
use crate::ws::Connector;

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Multiplexed streaming client for one connection.
pub struct MuxClient<C: WireCodec> {
    label: Arc<str>,
    config: MuxConfig,
    connector: Arc<dyn Connector>,
    codec: Arc<C>,
    registry: Arc<ChannelRegistry<C::Notification>>,
    stats: Arc<RouterStats>,
    state: Arc<watch::Sender<ConnectionState>>,
    events: broadcast::Sender<ConnectionEvent>,
    last_error: LastError,
    nudge: Arc<Notify>,
    task: tokio::sync::Mutex<Option<Running>>,
}

impl<C: WireCodec> MuxClient<C> {
    pub fn new(config: MuxConfig, connector: impl Connector, codec: C) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            label: config.label.as_str().into(),
            connector: Arc::new(connector),
            codec: Arc::new(codec),
            registry: Arc::new(ChannelRegistry::new()),
            stats: Arc::new(RouterStats::default()),
            state: Arc::new(watch::channel(ConnectionState::Disconnected).0),
            events,
            last_error: Arc::new(Mutex::new(None)),
            nudge: Arc::new(Notify::new()),
            task: tokio::sync::Mutex::new(None),
            config,
        }
    }

    /// Start the connection manager if it is not running and wait until the
    /// connection is up (logged in and replayed).
    ///
    /// Retries follow the configured [`ReconnectPolicy`](crate::ws::ReconnectPolicy);
    /// with a bounded budget this returns
    /// [`MuxError::RetriesExhausted`] once it is spent.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.subscribe();
        {
            let mut task = self.task.lock().await;
            let running = task.as_ref().is_some_and(|r| !r.handle.is_finished());
            if !running {
                self.spawn_manager(&mut task);
            }
        }

        let reached = state
            .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Disconnected))
            .await
            .map(|s| *s)
            .map_err(|_| MuxError::Closed)?;
        match reached {
            ConnectionState::Connected => Ok(()),
            _ => Err(load_error(&self.last_error).unwrap_or(MuxError::Closed)),
        }
    }

    fn spawn_manager(&self, task: &mut Option<Running>) {
        store_error(&self.last_error, None);
        self.state.send_replace(ConnectionState::Connecting);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let manager = ConnectionManager {
            label: self.label.clone(),
            config: self.config.clone(),
            connector: self.connector.clone(),
            codec: self.codec.clone(),
            registry: self.registry.clone(),
            stats: self.stats.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            last_error: self.last_error.clone(),
        };
        let handle = tokio::spawn(manager.run(self.nudge.clone(), shutdown_rx));
        debug!("[{}] connection manager started", self.label);
        *task = Some(Running { shutdown, handle });
    }

    /// Close the connection and stop reconnecting. Subscriptions are kept and
    /// replayed by the next [`connect`](Self::connect).
    pub async fn disconnect(&self) -> Result<()> {
        let running = self.task.lock().await.take();
        if let Some(Running { shutdown, handle }) = running {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                error!("[{}] connection manager task failed: {e}", self.label);
            }
        }
        self.registry.set_online(false);
        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }

    /// Subscribe to channel `name` with `args`.
    ///
    /// The subscription is registered immediately. If this is the first
    /// handle for the channel the subscribe request is written as soon as the
    /// connection is up; otherwise the handle simply shares the existing
    /// subscription.
    pub fn subscribe_channel<I, S>(&self, name: &str, args: I) -> ChannelStream<C::Notification>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_request(ChannelRequest::new(name, args))
    }

    /// Subscribe with a prepared request.
    pub fn subscribe_request(&self, request: ChannelRequest) -> ChannelStream<C::Notification> {
        let key = self.codec.subscription_key(&request);
        let acquired = self.registry.acquire(key.clone(), request);
        if acquired.is_first_subscriber {
            self.nudge.notify_one();
        }
        ChannelStream::new(key, acquired, self.registry.clone(), self.nudge.clone())
    }

    pub fn is_connected(&self) -> bool {
        *self.state.borrow() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    pub fn state_changes(&self) -> StateWatch {
        self.state.subscribe()
    }

    /// Lifecycle events from now on.
    pub fn events(&self) -> ConnectionEventReceiver {
        self.events.subscribe()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn channel_state(&self, key: &ChannelKey) -> Option<SubscriptionState> {
        self.registry.state(key)
    }

    pub fn subscriber_count(&self, key: &ChannelKey) -> usize {
        self.registry.subscriber_count(key)
    }

    /// Key this client would use for `request`.
    pub fn key_for(&self, request: &ChannelRequest) -> ChannelKey {
        self.codec.subscription_key(request)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<C: WireCodec> Drop for MuxClient<C> {
    fn drop(&mut self) {
        if let Some(running) = self.task.get_mut().as_ref() {
            let _ = running.shutdown.send(true);
        }
    }
}
