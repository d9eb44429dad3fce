//! Connection manager: the single task that owns the physical connection.
//!
//! Lifecycle of one run:
//!
//! 1. Open a connection through the [`Connector`] (bounded by
//!    `connect_timeout`).
//! 2. Reset the codec's per-connection state. If the codec produces a
//!    login frame, send it and wait for the acknowledgement; every other
//!    frame is dropped meanwhile.
//! 3. Replay: re-request every wanted channel in acquisition order.
//! 4. Serve: route inbound frames, write due subscribe/unsubscribe
//!    requests, send keep-alives, watch for idleness.
//! 5. On loss, mark the registry offline and go back to 1 after backoff.
//!
//! Application tasks never write to the connection. They mutate the
//! registry and wake this task through a shared [`Notify`]; the task then
//! asks the registry which requests are due. Wake-ups coalesce, so churn
//! while no connection is up leaves nothing queued.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use super::codec::WireCodec;
use super::config::MuxConfig;
use super::key::ChannelKey;
use super::registry::ChannelRegistry;
use super::router::{LoginReply, MessageRouter, RouterStats};
use super::state::{ConnectionEvent, ConnectionState};
use super::throttle::Throttle;
use crate::error::{MuxError, Result};
use crate::ws::{Backoff, Connector, Frame, FrameSink, FrameSource};

/// Where the last run ended up, read by `connect()`.
pub(crate) type LastError = Arc<Mutex<Option<MuxError>>>;

pub(crate) fn store_error(slot: &LastError, err: Option<MuxError>) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = err;
}

pub(crate) fn load_error(slot: &LastError) -> Option<MuxError> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

enum SessionEnd {
    Shutdown,
    Lost(String),
}

pub(crate) struct ConnectionManager<C: WireCodec> {
    pub(crate) label: Arc<str>,
    pub(crate) config: MuxConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) codec: Arc<C>,
    pub(crate) registry: Arc<ChannelRegistry<C::Notification>>,
    pub(crate) stats: Arc<RouterStats>,
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) events: broadcast::Sender<ConnectionEvent>,
    pub(crate) last_error: LastError,
}

impl<C: WireCodec> ConnectionManager<C> {
    /// Run until shutdown or until the retry budget is spent.
    pub(crate) async fn run(self, nudge: Arc<Notify>, mut shutdown: watch::Receiver<bool>) {
        let router = MessageRouter::new(
            self.label.clone(),
            self.codec.clone(),
            self.registry.clone(),
            self.stats.clone(),
        );
        let mut session = Session {
            manager: &self,
            router,
            throttle: self.config.max_outbound_per_sec.map(Throttle::new),
        };

        let label = self.label.clone();
        let mut backoff = Backoff::new(&self.config.reconnect);
        let mut failures: u32 = 0;
        let mut first_attempt = true;

        loop {
            if *shutdown.borrow() {
                info!("[{label}] shutdown requested");
                store_error(&self.last_error, Some(MuxError::Closed));
                break;
            }

            self.set_state(if first_attempt { ConnectionState::Connecting } else { ConnectionState::Reconnecting });
            info!("[{label}] connecting to {}", self.connector.endpoint());

            let attempt = tokio::select! {
                _ = shutdown.changed() => {
                    store_error(&self.last_error, Some(MuxError::Closed));
                    break;
                }
                r = session.establish() => r,
            };

            let delay = match attempt {
                Ok((sink, source)) => {
                    backoff.reset();
                    failures = 0;
                    first_attempt = false;
                    match session.serve(sink, source, &nudge, &mut shutdown).await {
                        SessionEnd::Shutdown => {
                            store_error(&self.last_error, Some(MuxError::Closed));
                            break;
                        }
                        SessionEnd::Lost(reason) => {
                            let delay = backoff.next_duration();
                            warn!("[{label}] disconnected ({reason}), reconnecting in {delay:?}");
                            let _ = self.events.send(ConnectionEvent::Disconnected { reason });
                            delay
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    let _ = self.events.send(ConnectionEvent::ReconnectFailed { attempt: failures, error: e.clone() });
                    if self.config.reconnect.exhausted(failures) {
                        error!("[{label}] connection failed: {e}, giving up after {failures} attempt(s)");
                        let _ = self.events.send(ConnectionEvent::GaveUp { attempts: failures });
                        store_error(&self.last_error, Some(MuxError::RetriesExhausted { attempts: failures }));
                        break;
                    }
                    let delay = backoff.next_duration();
                    error!("[{label}] connection failed: {e}, retrying in {delay:?}");
                    delay
                }
            };

            self.set_state(ConnectionState::Reconnecting);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = shutdown.changed() => {
                    store_error(&self.last_error, Some(MuxError::Closed));
                    break;
                }
            }
        }

        self.registry.set_online(false);
        self.set_state(ConnectionState::Disconnected);
        info!("[{label}] connection manager stopped");
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("[{}] state {previous} -> {state}", self.label);
        }
    }
}

/// Per-run working state borrowed from the manager.
struct Session<'a, C: WireCodec> {
    manager: &'a ConnectionManager<C>,
    router: MessageRouter<C>,
    throttle: Option<Throttle>,
}

impl<C: WireCodec> Session<'_, C> {
    /// Open the transport and complete the login handshake if required.
    async fn establish(&mut self) -> Result<(Box<dyn FrameSink>, Box<dyn FrameSource>)> {
        let m = self.manager;
        let endpoint = m.connector.endpoint().to_string();
        let (mut sink, mut source) = tokio::time::timeout(m.config.connect_timeout, m.connector.connect())
            .await
            .map_err(|_| MuxError::Timeout(format!("connect to {endpoint}")))??;
        info!("[{}] connected", m.label);
        m.codec.reset();
        let _ = m.events.send(ConnectionEvent::Connected { endpoint });

        let login = match m.codec.encode_login() {
            Ok(login) => login,
            Err(e) => {
                sink.close().await;
                return Err(e);
            }
        };
        if let Some(frame) = login {
            m.set_state(ConnectionState::Authenticating);
            if let Err(e) = self.login(sink.as_mut(), source.as_mut(), frame).await {
                warn!("[{}] login failed: {e}", m.label);
                sink.close().await;
                return Err(e);
            }
            info!("[{}] authenticated", m.label);
            let _ = m.events.send(ConnectionEvent::Authenticated);
        }
        Ok((sink, source))
    }

    async fn login(&self, sink: &mut dyn FrameSink, source: &mut dyn FrameSource, frame: Frame) -> Result<()> {
        let timeout = self.manager.config.login_timeout;
        let deadline = Instant::now() + timeout;
        sink.send(frame).await?;

        loop {
            let next = tokio::time::timeout_at(deadline, source.next_frame())
                .await
                .map_err(|_| MuxError::Timeout(format!("login not acknowledged within {timeout:?}")))?;
            match next {
                None | Some(Ok(Frame::Close)) => {
                    return Err(MuxError::Transport("connection closed during login".into()));
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(Frame::Ping(data))) => sink.send(Frame::Pong(data)).await?,
                Some(Ok(Frame::Pong(_))) => {}
                Some(Ok(frame)) => match self.router.route_login(&frame) {
                    LoginReply::Ack => return Ok(()),
                    LoginReply::Rejected(reason) => return Err(MuxError::Auth(reason)),
                    LoginReply::Ignored => {}
                },
            }
        }
    }

    /// Replay, then serve the live connection until it ends.
    async fn serve(
        &mut self,
        mut sink: Box<dyn FrameSink>,
        mut source: Box<dyn FrameSource>,
        nudge: &Notify,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let m = self.manager;
        let label = m.label.clone();

        m.registry.set_online(true);
        match self.replay(sink.as_mut()).await {
            Ok(channels) => {
                if channels > 0 {
                    info!("[{label}] replayed {channels} channel(s)");
                }
                let _ = m.events.send(ConnectionEvent::Replayed { channels });
            }
            Err(e) => return self.lost(sink, format!("replay failed: {e}")).await,
        }
        m.set_state(ConnectionState::Connected);

        let mut ping_timer = m.config.ping.as_ref().map(|p| {
            let mut timer = tokio::time::interval_at(Instant::now() + p.interval, p.interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            timer
        });
        let sweep_period = (m.config.unsubscribe_timeout / 2).max(Duration::from_millis(10));
        let mut sweep = tokio::time::interval_at(Instant::now() + sweep_period, sweep_period);
        let mut last_inbound = Instant::now();

        loop {
            let idle_deadline = m.config.idle_timeout.map(|idle| last_inbound + idle);

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("[{label}] shutdown signal received");
                    sink.close().await;
                    m.registry.set_online(false);
                    return SessionEnd::Shutdown;
                }

                frame = source.next_frame() => {
                    match frame {
                        Some(Ok(Frame::Ping(data))) => {
                            last_inbound = Instant::now();
                            if let Err(e) = sink.send(Frame::Pong(data)).await {
                                return self.lost(sink, format!("pong send error: {e}")).await;
                            }
                        }
                        Some(Ok(Frame::Pong(_))) => last_inbound = Instant::now(),
                        Some(Ok(Frame::Close)) => return self.lost(sink, "received close frame".into()).await,
                        Some(Ok(frame)) => {
                            last_inbound = Instant::now();
                            let routed = self.router.route(&frame);
                            trace!("[{label}] routed {routed:?}");
                        }
                        Some(Err(e)) => return self.lost(sink, format!("read error: {e}")).await,
                        None => return self.lost(sink, "stream ended".into()).await,
                    }
                }

                _ = nudge.notified() => {
                    if let Err(e) = self.write_due(sink.as_mut()).await {
                        return self.lost(sink, format!("send error: {e}")).await;
                    }
                }

                _ = tick(ping_timer.as_mut()) => {
                    if let Some(ping) = &m.config.ping {
                        if let Err(e) = sink.send(ping.payload.to_frame()).await {
                            return self.lost(sink, format!("ping send error: {e}")).await;
                        }
                    }
                }

                _ = sleep_until(idle_deadline) => {
                    return self.lost(sink, "idle timeout".into()).await;
                }

                _ = sweep.tick() => {
                    let expired = m.registry.expire_unsubscribes(m.config.unsubscribe_timeout);
                    if expired > 0 {
                        debug!("[{label}] dropped {expired} unacknowledged unsubscribe(s)");
                    }
                }
            }
        }
    }

    /// Re-request every wanted channel in acquisition order. Only a write
    /// failure aborts; a channel the codec cannot encode fails on its own.
    async fn replay(&mut self, sink: &mut dyn FrameSink) -> Result<usize> {
        let wanted = self.manager.registry.all_active_in_order();
        let mut sent = 0;
        for (key, _) in wanted {
            if self.write_subscribe(sink, &key).await? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Write every request the registry reports as due.
    async fn write_due(&mut self, sink: &mut dyn FrameSink) -> Result<()> {
        let due = self.manager.registry.due_requests();
        for key in &due.unsubscribe {
            self.write_unsubscribe(sink, key).await?;
        }
        for key in &due.subscribe {
            self.write_subscribe(sink, key).await?;
        }
        Ok(())
    }

    async fn write_subscribe(&mut self, sink: &mut dyn FrameSink, key: &ChannelKey) -> Result<bool> {
        let m = self.manager;
        let Some(request) = m.registry.begin_subscribe(key) else {
            return Ok(false);
        };
        let frame = match m.codec.encode_subscribe(&request) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[{}] cannot encode subscribe for {key}: {e}", m.label);
                let err = MuxError::Subscribe { key: key.clone(), reason: e.to_string() };
                m.registry.mark_failed(key, err);
                return Ok(false);
            }
        };
        self.throttle().await;
        debug!("[{}] subscribing {key}", m.label);
        sink.send(frame).await?;
        Ok(true)
    }

    async fn write_unsubscribe(&mut self, sink: &mut dyn FrameSink, key: &ChannelKey) -> Result<()> {
        let m = self.manager;
        let Some(request) = m.registry.begin_unsubscribe(key) else {
            return Ok(());
        };
        let frame = match m.codec.encode_unsubscribe(&request) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("[{}] cannot encode unsubscribe for {key}: {e}", m.label);
                m.registry.forget(key);
                return Ok(());
            }
        };
        self.throttle().await;
        debug!("[{}] unsubscribing {key}", m.label);
        sink.send(frame).await
    }

    async fn throttle(&mut self) {
        if let Some(throttle) = self.throttle.as_mut() {
            throttle.acquire().await;
        }
    }

    async fn lost(&self, mut sink: Box<dyn FrameSink>, reason: String) -> SessionEnd {
        self.manager.registry.set_online(false);
        sink.close().await;
        SessionEnd::Lost(reason)
    }
}

async fn tick(timer: Option<&mut tokio::time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
