//! Stream handle returned by [`MuxClient::subscribe_channel`].
//!
//! [`MuxClient::subscribe_channel`]: super::MuxClient::subscribe_channel

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use tokio::sync::{Notify, mpsc};
use tracing::trace;

use super::key::ChannelKey;
use super::registry::{Acquired, ChannelRegistry, Delivery, Release, Ticket};
use crate::error::MuxError;

/// One subscriber's view of a channel.
///
/// Yields `Ok(notification)` for every payload routed to the channel, or a
/// single `Err` if the exchange rejects the channel, after which the stream
/// ends. Reconnects are invisible apart from a possible gap.
///
/// Dropping the handle releases the subscription; the last handle for a
/// channel triggers the wire unsubscribe in the background.
pub struct ChannelStream<N: Clone> {
    key: ChannelKey,
    ticket: Ticket,
    receiver: mpsc::UnboundedReceiver<Delivery<N>>,
    registry: Arc<ChannelRegistry<N>>,
    nudge: Arc<Notify>,
    terminated: bool,
}

impl<N: Clone> ChannelStream<N> {
    pub(crate) fn new(
        key: ChannelKey,
        acquired: Acquired<N>,
        registry: Arc<ChannelRegistry<N>>,
        nudge: Arc<Notify>,
    ) -> Self {
        Self {
            key,
            ticket: acquired.ticket,
            receiver: acquired.receiver,
            registry,
            nudge,
            terminated: false,
        }
    }

    /// Channel this handle is subscribed to.
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Next notification; `None` once the stream has terminated.
    pub async fn recv(&mut self) -> Option<Result<N, MuxError>> {
        self.next().await
    }

    /// Release the subscription now (same as dropping the handle).
    pub fn close(self) {}
}

impl<N: Clone> Stream for ChannelStream<N> {
    type Item = Result<N, MuxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }
        match this.receiver.poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                this.terminated = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.terminated = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<N: Clone> Drop for ChannelStream<N> {
    fn drop(&mut self) {
        if self.registry.release(&self.key, self.ticket) == Release::Unsubscribe {
            trace!("last handle for {} dropped", self.key);
            self.nudge.notify_one();
        }
    }
}

impl<N: Clone> std::fmt::Debug for ChannelStream<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelStream").field("key", &self.key).field("terminated", &self.terminated).finish()
    }
}
