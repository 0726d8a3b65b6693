//! The transport boundary between the hub and concrete connections.
//!
//! The hub never talks to sockets directly. Adapters (WebSocket, SSE, test
//! queues) implement [`Transport`] and are handed to
//! [`SubscriptionHub::subscribe`](super::SubscriptionHub::subscribe).

use futures::future::BoxFuture;
use resonance_types::StateBroadcast;
use tokio::sync::mpsc;

/// A failed delivery to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The remote end has gone away.
    #[error("transport closed")]
    Closed,

    /// The write itself failed.
    #[error("transport write failed: {0}")]
    Write(String),
}

/// One outbound connection.
///
/// `send` is awaited by the subscriber's own writer task, so a slow
/// transport delays only its own subscriber.
pub trait Transport: Send + Sync {
    /// Deliver one broadcast message.
    fn send<'a>(&'a self, message: &'a StateBroadcast) -> BoxFuture<'a, Result<(), TransportError>>;

    /// Resolve once the remote end has closed.
    ///
    /// Called repeatedly; each returned future must resolve if the transport
    /// is already closed.
    fn closed(&self) -> BoxFuture<'_, ()>;
}

/// In-process transport backed by a bounded `mpsc` channel.
///
/// Dropping the receiver closes the transport. Used by the HTTP adapters
/// and by tests.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<StateBroadcast>,
}

impl ChannelTransport {
    /// Create a transport and the receiver that drains it.
    ///
    /// `capacity` is clamped to at least 1.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<StateBroadcast>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send<'a>(&'a self, message: &'a StateBroadcast) -> BoxFuture<'a, Result<(), TransportError>> {
        Box::pin(async move {
            self.tx
                .send(message.clone())
                .await
                .map_err(|_closed| TransportError::Closed)
        })
    }

    fn closed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.tx.closed())
    }
}
