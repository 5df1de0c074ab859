//! The seams between the mirror and a concrete transport.
//!
//! A [`Connection`] is one handle: it owns a session to the server,
//! reconnects on its own, and reports lifecycle transitions on a broadcast
//! channel. The mirror never looks inside it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch};
use vigil_core::{Camera, ConnectionId, EventKind, LifecycleSignal, SyncEvent};

use crate::error::{CommandError, TransportError};

/// Where a connection delivers events for one subscription.
///
/// Each handle gets its own channel, so events a replaced handle still
/// delivers land in a channel nobody reads.
pub type EventSink = mpsc::UnboundedSender<SyncEvent>;

/// Confirmation state of a declared subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Declared, not yet acknowledged by the server.
    Pending,
    /// The server acknowledged it.
    Active,
    /// The server rejected it or the session ended first.
    Failed(String),
}

/// A declared interest in one event stream.
///
/// Declaring is synchronous: once [`Connection::subscribe`] returns, the
/// connection will deliver matching events to the sink, whatever the
/// confirmation status says.
#[derive(Clone, Debug)]
pub struct Subscription {
    kind: EventKind,
    status: watch::Receiver<SubscriptionStatus>,
}

impl Subscription {
    /// Build a subscription whose status is driven through `status`.
    pub fn new(kind: EventKind, status: watch::Receiver<SubscriptionStatus>) -> Self {
        Self { kind, status }
    }

    /// The stream this subscription covers.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Current confirmation status.
    pub fn status(&self) -> SubscriptionStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status leaves `Pending`. Returns the settled status,
    /// or `Failed` if the connection dropped its sender.
    pub async fn confirmed(&mut self) -> SubscriptionStatus {
        match self
            .status
            .wait_for(|status| *status != SubscriptionStatus::Pending)
            .await
        {
            Ok(status) => status.clone(),
            Err(_) => SubscriptionStatus::Failed("connection dropped".into()),
        }
    }
}

/// Create a status channel starting at `Pending` and the subscription that
/// observes it.
pub fn subscription_channel(
    kind: EventKind,
) -> (watch::Sender<SubscriptionStatus>, Subscription) {
    let (tx, rx) = watch::channel(SubscriptionStatus::Pending);
    (tx, Subscription::new(kind, rx))
}

/// One connection handle to the camera server.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Identifier minted for this handle.
    fn id(&self) -> &ConnectionId;

    /// Subscribe to lifecycle signals. Receivers taken before
    /// [`connect`](Self::connect) is called see the first `Connected`.
    fn lifecycle(&self) -> broadcast::Receiver<LifecycleSignal>;

    /// Start the session. Resolves once the first handshake completes or
    /// fails; later reconnects happen on their own and surface only as
    /// lifecycle signals.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Fetch every camera the server knows about. Fails when not connected.
    async fn fetch_cameras(&self) -> Result<Vec<Camera>, CommandError>;

    /// Declare interest in `kind`. Matching events go to `sink` for the
    /// lifetime of the handle, across reconnects.
    fn subscribe(&self, kind: EventKind, sink: EventSink) -> Subscription;

    /// Stop the session and release resources. Signals emitted after this
    /// are not meaningful.
    fn close(&self) {}
}

/// Creates connection handles.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a fresh, not yet connected handle.
    fn create(&self, id: ConnectionId) -> Arc<dyn Connection>;
}

impl<F> ConnectionFactory for F
where
    F: Fn(ConnectionId) -> Arc<dyn Connection> + Send + Sync + 'static,
{
    fn create(&self, id: ConnectionId) -> Arc<dyn Connection> {
        self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscription_tracks_status() {
        let (tx, mut sub) = subscription_channel(EventKind::CameraRegistered);
        assert_eq!(sub.kind(), EventKind::CameraRegistered);
        assert_eq!(sub.status(), SubscriptionStatus::Pending);

        let _ = tx.send_replace(SubscriptionStatus::Active);
        assert_eq!(sub.confirmed().await, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn dropped_sender_reads_as_failed() {
        let (tx, mut sub) = subscription_channel(EventKind::RecordingComplete);
        drop(tx);
        assert!(matches!(sub.confirmed().await, SubscriptionStatus::Failed(_)));
    }
}
