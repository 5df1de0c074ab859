//! Ownership of the single live connection handle and its state machine.
//!
//! ```text
//! Uninitialized ─initialize─▶ Connecting ─connected─▶ Connected
//!                                 │                     │
//!                            disconnected          disconnected
//!                                 ▼                     ▼
//!                             Disconnected ◀────────────┘
//!                                 │
//!                             connected (transport reconnected)
//!                                 ▼
//!                             Connected
//! ```
//!
//! Signals that do not move the machine (a second `connected`, a
//! `disconnected` while already disconnected) are dropped here so the
//! orchestrator only sees real transitions.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_core::{ConnectionId, EventKind, LifecycleSignal, SyncEvent};

use crate::connection::{Connection, ConnectionFactory, Subscription};
use crate::error::TransportError;

/// Where the owned handle is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// No handle yet.
    Uninitialized,
    /// Handle created, first handshake outstanding.
    Connecting,
    /// Session live.
    Connected,
    /// Session down; the transport may be reconnecting.
    Disconnected,
}

impl Phase {
    /// The phase `signal` leads to, or `None` when it is not a transition.
    pub fn on_signal(self, signal: LifecycleSignal) -> Option<Phase> {
        match (self, signal) {
            (Self::Connecting | Self::Disconnected, LifecycleSignal::Connected) => {
                Some(Self::Connected)
            }
            (Self::Connecting | Self::Connected, LifecycleSignal::Disconnected) => {
                Some(Self::Disconnected)
            }
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the owned handle produced next.
#[derive(Debug)]
pub enum LifecycleInput {
    /// A lifecycle transition of the current handle.
    Signal(LifecycleSignal),
    /// A push event from the current handle.
    Event(SyncEvent),
    /// The initial `connect()` call failed.
    ConnectFailed(TransportError),
}

struct Handle {
    connection: Arc<dyn Connection>,
    signals: broadcast::Receiver<LifecycleSignal>,
    events: mpsc::UnboundedReceiver<SyncEvent>,
    subscriptions: Vec<Subscription>,
    connect: JoinHandle<Result<(), TransportError>>,
    signals_open: bool,
    events_open: bool,
    connect_pending: bool,
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.connect.abort();
        self.connection.close();
    }
}

enum Step {
    Signal(Result<LifecycleSignal, broadcast::error::RecvError>),
    Event(Option<SyncEvent>),
    Connect(Result<Result<(), TransportError>, tokio::task::JoinError>),
}

/// Owns at most one connection handle and turns its output into
/// [`LifecycleInput`]s.
pub struct ConnectionLifecycle {
    factory: Arc<dyn ConnectionFactory>,
    current: Option<Handle>,
    phase: Phase,
}

impl ConnectionLifecycle {
    /// A lifecycle with no handle yet.
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            factory,
            current: None,
            phase: Phase::Uninitialized,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The owned handle, if any.
    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        self.current.as_ref().map(|h| &h.connection)
    }

    /// Subscriptions declared on the owned handle.
    pub fn subscriptions(&self) -> &[Subscription] {
        self.current
            .as_ref()
            .map(|h| h.subscriptions.as_slice())
            .unwrap_or_default()
    }

    /// Replace the owned handle with a fresh one.
    ///
    /// Order matters: the lifecycle receiver is taken and both streams are
    /// subscribed before `connect()` is started, so neither the first
    /// `connected` nor the first event can be missed. Subscribing does not
    /// wait for the server to confirm. The previous handle is closed; its
    /// channels are dropped, so anything it still delivers goes nowhere.
    pub fn initialize(&mut self) -> ConnectionId {
        if let Some(old) = self.current.take() {
            info!(connection_id = %old.connection.id(), "replacing connection handle");
            drop(old);
        }

        let id = ConnectionId::new();
        let connection = self.factory.create(id.clone());
        let signals = connection.lifecycle();

        let (sink, events) = mpsc::unbounded_channel();
        let subscriptions = EventKind::ALL
            .iter()
            .map(|&kind| connection.subscribe(kind, sink.clone()))
            .collect();
        drop(sink);

        let connect = tokio::spawn({
            let connection = Arc::clone(&connection);
            async move { connection.connect().await }
        });

        self.phase = Phase::Connecting;
        self.current = Some(Handle {
            connection,
            signals,
            events,
            subscriptions,
            connect,
            signals_open: true,
            events_open: true,
            connect_pending: true,
        });
        info!(connection_id = %id, "connection handle initialized");
        id
    }

    /// Wait for the next input from the owned handle.
    ///
    /// Lifecycle signals are preferred over events when both are ready.
    /// Pending forever when there is no handle or everything is closed, so
    /// it is safe to use in a `select!` next to other branches.
    pub async fn next_input(&mut self) -> LifecycleInput {
        loop {
            let Some(handle) = self.current.as_mut() else {
                return std::future::pending().await;
            };

            let step = tokio::select! {
                biased;
                signal = handle.signals.recv(), if handle.signals_open => Step::Signal(signal),
                event = handle.events.recv(), if handle.events_open => Step::Event(event),
                result = &mut handle.connect, if handle.connect_pending => Step::Connect(result),
                else => return std::future::pending().await,
            };

            match step {
                Step::Signal(Ok(signal)) => match self.phase.on_signal(signal) {
                    Some(next) => {
                        debug!(
                            connection_id = %handle.connection.id(),
                            from = %self.phase,
                            to = %next,
                            "lifecycle transition"
                        );
                        self.phase = next;
                        return LifecycleInput::Signal(signal);
                    }
                    None => {
                        debug!(
                            connection_id = %handle.connection.id(),
                            phase = %self.phase,
                            signal = signal.as_str(),
                            "ignoring repeated lifecycle signal"
                        );
                    }
                },
                Step::Signal(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!(connection_id = %handle.connection.id(), lagged = n, "lifecycle signals lagged");
                }
                Step::Signal(Err(broadcast::error::RecvError::Closed)) => {
                    handle.signals_open = false;
                    if self.phase == Phase::Connected {
                        warn!(connection_id = %handle.connection.id(), "lifecycle channel closed while connected");
                        self.phase = Phase::Disconnected;
                        return LifecycleInput::Signal(LifecycleSignal::Disconnected);
                    }
                }
                Step::Event(Some(event)) => return LifecycleInput::Event(event),
                Step::Event(None) => {
                    debug!(connection_id = %handle.connection.id(), "event channel closed");
                    handle.events_open = false;
                }
                Step::Connect(result) => {
                    handle.connect_pending = false;
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => return LifecycleInput::ConnectFailed(err),
                        Err(join) => {
                            return LifecycleInput::ConnectFailed(TransportError::Handshake(
                                join.to_string(),
                            ))
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockFactory;
    use assert_matches::assert_matches;
    use std::time::Duration;

    #[test]
    fn phase_transitions() {
        use LifecycleSignal::{Connected, Disconnected};
        assert_eq!(Phase::Connecting.on_signal(Connected), Some(Phase::Connected));
        assert_eq!(Phase::Connecting.on_signal(Disconnected), Some(Phase::Disconnected));
        assert_eq!(Phase::Connected.on_signal(Disconnected), Some(Phase::Disconnected));
        assert_eq!(Phase::Disconnected.on_signal(Connected), Some(Phase::Connected));
        assert_eq!(Phase::Connected.on_signal(Connected), None);
        assert_eq!(Phase::Disconnected.on_signal(Disconnected), None);
        assert_eq!(Phase::Uninitialized.on_signal(Connected), None);
    }

    #[tokio::test]
    async fn subscribes_before_connect() {
        let factory = MockFactory::new();
        let mut lifecycle = ConnectionLifecycle::new(factory.clone());
        let id = lifecycle.initialize();
        assert_eq!(lifecycle.phase(), Phase::Connecting);
        assert_eq!(lifecycle.subscriptions().len(), 2);

        let conn = factory.latest();
        assert_eq!(conn.id(), &id);
        conn.wait_for_call("connect").await;
        assert_eq!(
            conn.calls(),
            ["subscribe:camera_registered", "subscribe:recording_complete", "connect"]
        );
    }

    #[tokio::test]
    async fn duplicate_connected_is_swallowed() {
        let factory = MockFactory::new();
        let mut lifecycle = ConnectionLifecycle::new(factory.clone());
        let _ = lifecycle.initialize();
        let conn = factory.latest();

        conn.emit(LifecycleSignal::Connected);
        conn.emit(LifecycleSignal::Connected);
        conn.emit(LifecycleSignal::Disconnected);

        assert_matches!(lifecycle.next_input().await, LifecycleInput::Signal(LifecycleSignal::Connected));
        assert_matches!(lifecycle.next_input().await, LifecycleInput::Signal(LifecycleSignal::Disconnected));
        assert_eq!(lifecycle.phase(), Phase::Disconnected);
    }

    #[tokio::test]
    async fn replaced_handle_is_closed_and_silenced() {
        let factory = MockFactory::new();
        let mut lifecycle = ConnectionLifecycle::new(factory.clone());
        let first = lifecycle.initialize();
        let old = factory.latest();
        let second = lifecycle.initialize();
        assert_ne!(first, second);
        assert!(old.is_closed());

        old.emit(LifecycleSignal::Connected);
        assert_eq!(old.push(crate::testutil::camera_registered("cam1", "Front")), 0);

        let quiet = tokio::time::timeout(Duration::from_millis(50), lifecycle.next_input()).await;
        assert!(quiet.is_err());
        assert_eq!(lifecycle.phase(), Phase::Connecting);
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let factory = MockFactory::new();
        factory.fail_connect(TransportError::Handshake("refused".into()));
        let mut lifecycle = ConnectionLifecycle::new(factory.clone());
        let _ = lifecycle.initialize();
        assert_matches!(
            lifecycle.next_input().await,
            LifecycleInput::Signal(LifecycleSignal::Disconnected)
        );
        assert_matches!(
            lifecycle.next_input().await,
            LifecycleInput::ConnectFailed(TransportError::Handshake(msg)) if msg == "refused"
        );
    }

    #[tokio::test]
    async fn no_handle_means_no_input() {
        let mut lifecycle = ConnectionLifecycle::new(MockFactory::new());
        let quiet = tokio::time::timeout(Duration::from_millis(20), lifecycle.next_input()).await;
        assert!(quiet.is_err());
    }
}
