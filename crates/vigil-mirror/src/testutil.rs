//! Scriptable in-memory connection for tests.
//!
//! `MockConnection` records every call, lets the test emit lifecycle
//! signals and push events by hand, and answers snapshot fetches from a
//! script. `MockFactory` hands out mock connections and keeps them so the
//! test can drive whichever handle the code under test currently owns.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use vigil_core::{
    Camera, CameraRef, ConnectionId, EventKind, LifecycleSignal, RecorderComplete, Recording,
    SyncEvent,
};

use crate::connection::{
    subscription_channel, Connection, ConnectionFactory, EventSink, Subscription,
    SubscriptionStatus,
};
use crate::error::{CommandError, TransportError};

/// A camera-registered event.
pub fn camera_registered(id: &str, name: &str) -> SyncEvent {
    SyncEvent::CameraRegistered(Camera::new(id, name))
}

/// A recording-complete event.
pub fn recording_complete(camera: &str, date: &str, filename: &str) -> SyncEvent {
    SyncEvent::RecordingComplete(RecorderComplete {
        camera: CameraRef {
            identifier: camera.into(),
        },
        recording: Recording::new(camera, date, filename),
    })
}

/// Reply for one snapshot fetch.
enum SnapshotReply {
    Ready(Result<Vec<Camera>, CommandError>),
    Held(oneshot::Receiver<Result<Vec<Camera>, CommandError>>),
}

/// Releases a held snapshot fetch.
pub struct SnapshotGate {
    tx: oneshot::Sender<Result<Vec<Camera>, CommandError>>,
}

impl SnapshotGate {
    /// Answer the fetch with `cameras`.
    pub fn release(self, cameras: Vec<Camera>) {
        let _ = self.tx.send(Ok(cameras));
    }

    /// Fail the fetch with `err`.
    pub fn fail(self, err: CommandError) {
        let _ = self.tx.send(Err(err));
    }
}

struct Sink {
    kind: EventKind,
    tx: EventSink,
    status: watch::Sender<SubscriptionStatus>,
}

pub struct MockConnection {
    id: ConnectionId,
    signals: broadcast::Sender<LifecycleSignal>,
    sinks: Mutex<Vec<Sink>>,
    replies: Mutex<VecDeque<SnapshotReply>>,
    default_snapshot: Mutex<Vec<Camera>>,
    connect_error: Mutex<Option<TransportError>>,
    auto_connect: bool,
    connected: AtomicBool,
    closed: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl MockConnection {
    pub fn new(id: ConnectionId) -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            id,
            signals,
            sinks: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            default_snapshot: Mutex::new(Vec::new()),
            connect_error: Mutex::new(None),
            auto_connect: false,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Emit `connected` from inside `connect()`.
    pub fn auto_connecting(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    /// Emit a lifecycle signal.
    pub fn emit(&self, signal: LifecycleSignal) {
        self.connected
            .store(signal == LifecycleSignal::Connected, Ordering::SeqCst);
        let _ = self.signals.send(signal);
    }

    /// Deliver `event` to every live sink subscribed to its kind. Returns
    /// how many sinks took it.
    pub fn push(&self, event: SyncEvent) -> usize {
        let kind = event.kind();
        self.sinks
            .lock()
            .iter()
            .filter(|sink| sink.kind == kind)
            .filter(|sink| sink.tx.send(event.clone()).is_ok())
            .count()
    }

    /// Mark every declared subscription as acknowledged.
    pub fn confirm_subscriptions(&self) {
        for sink in self.sinks.lock().iter() {
            let _ = sink.status.send_replace(SubscriptionStatus::Active);
        }
    }

    /// Snapshot returned when no scripted reply is queued.
    pub fn set_snapshot(&self, cameras: Vec<Camera>) {
        *self.default_snapshot.lock() = cameras;
    }

    /// Queue a fetch that waits for the returned gate.
    pub fn hold_snapshot(&self) -> SnapshotGate {
        let (tx, rx) = oneshot::channel();
        self.replies.lock().push_back(SnapshotReply::Held(rx));
        SnapshotGate { tx }
    }

    /// Queue a failing fetch.
    pub fn fail_snapshot(&self, err: CommandError) {
        self.replies
            .lock()
            .push_back(SnapshotReply::Ready(Err(err)));
    }

    /// Make `connect()` fail.
    pub fn fail_connect(&self, err: TransportError) {
        *self.connect_error.lock() = Some(err);
    }

    /// Calls made so far, e.g. `subscribe:camera_registered`, `connect`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of snapshot fetches so far.
    pub fn fetch_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| *call == "fetch_cameras")
            .count()
    }

    /// Wait until `call` has been recorded. Panics after one second.
    pub async fn wait_for_call(&self, call: &str) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while !self.calls.lock().iter().any(|c| c == call) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {call}, saw {:?}",
                self.calls()
            );
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn lifecycle(&self) -> broadcast::Receiver<LifecycleSignal> {
        self.signals.subscribe()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.record("connect");
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Some(err) = self.connect_error.lock().take() {
            self.emit(LifecycleSignal::Disconnected);
            return Err(err);
        }
        if self.auto_connect {
            self.emit(LifecycleSignal::Connected);
        }
        Ok(())
    }

    async fn fetch_cameras(&self) -> Result<Vec<Camera>, CommandError> {
        self.record("fetch_cameras");
        let reply = self.replies.lock().pop_front();
        match reply {
            Some(SnapshotReply::Ready(result)) => result,
            Some(SnapshotReply::Held(rx)) => rx.await.unwrap_or(Err(CommandError::Disconnected {
                command: "get_cameras".into(),
            })),
            None if self.connected.load(Ordering::SeqCst) => {
                Ok(self.default_snapshot.lock().clone())
            }
            None => Err(CommandError::NotConnected),
        }
    }

    fn subscribe(&self, kind: EventKind, sink: EventSink) -> Subscription {
        self.record(format!("subscribe:{kind}"));
        let (status, subscription) = subscription_channel(kind);
        self.sinks.lock().push(Sink {
            kind,
            tx: sink,
            status,
        });
        subscription
    }

    fn close(&self) {
        self.record("close");
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Creates [`MockConnection`]s and keeps them for the test.
#[derive(Default)]
pub struct MockFactory {
    created: Mutex<Vec<Arc<MockConnection>>>,
    auto_connect: bool,
    snapshot: Mutex<Vec<Camera>>,
    connect_error: Mutex<Option<TransportError>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connections emit `connected` as soon as `connect()` runs.
    pub fn auto_connecting() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: true,
            ..Self::default()
        })
    }

    /// Default snapshot for connections created from now on.
    pub fn set_snapshot(&self, cameras: Vec<Camera>) {
        *self.snapshot.lock() = cameras;
    }

    /// The next connection created fails its `connect()`.
    pub fn fail_connect(&self, err: TransportError) {
        *self.connect_error.lock() = Some(err);
    }

    /// All connections created so far, oldest first.
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().clone()
    }

    /// The most recently created connection.
    pub fn latest(&self) -> Arc<MockConnection> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("no connection created yet")
    }
}

impl ConnectionFactory for MockFactory {
    fn create(&self, id: ConnectionId) -> Arc<dyn Connection> {
        let mut conn = MockConnection::new(id);
        if self.auto_connect {
            conn = conn.auto_connecting();
        }
        conn.set_snapshot(self.snapshot.lock().clone());
        if let Some(err) = self.connect_error.lock().take() {
            conn.fail_connect(err);
        }
        let conn = Arc::new(conn);
        self.created.lock().push(Arc::clone(&conn));
        conn
    }
}
