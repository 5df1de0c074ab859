//! Sequences connection lifecycle, snapshot loading and event merging.
//!
//! One task owns the [`Orchestrator`] and is the only writer of the
//! [`StateStore`]. Inputs are handled one at a time:
//!
//! - `connected`: flag goes true and a snapshot fetch starts in the
//!   background. While it runs, events are held back (unless buffering is
//!   off) and replayed on top of the snapshot once it lands.
//! - `disconnected`: flag goes false. The registry is kept for display.
//! - events: folded into the registry through the merge reducers.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{Camera, ConnectionId, LifecycleSignal, ReRegistration, SyncEvent};

use crate::connection::ConnectionFactory;
use crate::error::{CommandError, SyncError};
use crate::lifecycle::{ConnectionLifecycle, LifecycleInput, Phase};
use crate::merge;
use crate::registry::{by_identifier, CameraOrder, Registry};
use crate::store::{StateStore, StateView};

/// Tunables for the orchestrator.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    /// Hold events received while the snapshot is loading and replay them
    /// after it.
    pub buffer_during_snapshot: bool,
    /// Handling of known cameras that are registered again.
    pub reregistration: ReRegistration,
    /// Registry ordering.
    pub order: CameraOrder,
    /// Capacity of the diagnostics broadcast channel.
    pub diagnostics_capacity: usize,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            buffer_during_snapshot: true,
            reregistration: ReRegistration::MergeRecordings,
            order: by_identifier,
            diagnostics_capacity: 64,
        }
    }
}

type SnapshotResult = Result<Vec<Camera>, CommandError>;

struct PendingSnapshot {
    connection: ConnectionId,
    task: JoinHandle<SnapshotResult>,
}

/// Drives one mirror. See the module docs for the input handling rules.
pub struct Orchestrator {
    lifecycle: ConnectionLifecycle,
    store: StateStore,
    config: MirrorConfig,
    diagnostics: broadcast::Sender<SyncError>,
    snapshot: Option<PendingSnapshot>,
    buffer: Vec<SyncEvent>,
}

impl Orchestrator {
    /// Create an orchestrator. No handle exists until
    /// [`initialize`](Self::initialize) or [`run`](Self::run).
    pub fn new(factory: Arc<dyn ConnectionFactory>, config: MirrorConfig) -> Self {
        let (diagnostics, _) = broadcast::channel(config.diagnostics_capacity.max(1));
        Self {
            lifecycle: ConnectionLifecycle::new(factory),
            store: StateStore::new(config.order),
            config,
            diagnostics,
            snapshot: None,
            buffer: Vec::new(),
        }
    }

    /// Read-only view of the mirrored state.
    pub fn view(&self) -> StateView {
        self.store.view()
    }

    /// Merge precondition violations, snapshot and connect failures.
    pub fn diagnostics(&self) -> broadcast::Receiver<SyncError> {
        self.diagnostics.subscribe()
    }

    /// Lifecycle phase of the owned handle.
    pub fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// Create a new connection handle, replacing any previous one. A
    /// snapshot still loading for the old handle is abandoned together with
    /// the events buffered for it.
    pub fn initialize(&mut self) -> ConnectionId {
        self.abandon_snapshot();
        let id = self.lifecycle.initialize();
        self.store.set_connection(id.clone());
        id
    }

    /// Run until `shutdown` is cancelled. Initializes a handle first if
    /// none exists.
    #[tracing::instrument(skip_all, name = "orchestrator")]
    pub async fn run(mut self, shutdown: CancellationToken) {
        if self.lifecycle.phase() == Phase::Uninitialized {
            let _ = self.initialize();
        }

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!("shutdown requested, stopping mirror");
                    break;
                }
                (connection, result) = wait_snapshot(&mut self.snapshot) => {
                    self.on_snapshot(&connection, result);
                }
                input = self.lifecycle.next_input() => self.on_input(input),
            }
        }

        self.abandon_snapshot();
    }

    /// Run on a new task.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    fn on_input(&mut self, input: LifecycleInput) {
        match input {
            LifecycleInput::Signal(LifecycleSignal::Connected) => self.on_connected(),
            LifecycleInput::Signal(LifecycleSignal::Disconnected) => {
                info!(connection_id = ?self.store.current().connection, "disconnected");
                let _ = self.store.set_connected(false);
            }
            LifecycleInput::ConnectFailed(err) => {
                warn!(error = %err, error_kind = err.error_kind(), "connect failed");
                self.report(SyncError::Connect(err));
            }
            LifecycleInput::Event(event) => {
                if self.snapshot.is_some() && self.config.buffer_during_snapshot {
                    debug!(
                        event_kind = %event.kind(),
                        camera = %event.camera_id(),
                        buffered = self.buffer.len() + 1,
                        "snapshot loading, buffering event"
                    );
                    self.buffer.push(event);
                } else {
                    self.apply_live(event);
                }
            }
        }
    }

    fn on_connected(&mut self) {
        let Some(connection) = self.lifecycle.connection().cloned() else {
            return;
        };
        let id = connection.id().clone();
        info!(connection_id = %id, "connected, fetching snapshot");
        let _ = self.store.set_connected(true);

        self.abandon_snapshot();
        let task = tokio::spawn(async move { connection.fetch_cameras().await });
        self.snapshot = Some(PendingSnapshot {
            connection: id,
            task,
        });
    }

    fn on_snapshot(
        &mut self,
        connection: &ConnectionId,
        result: Result<SnapshotResult, JoinError>,
    ) {
        self.snapshot = None;
        let current = self.store.current();
        if current.connection.as_ref() != Some(connection) {
            debug!(connection_id = %connection, "dropping snapshot of a replaced handle");
            return;
        }

        let buffered = std::mem::take(&mut self.buffer);
        let base = match result {
            Ok(Ok(cameras)) => {
                let registry = Registry::from_cameras(cameras, self.config.order);
                info!(
                    connection_id = %connection,
                    cameras = registry.len(),
                    recordings = registry.recording_count(),
                    replayed = buffered.len(),
                    "snapshot loaded"
                );
                registry
            }
            Ok(Err(err)) => {
                warn!(
                    connection_id = %connection,
                    error = %err,
                    error_kind = err.error_kind(),
                    "snapshot fetch failed, keeping stale registry"
                );
                self.report(SyncError::Snapshot(err));
                if buffered.is_empty() {
                    return;
                }
                current.registry.clone()
            }
            Err(join) => {
                warn!(connection_id = %connection, error = %join, "snapshot task failed");
                self.report(SyncError::SnapshotTask(join.to_string()));
                if buffered.is_empty() {
                    return;
                }
                current.registry.clone()
            }
        };

        let registry = buffered
            .into_iter()
            .fold(base, |registry, event| {
                self.merge_one(&registry, event).unwrap_or(registry)
            });
        self.store.set_registry(registry);
    }

    fn apply_live(&mut self, event: SyncEvent) {
        let current = self.store.current();
        if let Some(registry) = self.merge_one(&current.registry, event) {
            self.store.set_registry(registry);
        }
    }

    /// Apply one event. Rejections are logged and reported, and yield `None`.
    fn merge_one(&self, registry: &Registry, event: SyncEvent) -> Option<Registry> {
        let event_kind = event.kind();
        let camera = event.camera_id().clone();
        match merge::apply_event(registry, event, self.config.reregistration) {
            Ok(next) => {
                debug!(event_kind = %event_kind, camera = %camera, "event applied");
                Some(next)
            }
            Err(err) => {
                warn!(
                    event_kind = %event_kind,
                    camera = %camera,
                    error = %err,
                    "event rejected"
                );
                self.report(SyncError::Merge(err));
                None
            }
        }
    }

    /// Drop the in-flight snapshot and the events held for it. They are
    /// never replayed over a later snapshot.
    fn abandon_snapshot(&mut self) {
        if let Some(pending) = self.snapshot.take() {
            debug!(
                connection_id = %pending.connection,
                discarded = self.buffer.len(),
                "abandoning snapshot fetch"
            );
            pending.task.abort();
        }
        self.buffer.clear();
    }

    fn report(&self, err: SyncError) {
        let _ = self.diagnostics.send(err);
    }
}

/// Resolve when the pending snapshot task finishes. Pending while there is
/// none. Cancel safe: the task stays in place if this future is dropped.
async fn wait_snapshot(
    pending: &mut Option<PendingSnapshot>,
) -> (ConnectionId, Result<SnapshotResult, JoinError>) {
    match pending {
        Some(snapshot) => {
            let result = (&mut snapshot.task).await;
            (snapshot.connection.clone(), result)
        }
        None => std::future::pending().await,
    }
}
