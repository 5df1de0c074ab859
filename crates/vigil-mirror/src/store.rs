//! The single mutable cell holding the mirrored state.
//!
//! Writers replace the whole [`MirrorState`] value; readers get an
//! `Arc<MirrorState>` that never changes under them.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use vigil_core::ConnectionId;

use crate::registry::{CameraOrder, Registry};

/// Everything a consumer can observe.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MirrorState {
    /// Handle currently owned by the orchestrator.
    pub connection: Option<ConnectionId>,
    /// True between `connected` and the next `disconnected` on that handle.
    pub connected: bool,
    /// Normalized camera registry.
    pub registry: Registry,
    /// Incremented on every published change.
    pub revision: u64,
}

impl MirrorState {
    /// Initial state: no handle, disconnected, empty registry.
    pub fn empty(order: CameraOrder) -> Self {
        Self {
            connection: None,
            connected: false,
            registry: Registry::new(order),
            revision: 0,
        }
    }
}

/// Write side of the state cell. Owned by the orchestrator.
#[derive(Debug)]
pub struct StateStore {
    tx: watch::Sender<Arc<MirrorState>>,
}

impl StateStore {
    /// A store starting from [`MirrorState::empty`].
    pub fn new(order: CameraOrder) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(MirrorState::empty(order)));
        Self { tx }
    }

    /// The latest published state.
    pub fn current(&self) -> Arc<MirrorState> {
        self.tx.borrow().clone()
    }

    /// A read-only view for consumers.
    pub fn view(&self) -> StateView {
        StateView {
            rx: self.tx.subscribe(),
        }
    }

    /// Publish a new state derived from the current one.
    fn publish(&self, update: impl FnOnce(&mut MirrorState)) -> Arc<MirrorState> {
        let mut next = MirrorState::clone(&self.current());
        update(&mut next);
        next.revision += 1;
        let next = Arc::new(next);
        let _ = self.tx.send_replace(Arc::clone(&next));
        next
    }

    /// Set the connected flag. Returns whether it changed; no state is
    /// published when it did not.
    pub fn set_connected(&self, connected: bool) -> bool {
        if self.current().connected == connected {
            return false;
        }
        let _ = self.publish(|state| state.connected = connected);
        true
    }

    /// Record a new connection handle. The flag resets to false in the same
    /// publish, since a fresh handle has not connected yet.
    pub fn set_connection(&self, id: ConnectionId) {
        let _ = self.publish(|state| {
            state.connection = Some(id);
            state.connected = false;
        });
    }

    /// Replace the registry.
    pub fn set_registry(&self, registry: Registry) {
        let _ = self.publish(|state| state.registry = registry);
    }
}

/// Read side of the state cell. Cheap to clone.
#[derive(Clone, Debug)]
pub struct StateView {
    rx: watch::Receiver<Arc<MirrorState>>,
}

impl StateView {
    /// The latest state.
    pub fn current(&self) -> Arc<MirrorState> {
        self.rx.borrow().clone()
    }

    /// Wait for the next published state. Returns `None` once the store is
    /// gone. Intermediate states published while the caller was busy are
    /// skipped; the latest one is returned.
    pub async fn changed(&mut self) -> Option<Arc<MirrorState>> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until `pred` holds for the current state and return it.
    pub async fn wait_for(
        &mut self,
        mut pred: impl FnMut(&MirrorState) -> bool,
    ) -> Option<Arc<MirrorState>> {
        self.rx
            .wait_for(|state| pred(&**state))
            .await
            .ok()
            .map(|state| Arc::clone(&state))
    }
}
