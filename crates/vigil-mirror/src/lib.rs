//! # vigil-mirror
//!
//! Keeps a live, normalized mirror of a camera server's registry.
//!
//! - [`registry`]: the normalized, copy-on-write camera registry
//! - [`merge`]: reducers folding push events into a registry
//! - [`store`]: the observable state cell and its read-only view
//! - [`connection`]: traits a transport implements
//! - [`lifecycle`]: ownership of the live handle and its state machine
//! - [`orchestrator`]: wiring of lifecycle, snapshot and events

#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod merge;
pub mod orchestrator;
pub mod registry;
pub mod store;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use connection::{
    subscription_channel, Connection, ConnectionFactory, EventSink, Subscription,
    SubscriptionStatus,
};
pub use error::{CommandError, MergeError, SyncError, TransportError};
pub use lifecycle::{ConnectionLifecycle, LifecycleInput, Phase};
pub use orchestrator::{MirrorConfig, Orchestrator};
pub use registry::{by_identifier, by_name, CameraOrder, Registry};
pub use store::{MirrorState, StateStore, StateView};
