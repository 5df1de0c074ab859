//! # vigil-core
//!
//! Shared vocabulary for the vigil workspace: identifiers, camera and
//! recording records, and the push events a server connection delivers.

#![deny(unsafe_code)]

pub mod camera;
pub mod events;
pub mod ids;
pub mod policy;

pub use camera::{Camera, Recording, Recordings};
pub use events::{CameraRef, EventKind, LifecycleSignal, RecorderComplete, SyncEvent};
pub use ids::{CameraId, ConnectionId};
pub use policy::ReRegistration;
