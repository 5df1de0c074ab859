//! Push events and lifecycle signals delivered by a connection.

use serde::{Deserialize, Serialize};

use crate::camera::{Camera, Recording};
use crate::ids::CameraId;

/// The two event streams the mirror subscribes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A camera was registered (or re-registered) on the server.
    CameraRegistered,
    /// A recorder finished writing a recording.
    RecordingComplete,
}

impl EventKind {
    /// Both kinds, in subscription order.
    pub const ALL: [EventKind; 2] = [EventKind::CameraRegistered, EventKind::RecordingComplete];

    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CameraRegistered => "camera_registered",
            Self::RecordingComplete => "recording_complete",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a recording-complete event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecorderComplete {
    /// The camera the recording belongs to. Only its identifier is used
    /// when merging.
    pub camera: CameraRef,
    /// The finished recording.
    pub recording: Recording,
}

/// Camera reference carried inside a recording event. The server sends the
/// whole camera; only the identifier matters to the mirror.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraRef {
    /// Camera identifier.
    pub identifier: CameraId,
}

/// One incremental event from either stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A camera registration.
    CameraRegistered(Camera),
    /// A completed recording.
    RecordingComplete(RecorderComplete),
}

impl SyncEvent {
    /// The stream this event arrived on.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::CameraRegistered(_) => EventKind::CameraRegistered,
            Self::RecordingComplete(_) => EventKind::RecordingComplete,
        }
    }

    /// The camera this event targets.
    pub fn camera_id(&self) -> &CameraId {
        match self {
            Self::CameraRegistered(camera) => &camera.identifier,
            Self::RecordingComplete(event) => &event.camera.identifier,
        }
    }
}

/// Connection lifecycle transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
    /// Handshake completed; the session is live.
    Connected,
    /// The session ended or the handshake failed.
    Disconnected,
}

impl LifecycleSignal {
    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn recorder_complete_ignores_extra_camera_fields() {
        let event: RecorderComplete = serde_json::from_value(json!({
            "camera": {"identifier": "cam1", "name": "Front", "width": 640},
            "recording": {"date": "2024-01-01", "filename": "a.mp4"}
        }))
        .unwrap();
        assert_eq!(event.camera.identifier.as_str(), "cam1");
        assert_eq!(event.recording.filename, "a.mp4");
    }

    #[test]
    fn sync_event_reports_kind_and_target() {
        let event = SyncEvent::CameraRegistered(Camera::new("cam1", "Front"));
        assert_eq!(event.kind(), EventKind::CameraRegistered);
        assert_eq!(event.camera_id().as_str(), "cam1");

        let event = SyncEvent::RecordingComplete(RecorderComplete {
            camera: CameraRef { identifier: "cam2".into() },
            recording: Recording::new("cam2", "2024-01-01", "a.mp4"),
        });
        assert_eq!(event.kind(), EventKind::RecordingComplete);
        assert_eq!(event.camera_id().as_str(), "cam2");
    }

    #[test]
    fn event_kind_names() {
        assert_eq!(EventKind::CameraRegistered.to_string(), "camera_registered");
        assert_eq!(EventKind::RecordingComplete.as_str(), "recording_complete");
        assert_eq!(LifecycleSignal::Disconnected.as_str(), "disconnected");
    }
}
