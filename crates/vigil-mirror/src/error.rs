//! Error types for the mirror and the collaborators it drives.

use std::time::Duration;

use vigil_core::CameraId;

/// A recording event could not be folded into the registry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// The recording targets a camera the registry does not contain.
    #[error("recording {date}/{filename} targets unknown camera {camera}")]
    UnknownCamera {
        /// Camera the event referenced.
        camera: CameraId,
        /// Date bucket of the rejected recording.
        date: String,
        /// File name of the rejected recording.
        filename: String,
    },
}

/// Failures of the connection handshake.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The server refused or broke the handshake.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// The handshake did not finish in time.
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
    /// The handle was closed before or during connect.
    #[error("connection closed")]
    Closed,
}

impl TransportError {
    /// Short classification string for logs.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "handshake",
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
        }
    }
}

/// Failures of a remote command (snapshot fetch, subscribe).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The connection has no live session.
    #[error("not connected")]
    NotConnected,
    /// The session ended while the command was in flight.
    #[error("disconnected while waiting for {command}")]
    Disconnected {
        /// Command name.
        command: String,
    },
    /// No response in time.
    #[error("{command} timed out after {after:?}")]
    Timeout {
        /// Command name.
        command: String,
        /// Configured timeout.
        after: Duration,
    },
    /// The server answered with an error.
    #[error("{command} rejected by server ({code}): {message}")]
    Rejected {
        /// Command name.
        command: String,
        /// Server error code.
        code: String,
        /// Server error message.
        message: String,
    },
    /// The response did not have the expected shape.
    #[error("malformed {command} response: {reason}")]
    Decode {
        /// Command name.
        command: String,
        /// Parser message.
        reason: String,
    },
}

impl CommandError {
    /// Short classification string for logs.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotConnected => "not_connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Timeout { .. } => "timeout",
            Self::Rejected { .. } => "rejected",
            Self::Decode { .. } => "decode",
        }
    }
}

/// Errors surfaced by the orchestrator on its diagnostics channel.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// An event violated a merge precondition and was not applied.
    #[error(transparent)]
    Merge(#[from] MergeError),
    /// The snapshot fetch after `connected` failed; the registry is stale.
    #[error("snapshot fetch failed: {0}")]
    Snapshot(#[source] CommandError),
    /// `connect()` returned an error.
    #[error("connect failed: {0}")]
    Connect(#[from] TransportError),
    /// The snapshot task panicked.
    #[error("snapshot task failed: {0}")]
    SnapshotTask(String),
}

impl SyncError {
    /// Short classification string for logs.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Merge(_) => "merge_precondition",
            Self::Snapshot(_) => "snapshot",
            Self::Connect(_) => "connect",
            Self::SnapshotTask(_) => "snapshot_task",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_camera_message_names_the_recording() {
        let err = MergeError::UnknownCamera {
            camera: "cam9".into(),
            date: "2024-01-01".into(),
            filename: "a.mp4".into(),
        };
        assert_eq!(
            err.to_string(),
            "recording 2024-01-01/a.mp4 targets unknown camera cam9"
        );
    }

    #[test]
    fn sync_error_kinds() {
        let merge: SyncError = MergeError::UnknownCamera {
            camera: "c".into(),
            date: "d".into(),
            filename: "f".into(),
        }
        .into();
        assert_eq!(merge.error_kind(), "merge_precondition");
        assert_eq!(
            SyncError::Snapshot(CommandError::NotConnected).error_kind(),
            "snapshot"
        );
        assert_eq!(SyncError::from(TransportError::Closed).error_kind(), "connect");
    }

    #[test]
    fn command_error_display() {
        let err = CommandError::Rejected {
            command: "get_cameras".into(),
            code: "unauthorized".into(),
            message: "login required".into(),
        };
        assert_eq!(
            err.to_string(),
            "get_cameras rejected by server (unauthorized): login required"
        );
        assert_eq!(err.error_kind(), "rejected");
        let err = CommandError::Timeout {
            command: "get_cameras".into(),
            after: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "get_cameras timed out after 2s");
    }
}
