//! Merge policies shared by configuration and the merge engine.

use serde::{Deserialize, Serialize};

/// What happens to a camera's accumulated recordings when the server
/// registers the same identifier again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReRegistration {
    /// Overwrite descriptive fields, keep prior recordings and overlay any
    /// recordings carried by the event.
    #[default]
    MergeRecordings,
    /// Replace the registry entry wholesale with the incoming camera.
    Replace,
}

impl ReRegistration {
    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MergeRecordings => "mergeRecordings",
            Self::Replace => "replace",
        }
    }
}
