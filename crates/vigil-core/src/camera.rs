//! Camera and recording records as the server describes them.
//!
//! Fields the mirror does not interpret are kept verbatim in `extra` so a
//! round trip through the mirror never loses server data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::CameraId;

/// Recordings of one camera: `date -> filename -> recording`.
pub type Recordings = BTreeMap<String, BTreeMap<String, Recording>>;

/// A camera registered on the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    /// Unique camera identifier.
    pub identifier: CameraId,
    /// Human readable name.
    #[serde(default)]
    pub name: String,
    /// Stream width in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Stream height in pixels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Token used to fetch still images and streams.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Still image refresh interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub still_image_refresh_interval: Option<u64>,
    /// Recording index for this camera.
    #[serde(default)]
    pub recordings: Recordings,
    /// Any other fields sent by the server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Camera {
    /// A camera with no recordings and no optional fields.
    pub fn new(identifier: impl Into<CameraId>, name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: name.into(),
            width: None,
            height: None,
            access_token: None,
            still_image_refresh_interval: None,
            recordings: Recordings::new(),
            extra: Map::new(),
        }
    }

    /// Look up a recording by date and filename.
    pub fn recording(&self, date: &str, filename: &str) -> Option<&Recording> {
        self.recordings.get(date)?.get(filename)
    }

    /// Total number of recordings across all dates.
    pub fn recording_count(&self) -> usize {
        self.recordings.values().map(BTreeMap::len).sum()
    }
}

/// A finished recording. Immutable once created; identified by
/// `(camera, date, filename)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// Server-side row id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Camera that produced the recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_identifier: Option<CameraId>,
    /// Date bucket, `YYYY-MM-DD`.
    pub date: String,
    /// File name within the date bucket.
    pub filename: String,
    /// Recording start, as sent by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// Recording end, as sent by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Path on the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Thumbnail path on the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_path: Option<String>,
    /// HLS playlist URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hls_url: Option<String>,
    /// Any other fields sent by the server.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Recording {
    /// A recording with only its key fields set.
    pub fn new(
        camera: impl Into<CameraId>,
        date: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            camera_identifier: Some(camera.into()),
            date: date.into(),
            filename: filename.into(),
            start_time: None,
            end_time: None,
            path: None,
            thumbnail_path: None,
            hls_url: None,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camera_deserializes_server_payload() {
        let camera: Camera = serde_json::from_value(json!({
            "identifier": "front",
            "name": "Front door",
            "width": 1920,
            "height": 1080,
            "access_token": "tok",
            "failed": false,
            "recordings": {
                "2024-01-01": {
                    "a.mp4": {"id": 1, "date": "2024-01-01", "filename": "a.mp4"}
                }
            }
        }))
        .unwrap();

        assert_eq!(camera.identifier.as_str(), "front");
        assert_eq!(camera.width, Some(1920));
        assert_eq!(camera.extra["failed"], json!(false));
        assert_eq!(camera.recording("2024-01-01", "a.mp4").unwrap().id, Some(1));
        assert_eq!(camera.recording_count(), 1);
    }

    #[test]
    fn camera_without_recordings_field_has_empty_index() {
        let camera: Camera =
            serde_json::from_value(json!({"identifier": "cam1", "name": "Front"})).unwrap();
        assert!(camera.recordings.is_empty());
        assert!(camera.extra.is_empty());
    }

    #[test]
    fn unknown_fields_survive_serialization() {
        let camera: Camera = serde_json::from_value(json!({
            "identifier": "cam1",
            "name": "Front",
            "is_on": true
        }))
        .unwrap();
        let value = serde_json::to_value(&camera).unwrap();
        assert_eq!(value["is_on"], json!(true));
        assert!(value.get("width").is_none());
    }

    #[test]
    fn recording_count_spans_dates() {
        let mut camera = Camera::new("cam1", "Front");
        for (date, file) in [("d1", "a"), ("d1", "b"), ("d2", "c")] {
            let _ = camera
                .recordings
                .entry(date.to_string())
                .or_default()
                .insert(file.to_string(), Recording::new("cam1", date, file));
        }
        assert_eq!(camera.recording_count(), 3);
        assert!(camera.recording("d2", "a").is_none());
    }
}
