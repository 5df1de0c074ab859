//! Reducers that fold one push event into a registry.
//!
//! Every function takes the current registry by reference and returns a new
//! one. The input is never touched, so readers holding the previous value keep
//! a consistent point-in-time view.

use vigil_core::{Camera, RecorderComplete, ReRegistration, SyncEvent};

use crate::error::MergeError;
use crate::registry::Registry;

/// Insert or overwrite a camera and re-normalize the registry.
///
/// With [`ReRegistration::MergeRecordings`] a known camera keeps the
/// recordings it had accumulated; recordings carried by the incoming record
/// are laid over them per date bucket. With [`ReRegistration::Replace`] the
/// incoming record replaces the entry wholesale.
pub fn apply_camera_registered(
    registry: &Registry,
    mut camera: Camera,
    policy: ReRegistration,
) -> Registry {
    if policy == ReRegistration::MergeRecordings {
        if let Some(existing) = registry.get(&camera.identifier) {
            let mut recordings = existing.recordings.clone();
            for (date, files) in std::mem::take(&mut camera.recordings) {
                recordings.entry(date).or_default().extend(files);
            }
            camera.recordings = recordings;
        }
    }
    registry.with_camera(camera)
}

/// Add a finished recording to its camera's date bucket.
///
/// Fails with [`MergeError::UnknownCamera`] when the camera is not in the
/// registry; the caller keeps its registry unchanged in that case.
pub fn apply_recording_complete(
    registry: &Registry,
    event: RecorderComplete,
) -> Result<Registry, MergeError> {
    let RecorderComplete { camera, recording } = event;
    let Some(existing) = registry.get(&camera.identifier) else {
        return Err(MergeError::UnknownCamera {
            camera: camera.identifier,
            date: recording.date,
            filename: recording.filename,
        });
    };

    let date = recording.date.clone();
    let filename = recording.filename.clone();
    let mut updated = existing.clone();
    let _ = updated
        .recordings
        .entry(date.clone())
        .or_default()
        .insert(filename.clone(), recording);

    registry
        .with_updated(updated)
        .ok_or(MergeError::UnknownCamera {
            camera: camera.identifier,
            date,
            filename,
        })
}

/// Dispatch an event to its reducer.
pub fn apply_event(
    registry: &Registry,
    event: SyncEvent,
    policy: ReRegistration,
) -> Result<Registry, MergeError> {
    match event {
        SyncEvent::CameraRegistered(camera) => {
            Ok(apply_camera_registered(registry, camera, policy))
        }
        SyncEvent::RecordingComplete(event) => apply_recording_complete(registry, event),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::by_identifier;
    use assert_matches::assert_matches;
    use vigil_core::{CameraRef, Recording};

    fn recorded(camera: &str, date: &str, filename: &str) -> RecorderComplete {
        RecorderComplete {
            camera: CameraRef {
                identifier: camera.into(),
            },
            recording: Recording::new(camera, date, filename),
        }
    }

    fn with_cam1() -> Registry {
        Registry::from_cameras([Camera::new("cam1", "Front")], by_identifier)
    }

    #[test]
    fn reregistration_keeps_recordings_and_renames() {
        let registry = apply_recording_complete(&with_cam1(), recorded("cam1", "2024-01-01", "a.mp4"))
            .unwrap();

        let registry = apply_camera_registered(
            &registry,
            Camera::new("cam1", "Front-Renamed"),
            ReRegistration::MergeRecordings,
        );
        let cam = registry.get(&"cam1".into()).unwrap();
        assert_eq!(cam.name, "Front-Renamed");
        assert!(cam.recording("2024-01-01", "a.mp4").is_some());
    }

    #[test]
    fn registering_same_camera_twice_is_idempotent() {
        let camera = Camera::new("cam1", "Front");
        let once = apply_camera_registered(&Registry::default(), camera.clone(), ReRegistration::MergeRecordings);
        let twice = apply_camera_registered(&once, camera, ReRegistration::MergeRecordings);
        assert_eq!(once, twice);
    }

    #[test]
    fn merge_overlays_incoming_recordings() {
        let registry = apply_recording_complete(&with_cam1(), recorded("cam1", "d1", "a.mp4")).unwrap();

        let mut incoming = Camera::new("cam1", "Front");
        let _ = incoming
            .recordings
            .entry("d1".into())
            .or_default()
            .insert("b.mp4".into(), Recording::new("cam1", "d1", "b.mp4"));
        let registry = apply_camera_registered(&registry, incoming, ReRegistration::MergeRecordings);

        let cam = registry.get(&"cam1".into()).unwrap();
        assert_eq!(cam.recording_count(), 2);
    }

    #[test]
    fn replace_policy_drops_recordings() {
        let registry = apply_recording_complete(&with_cam1(), recorded("cam1", "d1", "a.mp4")).unwrap();
        let registry = apply_camera_registered(
            &registry,
            Camera::new("cam1", "Front-Renamed"),
            ReRegistration::Replace,
        );
        let cam = registry.get(&"cam1".into()).unwrap();
        assert_eq!(cam.name, "Front-Renamed");
        assert_eq!(cam.recording_count(), 0);
    }

    #[test]
    fn registration_renormalizes_order() {
        let registry = Registry::from_cameras([Camera::new("m", "M")], by_identifier);
        let registry = apply_camera_registered(&registry, Camera::new("a", "A"), ReRegistration::default());
        let ids: Vec<_> = registry.ids().map(|id| id.as_str().to_string()).collect();
        assert_eq!(ids, ["a", "m"]);
    }

    #[test]
    fn first_recording_creates_date_bucket() {
        let event = recorded("cam1", "2024-01-01", "a.mp4");
        let expected = event.recording.clone();
        let registry = apply_recording_complete(&with_cam1(), event).unwrap();

        let cam = registry.get(&"cam1".into()).unwrap();
        assert_eq!(cam.recordings.len(), 1);
        assert_eq!(cam.recordings["2024-01-01"].len(), 1);
        assert_eq!(cam.recordings["2024-01-01"]["a.mp4"], expected);
    }

    #[test]
    fn second_recording_joins_existing_bucket() {
        let registry = apply_recording_complete(&with_cam1(), recorded("cam1", "2024-01-01", "a.mp4")).unwrap();
        let registry = apply_recording_complete(&registry, recorded("cam1", "2024-01-01", "b.mp4")).unwrap();

        let bucket = &registry.get(&"cam1".into()).unwrap().recordings["2024-01-01"];
        assert!(bucket.contains_key("a.mp4"));
        assert!(bucket.contains_key("b.mp4"));
    }

    #[test]
    fn recording_for_unknown_camera_fails_and_leaves_registry() {
        let registry = with_cam1();
        let before = serde_json::to_string(&registry).unwrap();

        let err = apply_recording_complete(&registry, recorded("cam9", "d1", "x.mp4")).unwrap_err();
        assert_matches!(err, MergeError::UnknownCamera { ref camera, .. } if camera.as_str() == "cam9");
        assert_eq!(serde_json::to_string(&registry).unwrap(), before);
    }

    #[test]
    fn recording_does_not_touch_other_readers() {
        let before = with_cam1();
        let after = apply_recording_complete(&before, recorded("cam1", "d1", "a.mp4")).unwrap();
        assert_eq!(before.recording_count(), 0);
        assert_eq!(after.recording_count(), 1);
    }

    #[test]
    fn apply_event_dispatches_by_kind() {
        let registry = apply_event(
            &Registry::default(),
            SyncEvent::CameraRegistered(Camera::new("cam1", "Front")),
            ReRegistration::default(),
        )
        .unwrap();
        let registry = apply_event(
            &registry,
            SyncEvent::RecordingComplete(recorded("cam1", "d1", "a.mp4")),
            ReRegistration::default(),
        )
        .unwrap();
        assert_eq!(registry.recording_count(), 1);
    }
}
