//! The normalized camera registry.
//!
//! A `Registry` is a value: every change produces a new one and the old one
//! stays valid for whoever holds it. Cameras are shared through `Arc`, so a
//! copy costs one pointer per camera; only the camera being changed is
//! cloned.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use vigil_core::{Camera, CameraId};

/// Ordering applied to the whole registry after a snapshot or insert.
pub type CameraOrder = fn(&Camera, &Camera) -> Ordering;

/// Ascending identifier order.
pub fn by_identifier(a: &Camera, b: &Camera) -> Ordering {
    a.identifier.cmp(&b.identifier)
}

/// Ascending name order, identifier as tie breaker.
pub fn by_name(a: &Camera, b: &Camera) -> Ordering {
    a.name
        .cmp(&b.name)
        .then_with(|| a.identifier.cmp(&b.identifier))
}

/// Cameras keyed by identifier, held in a normalized order.
#[derive(Clone)]
pub struct Registry {
    cameras: Vec<Arc<Camera>>,
    index: HashMap<CameraId, usize>,
    order: CameraOrder,
}

impl Registry {
    /// An empty registry with the given ordering.
    pub fn new(order: CameraOrder) -> Self {
        Self {
            cameras: Vec::new(),
            index: HashMap::new(),
            order,
        }
    }

    /// Build a normalized registry from a snapshot. When an identifier
    /// repeats, the last camera wins.
    pub fn from_cameras(cameras: impl IntoIterator<Item = Camera>, order: CameraOrder) -> Self {
        let mut by_id: HashMap<CameraId, Arc<Camera>> = HashMap::new();
        for camera in cameras {
            let _ = by_id.insert(camera.identifier.clone(), Arc::new(camera));
        }
        normalize(by_id.into_values().collect(), order)
    }

    /// The ordering this registry normalizes with.
    pub fn order(&self) -> CameraOrder {
        self.order
    }

    /// Look up a camera.
    pub fn get(&self, id: &CameraId) -> Option<&Camera> {
        self.index.get(id).map(|&i| &*self.cameras[i])
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &CameraId) -> bool {
        self.index.contains_key(id)
    }

    /// Number of cameras.
    pub fn len(&self) -> usize {
        self.cameras.len()
    }

    /// Whether the registry has no cameras.
    pub fn is_empty(&self) -> bool {
        self.cameras.is_empty()
    }

    /// Cameras in normalized order.
    pub fn iter(&self) -> impl Iterator<Item = &Camera> {
        self.cameras.iter().map(|c| &**c)
    }

    /// Identifiers in normalized order.
    pub fn ids(&self) -> impl Iterator<Item = &CameraId> {
        self.iter().map(|c| &c.identifier)
    }

    /// Total recordings across all cameras.
    pub fn recording_count(&self) -> usize {
        self.iter().map(Camera::recording_count).sum()
    }

    /// Insert or overwrite a camera, then re-normalize the whole registry.
    pub(crate) fn with_camera(&self, camera: Camera) -> Self {
        let mut cameras = self.cameras.clone();
        match self.index.get(&camera.identifier) {
            Some(&i) => cameras[i] = Arc::new(camera),
            None => cameras.push(Arc::new(camera)),
        }
        normalize(cameras, self.order)
    }

    /// Swap in a new version of an existing camera without reordering.
    /// Returns `None` when the camera is not registered.
    pub(crate) fn with_updated(&self, camera: Camera) -> Option<Self> {
        let &i = self.index.get(&camera.identifier)?;
        let mut cameras = self.cameras.clone();
        cameras[i] = Arc::new(camera);
        Some(Self {
            cameras,
            index: self.index.clone(),
            order: self.order,
        })
    }
}

/// Sort `cameras` with `order` and index them.
pub fn normalize(mut cameras: Vec<Arc<Camera>>, order: CameraOrder) -> Registry {
    cameras.sort_by(|a, b| order(a, b));
    let index = cameras
        .iter()
        .enumerate()
        .map(|(i, c)| (c.identifier.clone(), i))
        .collect();
    Registry {
        cameras,
        index,
        order,
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(by_identifier)
    }
}

impl PartialEq for Registry {
    fn eq(&self, other: &Self) -> bool {
        self.cameras == other.cameras
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.cameras.iter().map(|c| (&c.identifier, c)))
            .finish()
    }
}

/// Serializes as a JSON object keyed by identifier, in normalized order.
impl Serialize for Registry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cameras.len()))?;
        for camera in &self.cameras {
            map.serialize_entry(&camera.identifier, &**camera)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(registry: &Registry) -> Vec<&str> {
        registry.ids().map(CameraId::as_str).collect()
    }

    #[test]
    fn from_cameras_sorts_by_identifier() {
        let registry = Registry::from_cameras(
            [
                Camera::new("garage", "Garage"),
                Camera::new("back", "Back"),
                Camera::new("front", "Front"),
            ],
            by_identifier,
        );
        assert_eq!(ids(&registry), ["back", "front", "garage"]);
        assert_eq!(registry.get(&"front".into()).unwrap().name, "Front");
    }

    #[test]
    fn duplicate_identifiers_keep_last() {
        let registry = Registry::from_cameras(
            [Camera::new("cam1", "Old"), Camera::new("cam1", "New")],
            by_identifier,
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(&"cam1".into()).unwrap().name, "New");
    }

    #[test]
    fn custom_order_applies() {
        let registry = Registry::from_cameras(
            [Camera::new("a", "Zulu"), Camera::new("b", "Alpha")],
            by_name,
        );
        assert_eq!(ids(&registry), ["b", "a"]);
    }

    #[test]
    fn with_camera_leaves_original_untouched() {
        let before = Registry::from_cameras([Camera::new("b", "B")], by_identifier);
        let after = before.with_camera(Camera::new("a", "A"));
        assert_eq!(ids(&before), ["b"]);
        assert_eq!(ids(&after), ["a", "b"]);
        assert!(after.contains(&"a".into()));
        assert!(!before.contains(&"a".into()));
    }

    #[test]
    fn with_updated_requires_existing_camera() {
        let registry = Registry::default();
        assert!(registry.with_updated(Camera::new("x", "X")).is_none());
    }

    #[test]
    fn serializes_as_ordered_object() {
        let registry = Registry::from_cameras(
            [Camera::new("b", "B"), Camera::new("a", "A")],
            by_identifier,
        );
        let json = serde_json::to_string(&registry).unwrap();
        let a = json.find("\"a\"").unwrap();
        let b = json.find("\"b\"").unwrap();
        assert!(a < b, "{json}");
    }
}
