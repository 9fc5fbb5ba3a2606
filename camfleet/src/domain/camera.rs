//! Camera descriptor as returned by discovery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Identity and connection info for one discoverable video source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraDescriptor {
    /// Stable unique identifier.
    pub id: String,
    /// Opaque connection string handed to the transcoder (e.g. an RTSP URL).
    #[serde(alias = "source_uri", alias = "url")]
    pub source_uri: String,
    /// Disabled cameras are treated as not discovered.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl CameraDescriptor {
    /// Create an enabled descriptor.
    pub fn new(id: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_uri: source_uri.into(),
            enabled: true,
        }
    }

    /// Mark the descriptor as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// A descriptor can only be supervised if it has both an id and a source.
    pub fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty() && !self.source_uri.trim().is_empty()
    }
}

/// Reduce a discovery result to the cameras that should have a worker.
///
/// Disabled and malformed descriptors are dropped. When an id appears more
/// than once the last occurrence wins. Output order follows first appearance.
pub fn desired_cameras(discovered: Vec<CameraDescriptor>) -> Vec<CameraDescriptor> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, CameraDescriptor> = HashMap::new();

    for camera in discovered {
        if !camera.is_well_formed() {
            warn!(camera_id = %camera.id, "Ignoring malformed camera descriptor");
            continue;
        }
        if let Some(previous) = by_id.get(&camera.id) {
            if previous != &camera {
                warn!(camera_id = %camera.id, "Duplicate camera id in discovery, keeping the last one");
            }
        } else {
            order.push(camera.id.clone());
        }
        by_id.insert(camera.id.clone(), camera);
    }

    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .filter(|camera| camera.enabled)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_defaults_enabled() {
        let camera: CameraDescriptor =
            serde_json::from_str(r#"{"id":"cam-1","sourceUri":"rtsp://a"}"#).unwrap();
        assert_eq!(camera, CameraDescriptor::new("cam-1", "rtsp://a"));
    }

    #[test]
    fn test_deserialize_aliases() {
        let camera: CameraDescriptor =
            serde_json::from_str(r#"{"id":"cam-1","url":"rtsp://a","enabled":false}"#).unwrap();
        assert_eq!(camera.source_uri, "rtsp://a");
        assert!(!camera.enabled);

        let camera: CameraDescriptor =
            serde_json::from_str(r#"{"id":"cam-2","source_uri":"rtsp://b"}"#).unwrap();
        assert_eq!(camera.source_uri, "rtsp://b");
    }

    #[test]
    fn test_desired_cameras_filters_disabled_and_malformed() {
        let desired = desired_cameras(vec![
            CameraDescriptor::new("cam-1", "rtsp://a"),
            CameraDescriptor::new("cam-2", "rtsp://b").disabled(),
            CameraDescriptor::new("", "rtsp://c"),
            CameraDescriptor::new("cam-4", "  "),
        ]);

        assert_eq!(desired.len(), 1);
        assert_eq!(desired[0].id, "cam-1");
    }

    #[test]
    fn test_desired_cameras_last_duplicate_wins() {
        let desired = desired_cameras(vec![
            CameraDescriptor::new("cam-1", "rtsp://a"),
            CameraDescriptor::new("cam-2", "rtsp://b"),
            CameraDescriptor::new("cam-1", "rtsp://z"),
        ]);

        assert_eq!(desired.len(), 2);
        assert_eq!(desired[0], CameraDescriptor::new("cam-1", "rtsp://z"));
        assert_eq!(desired[1].id, "cam-2");
    }

    #[test]
    fn test_desired_cameras_later_disable_removes_camera() {
        let desired = desired_cameras(vec![
            CameraDescriptor::new("cam-1", "rtsp://a"),
            CameraDescriptor::new("cam-1", "rtsp://a").disabled(),
        ]);
        assert!(desired.is_empty());
    }
}
