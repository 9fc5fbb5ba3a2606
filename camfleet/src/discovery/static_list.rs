//! Fixed in-memory inventory.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::CameraDiscoveryProvider;
use crate::Result;
use crate::domain::CameraDescriptor;

/// Inventory held in memory. The list can be replaced at runtime.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    cameras: RwLock<Vec<CameraDescriptor>>,
    failure: RwLock<Option<String>>,
}

impl StaticDiscovery {
    pub fn new(cameras: Vec<CameraDescriptor>) -> Self {
        Self {
            cameras: RwLock::new(cameras),
            failure: RwLock::new(None),
        }
    }

    /// Replace the inventory returned by later queries.
    pub fn set_cameras(&self, cameras: Vec<CameraDescriptor>) {
        *self.cameras.write() = cameras;
    }

    /// Make later queries fail with `reason` until cleared.
    pub fn set_failure(&self, reason: Option<String>) {
        *self.failure.write() = reason;
    }
}

#[async_trait]
impl CameraDiscoveryProvider for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        if let Some(reason) = self.failure.read().as_ref() {
            return Err(crate::Error::discovery(reason.clone()));
        }
        Ok(self.cameras.read().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_cameras_and_failure() {
        let discovery = StaticDiscovery::new(vec![CameraDescriptor::new("cam-1", "rtsp://a")]);
        assert_eq!(discovery.list_cameras().await.unwrap().len(), 1);

        discovery.set_cameras(Vec::new());
        assert!(discovery.list_cameras().await.unwrap().is_empty());

        discovery.set_failure(Some("inventory offline".to_string()));
        assert!(matches!(
            discovery.list_cameras().await,
            Err(crate::Error::Discovery(_))
        ));

        discovery.set_failure(None);
        assert!(discovery.list_cameras().await.is_ok());
    }
}
