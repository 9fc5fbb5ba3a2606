//! JSON inventory file.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{CameraDiscoveryProvider, parse_inventory};
use crate::domain::CameraDescriptor;
use crate::{Error, Result};

/// Reads the inventory file on every query, so edits are picked up by the
/// next discovery tick.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    path: PathBuf,
}

impl FileDiscovery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CameraDiscoveryProvider for FileDiscovery {
    fn name(&self) -> &str {
        "file"
    }

    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::discovery(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        let cameras = parse_inventory(&raw)?;
        debug!(path = %self.path.display(), "Read {} cameras from inventory file", cameras.len());
        Ok(cameras)
    }
}
