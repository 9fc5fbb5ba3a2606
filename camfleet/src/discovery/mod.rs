//! Camera discovery providers.
//!
//! A provider only lists what it knows about. Filtering disabled cameras and
//! resolving duplicate ids happens in the reconciler.

mod file;
mod http;
mod static_list;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::DiscoveryConfig;
use crate::domain::CameraDescriptor;
use crate::{Error, Result};

pub use file::FileDiscovery;
pub use http::HttpDiscovery;
pub use static_list::StaticDiscovery;

/// Source of the current camera inventory.
#[async_trait]
pub trait CameraDiscoveryProvider: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// List every camera the provider currently knows about.
    async fn list_cameras(&self) -> Result<Vec<CameraDescriptor>>;
}

/// Inventory documents are either a bare array or wrapped in `{"cameras": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Inventory {
    List(Vec<CameraDescriptor>),
    Wrapped { cameras: Vec<CameraDescriptor> },
}

/// Parse a JSON inventory document.
pub fn parse_inventory(raw: &str) -> Result<Vec<CameraDescriptor>> {
    let inventory: Inventory = serde_json::from_str(raw)
        .map_err(|e| Error::discovery(format!("malformed inventory: {}", e)))?;
    Ok(match inventory {
        Inventory::List(cameras) => cameras,
        Inventory::Wrapped { cameras } => cameras,
    })
}

/// Build the provider selected by configuration.
pub fn from_config(config: &DiscoveryConfig) -> Result<Arc<dyn CameraDiscoveryProvider>> {
    Ok(match config {
        DiscoveryConfig::Static { cameras } => Arc::new(StaticDiscovery::new(cameras.clone())),
        DiscoveryConfig::File { path } => Arc::new(FileDiscovery::new(path.clone())),
        DiscoveryConfig::Http { url, timeout_secs } => Arc::new(HttpDiscovery::new(
            url.clone(),
            std::time::Duration::from_secs(*timeout_secs),
        )?),
    })
}
