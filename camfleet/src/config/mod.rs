//! Orchestrator configuration.
//!
//! Configuration is read from an optional JSON file. Every field has a
//! default, so an empty object (or no file at all) is a valid configuration.
//! A handful of environment variables override file values so deployments can
//! point the same file at different inventories and binaries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{CameraDescriptor, RetryPolicy};
use crate::{Error, Result};

/// Default log filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "camfleet=info,process_utils=info";

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Period of the status tick.
    pub status_interval_secs: u64,
    /// Period of the discovery tick.
    pub discovery_interval_secs: u64,
    /// Maximum launches in flight at once. 0 disables the limit.
    pub max_concurrent_starts: usize,
    /// How long a single worker may take to acknowledge a stop.
    pub stop_timeout_secs: u64,
    /// Upper bound for a full shutdown.
    pub shutdown_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub launcher: LauncherConfig,
    pub discovery: DiscoveryConfig,
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: 5,
            discovery_interval_secs: 120,
            max_concurrent_starts: 4,
            stop_timeout_secs: 10,
            shutdown_timeout_secs: 30,
            retry: RetryPolicy::default(),
            launcher: LauncherConfig::default(),
            discovery: DiscoveryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load configuration from `path` (if any), apply environment overrides
    /// and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::config(format!("failed to read {}: {}", path.display(), e))
                })?;
                Self::from_json(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::config(format!("invalid configuration: {}", e)))
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = lookup("CAMFLEET_DISCOVERY_FILE") {
            debug!(path = %path, "Discovery file overridden from environment");
            self.discovery = DiscoveryConfig::File {
                path: PathBuf::from(path),
            };
        }
        if let Some(url) = lookup("CAMFLEET_DISCOVERY_URL") {
            debug!(url = %url, "Discovery URL overridden from environment");
            let timeout_secs = match &self.discovery {
                DiscoveryConfig::Http { timeout_secs, .. } => *timeout_secs,
                _ => default_http_timeout_secs(),
            };
            self.discovery = DiscoveryConfig::Http { url, timeout_secs };
        }
        if let Some(binary) = lookup("CAMFLEET_FFMPEG").or_else(|| lookup("FFMPEG_PATH")) {
            self.launcher.binary_path = binary;
        }
        if let Some(dir) = lookup("CAMFLEET_OUTPUT_DIR") {
            self.launcher.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("CAMFLEET_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
    }

    /// Reject configurations the orchestrator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.status_interval_secs == 0 {
            return Err(Error::config("status_interval_secs must be greater than 0"));
        }
        if self.discovery_interval_secs == 0 {
            return Err(Error::config("discovery_interval_secs must be greater than 0"));
        }
        if self.discovery_interval_secs < self.status_interval_secs {
            return Err(Error::config(
                "discovery_interval_secs must not be shorter than status_interval_secs",
            ));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(Error::config(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config("retry.backoff_multiplier must be at least 1.0"));
        }
        if self.launcher.kind == LauncherKind::Ffmpeg {
            if self.launcher.binary_path.trim().is_empty() {
                return Err(Error::config("launcher.binary_path must not be empty"));
            }
            if !self.launcher.args.iter().any(|arg| arg.contains("{source}")) {
                return Err(Error::config(
                    "launcher.args must contain a {source} placeholder",
                ));
            }
        }
        if let DiscoveryConfig::Http { url, timeout_secs } = &self.discovery {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::config(format!("discovery url is not http(s): {}", url)));
            }
            if *timeout_secs == 0 {
                return Err(Error::config("discovery timeout_secs must be greater than 0"));
            }
        }
        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Which launcher implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherKind {
    /// Spawn real ffmpeg processes.
    #[default]
    Ffmpeg,
    /// Keep processes in memory only; nothing is spawned.
    DryRun,
}

/// Transcoder launcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub kind: LauncherKind,
    /// Executable to spawn.
    pub binary_path: String,
    /// Argument template. `{source}`, `{camera_id}` and `{output_dir}` are
    /// substituted per worker.
    pub args: Vec<String>,
    /// Root directory for per-camera outputs.
    pub output_dir: PathBuf,
    /// Extra environment for spawned processes.
    pub env: HashMap<String, String>,
    /// Grace period between the quit request and a kill.
    pub stop_grace_secs: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            kind: LauncherKind::Ffmpeg,
            binary_path: "ffmpeg".to_string(),
            args: default_ffmpeg_args(),
            output_dir: PathBuf::from("./streams"),
            env: HashMap::new(),
            stop_grace_secs: 5,
        }
    }
}

impl LauncherConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

/// RTSP over TCP, remuxed into a rolling HLS playlist.
fn default_ffmpeg_args() -> Vec<String> {
    [
        "-hide_banner",
        "-loglevel",
        "warning",
        "-nostats",
        "-rtsp_transport",
        "tcp",
        "-i",
        "{source}",
        "-c",
        "copy",
        "-f",
        "hls",
        "-hls_time",
        "4",
        "-hls_list_size",
        "6",
        "-hls_flags",
        "delete_segments",
        "{output_dir}/index.m3u8",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_http_timeout_secs() -> u64 {
    10
}

/// Where the camera inventory comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryConfig {
    /// Fixed inventory embedded in the configuration.
    Static {
        #[serde(default)]
        cameras: Vec<CameraDescriptor>,
    },
    /// JSON inventory file, re-read on every query.
    File { path: PathBuf },
    /// JSON inventory served over HTTP.
    Http {
        url: String,
        #[serde(default = "default_http_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig::Static {
            cameras: Vec::new(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Directory for daily-rolling log files. Console only when unset.
    pub log_dir: Option<PathBuf>,
    /// Emit JSON lines on the console.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            log_dir: None,
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = OrchestratorConfig::from_json("{}").unwrap();
        assert_eq!(config, OrchestratorConfig::default());
        assert_eq!(config.status_interval(), Duration::from_secs(5));
        assert_eq!(config.discovery_interval(), Duration::from_secs(120));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_document() {
        let raw = r#"{
            "status_interval_secs": 2,
            "discovery_interval_secs": 60,
            "max_concurrent_starts": 0,
            "retry": { "max_restarts": 3, "initial_delay_ms": 500 },
            "launcher": { "kind": "dry_run" },
            "discovery": {
                "type": "static",
                "cameras": [
                    { "id": "cam-1", "sourceUri": "rtsp://a" },
                    { "id": "cam-2", "url": "rtsp://b", "enabled": false }
                ]
            },
            "logging": { "json": true }
        }"#;

        let config = OrchestratorConfig::from_json(raw).unwrap();
        assert_eq!(config.status_interval_secs, 2);
        assert_eq!(config.max_concurrent_starts, 0);
        assert_eq!(config.retry.max_restarts, 3);
        assert_eq!(config.retry.initial_delay_ms, 500);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(config.launcher.kind, LauncherKind::DryRun);
        assert!(config.logging.json);
        assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);

        let DiscoveryConfig::Static { cameras } = &config.discovery else {
            panic!("expected static discovery");
        };
        assert_eq!(cameras.len(), 2);
        assert_eq!(cameras[1].source_uri, "rtsp://b");
        assert!(!cameras[1].enabled);
    }

    #[test]
    fn test_http_discovery_timeout_default() {
        let config = OrchestratorConfig::from_json(
            r#"{ "discovery": { "type": "http", "url": "http://inventory/cameras" } }"#,
        )
        .unwrap();
        assert_eq!(
            config.discovery,
            DiscoveryConfig::Http {
                url: "http://inventory/cameras".to_string(),
                timeout_secs: 10,
            }
        );
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let result = OrchestratorConfig::from_json("{ not json");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = OrchestratorConfig::default();
        config.apply_env_overrides_from(env_from(&[
            ("CAMFLEET_DISCOVERY_URL", "https://inventory.local/cameras"),
            ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("CAMFLEET_OUTPUT_DIR", "/srv/streams"),
            ("CAMFLEET_LOG_DIR", "/var/log/camfleet"),
        ]));

        assert!(matches!(
            config.discovery,
            DiscoveryConfig::Http { ref url, timeout_secs: 10 } if url == "https://inventory.local/cameras"
        ));
        assert_eq!(config.launcher.binary_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.launcher.output_dir, PathBuf::from("/srv/streams"));
        assert_eq!(config.logging.log_dir, Some(PathBuf::from("/var/log/camfleet")));
    }

    #[test]
    fn test_env_overrides_prefer_specific_binary_and_ignore_blank() {
        let mut config = OrchestratorConfig::default();
        config.apply_env_overrides_from(env_from(&[
            ("CAMFLEET_FFMPEG", "/usr/local/bin/ffmpeg"),
            ("FFMPEG_PATH", "/opt/ffmpeg"),
            ("CAMFLEET_DISCOVERY_FILE", "  "),
        ]));
        assert_eq!(config.launcher.binary_path, "/usr/local/bin/ffmpeg");
        assert_eq!(config.discovery, DiscoveryConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = OrchestratorConfig {
            status_interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.status_interval_secs = 30;
        config.discovery_interval_secs = 10;
        assert!(config.validate().is_err());

        config.discovery_interval_secs = 60;
        config.retry.initial_delay_ms = 120_000;
        assert!(config.validate().is_err());

        config.retry.initial_delay_ms = 1000;
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());

        config.retry.backoff_multiplier = 2.0;
        config.launcher.args = vec!["-i".to_string(), "rtsp://fixed".to_string()];
        assert!(config.validate().is_err());

        config.launcher.kind = LauncherKind::DryRun;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camfleet.json");
        std::fs::write(&path, r#"{ "stop_timeout_secs": 3 }"#).unwrap();

        let config = OrchestratorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.stop_timeout(), Duration::from_secs(3));

        let missing = dir.path().join("missing.json");
        assert!(matches!(
            OrchestratorConfig::load(Some(&missing)),
            Err(Error::Configuration(_))
        ));
    }
}
