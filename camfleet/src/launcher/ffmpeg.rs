//! FFmpeg transcoder launcher.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

use super::handle::{ProcessExit, ProcessHandle};
use super::{ProcessLauncher, StopOutcome, WorkerSpec, stop_handle};
use crate::Result;
use crate::config::LauncherConfig;

/// Input written to ffmpeg's stdin to make it finalize outputs and quit.
const FFMPEG_QUIT_INPUT: &[u8] = b"q\n";

/// How long to wait for the monitor after a kill request.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Launches one ffmpeg process per camera.
pub struct FfmpegLauncher {
    /// Launcher configuration.
    config: LauncherConfig,
}

impl FfmpegLauncher {
    pub fn new(config: LauncherConfig) -> Self {
        Self { config }
    }

    /// Directory the camera's outputs are written to.
    pub fn output_dir_for(&self, camera_id: &str) -> PathBuf {
        self.config.output_dir.join(sanitize_path_component(camera_id))
    }

    /// Expand the configured argument template for one worker.
    fn build_args(&self, spec: &WorkerSpec, output_dir: &Path) -> Vec<String> {
        let output_dir = output_dir.to_string_lossy();
        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{source}", &spec.source_uri)
                    .replace("{camera_id}", &spec.camera_id)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }
}

/// Make a camera id safe to use as a single directory name.
fn sanitize_path_component(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '_') {
        format!("camera_{}", sanitized.len())
    } else {
        sanitized
    }
}

#[async_trait]
impl ProcessLauncher for FfmpegLauncher {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn launch(&self, spec: &WorkerSpec) -> Result<ProcessHandle> {
        let output_dir = self.output_dir_for(&spec.camera_id);
        tokio::fs::create_dir_all(&output_dir).await.map_err(|e| {
            crate::Error::launch(format!(
                "failed to create output directory {}: {}",
                output_dir.display(),
                e
            ))
        })?;

        let args = self.build_args(spec, &output_dir);
        info!(
            camera_id = %spec.camera_id,
            binary = %self.config.binary_path,
            "Starting ffmpeg with args: {:?}",
            args
        );

        let mut child = process_utils::tokio_command(&self.config.binary_path)
            .args(&args)
            .envs(self.config.env.iter())
            .env("LC_ALL", "C") // Force consistent output
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                crate::Error::launch(format!(
                    "failed to spawn {}: {}",
                    self.config.binary_path, e
                ))
            })?;

        let (handle, control) = ProcessHandle::new(child.id());

        if let Some(stderr) = child.stderr.take() {
            let camera_id = spec.camera_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            if line.contains("Error") || line.contains("error") {
                                warn!(camera_id = %camera_id, "ffmpeg: {}", line);
                            } else {
                                debug!(camera_id = %camera_id, "ffmpeg: {}", line);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!(camera_id = %camera_id, "Stopped reading ffmpeg output: {}", e);
                            break;
                        }
                    }
                }
            });
        }

        let grace = self.config.stop_grace();
        let camera_id = spec.camera_id.clone();
        tokio::spawn(async move {
            let exit = tokio::select! {
                status = child.wait() => ProcessExit::from_wait(status),
                _ = control.stop_requested() => {
                    tokio::select! {
                        result = process_utils::stop_child(&mut child, Some(FFMPEG_QUIT_INPUT), grace) => {
                            match result {
                                Ok(stop) if stop.was_forced() => ProcessExit::Killed,
                                Ok(_) => ProcessExit::Terminated,
                                Err(e) => {
                                    error!(camera_id = %camera_id, "Error stopping ffmpeg: {}", e);
                                    ProcessExit::Lost(e.to_string())
                                }
                            }
                        }
                        _ = control.kill_requested() => {
                            if let Err(e) = child.kill().await {
                                error!(camera_id = %camera_id, "Error killing ffmpeg: {}", e);
                            }
                            ProcessExit::Killed
                        }
                    }
                }
            };

            if !exit.is_requested() {
                warn!(camera_id = %camera_id, "ffmpeg {}", exit);
            } else {
                debug!(camera_id = %camera_id, "ffmpeg {}", exit);
            }
            control.notify_exit(exit);
        });

        Ok(handle)
    }

    async fn terminate(&self, handle: ProcessHandle, timeout: Duration) -> Result<StopOutcome> {
        debug!(process_id = %handle.id(), pid = ?handle.pid(), "Terminating ffmpeg");
        stop_handle(&handle, timeout, KILL_CONFIRM_TIMEOUT).await
    }
}
