//! Transcoder process launchers.
//!
//! The orchestrator never talks to processes directly: it asks a
//! [`ProcessLauncher`] to start one for a camera and receives an opaque
//! [`ProcessHandle`] back. The same launcher terminates the handle later.

mod ffmpeg;
mod handle;
mod scripted;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::config::{LauncherConfig, LauncherKind};

pub use ffmpeg::FfmpegLauncher;
pub use handle::{
    ExitWatcher, KillSwitch, ProcessControl, ProcessExit, ProcessHandle, StopOutcome,
};
pub use scripted::ScriptedLauncher;

/// Everything a launcher needs to start one worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    /// Camera the process transcodes.
    pub camera_id: String,
    /// Source the process reads from.
    pub source_uri: String,
}

impl WorkerSpec {
    pub fn new(camera_id: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            source_uri: source_uri.into(),
        }
    }
}

/// Starts and terminates external transcoding processes.
///
/// Both operations may block on I/O and may fail; callers never hold the
/// worker registry lock across them.
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Start a process for the given worker.
    async fn launch(&self, spec: &WorkerSpec) -> Result<ProcessHandle>;

    /// Terminate a process, waiting at most `timeout` for it to acknowledge.
    ///
    /// Implementations force-terminate past the timeout when they can and
    /// report [`StopOutcome::Forced`].
    async fn terminate(&self, handle: ProcessHandle, timeout: Duration) -> Result<StopOutcome>;
}

/// Shared stop sequence for handle-based launchers.
///
/// Requests a graceful stop, waits up to `timeout`, then requests a kill and
/// waits up to `kill_wait` for the monitor to confirm.
pub(crate) async fn stop_handle(
    handle: &ProcessHandle,
    timeout: Duration,
    kill_wait: Duration,
) -> Result<StopOutcome> {
    if handle.exit_status().is_some() {
        return Ok(StopOutcome::Graceful);
    }

    handle.request_stop();
    match tokio::time::timeout(timeout, handle.wait()).await {
        Ok(ProcessExit::Killed) => Ok(StopOutcome::Forced),
        Ok(_) => Ok(StopOutcome::Graceful),
        Err(_) => {
            handle.force_kill();
            match tokio::time::timeout(kill_wait, handle.wait()).await {
                Ok(_) => Ok(StopOutcome::Forced),
                Err(_) => Err(crate::Error::termination(format!(
                    "process {} did not exit after kill",
                    handle.id()
                ))),
            }
        }
    }
}

/// Build the launcher selected by configuration.
pub fn from_config(config: &LauncherConfig) -> Arc<dyn ProcessLauncher> {
    match config.kind {
        LauncherKind::Ffmpeg => Arc::new(FfmpegLauncher::new(config.clone())),
        LauncherKind::DryRun => Arc::new(ScriptedLauncher::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_handle_graceful() {
        let (handle, control) = ProcessHandle::new(None);
        tokio::spawn(async move {
            control.stop_requested().await;
            control.notify_exit(ProcessExit::Terminated);
        });

        let outcome = stop_handle(&handle, Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_stop_handle_forces_unresponsive_process() {
        let (handle, control) = ProcessHandle::new(None);
        tokio::spawn(async move {
            // Ignores the polite request, only reacts to the kill.
            control.kill_requested().await;
            control.notify_exit(ProcessExit::Killed);
        });

        let outcome = stop_handle(&handle, Duration::from_millis(20), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Forced);
    }

    #[tokio::test]
    async fn test_stop_handle_already_exited() {
        let (handle, control) = ProcessHandle::new(None);
        control.notify_exit(ProcessExit::Exited(1));

        let outcome = stop_handle(&handle, Duration::from_millis(10), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Graceful);
    }

    #[tokio::test]
    async fn test_stop_handle_gives_up_on_hung_process() {
        let (handle, _control) = ProcessHandle::new(None);
        let result =
            stop_handle(&handle, Duration::from_millis(10), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(crate::Error::Termination(_))));
    }
}
