//! In-process launcher that never spawns anything.
//!
//! Each "process" is a [`ProcessControl`] kept in memory. Failures, crashes
//! and slow launches can be scripted per camera, which makes the launcher
//! useful for dry runs of a deployment and for exercising the supervisor.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::handle::{ProcessControl, ProcessExit, ProcessHandle};
use super::{ProcessLauncher, StopOutcome, WorkerSpec};
use crate::Result;

#[derive(Debug, Default)]
struct ScriptState {
    /// Cameras whose launches fail, with the error to report.
    failing: HashMap<String, String>,
    /// Cameras whose processes ignore stop requests.
    unresponsive: HashSet<String>,
    /// Live virtual processes by camera id.
    live: HashMap<String, ProcessControl>,
    /// Every launch attempt, in order: (camera_id, source_uri).
    launches: Vec<(String, String)>,
    /// Termination count by camera id.
    terminations: HashMap<String, usize>,
    /// Artificial latency of each launch call.
    launch_delay: Duration,
}

/// Launcher whose processes only exist in memory.
#[derive(Debug, Default)]
pub struct ScriptedLauncher {
    state: Mutex<ScriptState>,
    next_pid: AtomicU32,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            next_pid: AtomicU32::new(10_000),
        }
    }

    /// Make every future launch for `camera_id` fail with `reason`.
    pub fn fail_launches_for(&self, camera_id: &str, reason: impl Into<String>) {
        self.state
            .lock()
            .failing
            .insert(camera_id.to_string(), reason.into());
    }

    /// Let launches for `camera_id` succeed again.
    pub fn clear_failures_for(&self, camera_id: &str) {
        self.state.lock().failing.remove(camera_id);
    }

    /// Make processes for `camera_id` ignore graceful stop requests.
    pub fn set_unresponsive(&self, camera_id: &str) {
        self.state.lock().unresponsive.insert(camera_id.to_string());
    }

    /// Delay every launch call by `delay`.
    pub fn set_launch_delay(&self, delay: Duration) {
        self.state.lock().launch_delay = delay;
    }

    /// Simulate the live process for `camera_id` exiting on its own.
    ///
    /// Returns `false` if no process is live for the camera.
    pub fn crash(&self, camera_id: &str, exit_code: i32) -> bool {
        let control = self.state.lock().live.remove(camera_id);
        match control {
            Some(control) => {
                info!(camera_id = %camera_id, exit_code, "Simulating process crash");
                control.notify_exit(ProcessExit::Exited(exit_code));
                true
            }
            None => false,
        }
    }

    /// Number of launch attempts made for `camera_id`.
    pub fn launch_count(&self, camera_id: &str) -> usize {
        self.state
            .lock()
            .launches
            .iter()
            .filter(|(id, _)| id == camera_id)
            .count()
    }

    /// Number of launch attempts across all cameras.
    pub fn total_launches(&self) -> usize {
        self.state.lock().launches.len()
    }

    /// Sources used by each launch attempt for `camera_id`, oldest first.
    pub fn launched_sources(&self, camera_id: &str) -> Vec<String> {
        self.state
            .lock()
            .launches
            .iter()
            .filter(|(id, _)| id == camera_id)
            .map(|(_, source)| source.clone())
            .collect()
    }

    /// Number of terminations requested for `camera_id`.
    pub fn terminate_count(&self, camera_id: &str) -> usize {
        self.state
            .lock()
            .terminations
            .get(camera_id)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a virtual process is live for `camera_id`.
    pub fn is_live(&self, camera_id: &str) -> bool {
        self.state.lock().live.contains_key(camera_id)
    }

    /// Number of live virtual processes.
    pub fn live_count(&self) -> usize {
        self.state.lock().live.len()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn launch(&self, spec: &WorkerSpec) -> Result<ProcessHandle> {
        let delay = {
            let mut state = self.state.lock();
            state
                .launches
                .push((spec.camera_id.clone(), spec.source_uri.clone()));
            state.launch_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(reason) = state.failing.get(&spec.camera_id) {
            return Err(crate::Error::launch(reason.clone()));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::Relaxed);
        let (handle, control) = ProcessHandle::new(Some(pid));
        debug!(camera_id = %spec.camera_id, pid, "Launched virtual process");

        // A previous process that was never terminated is treated as gone.
        if let Some(previous) = state.live.insert(spec.camera_id.clone(), control) {
            previous.notify_exit(ProcessExit::Lost("replaced".to_string()));
        }

        Ok(handle)
    }

    async fn terminate(&self, handle: ProcessHandle, timeout: Duration) -> Result<StopOutcome> {
        let (camera_id, unresponsive) = {
            let mut state = self.state.lock();
            let camera_id = state
                .live
                .iter()
                .find(|(_, control)| handle_matches(control, &handle))
                .map(|(id, _)| id.clone());
            if let Some(ref id) = camera_id {
                *state.terminations.entry(id.clone()).or_insert(0) += 1;
            }
            let unresponsive = camera_id
                .as_ref()
                .is_some_and(|id| state.unresponsive.contains(id));
            (camera_id, unresponsive)
        };

        let Some(camera_id) = camera_id else {
            // Already exited; nothing left to stop.
            return Ok(StopOutcome::Graceful);
        };

        if unresponsive {
            tokio::time::sleep(timeout).await;
        }

        let control = self.state.lock().live.remove(&camera_id);
        let outcome = if unresponsive {
            StopOutcome::Forced
        } else {
            StopOutcome::Graceful
        };
        if let Some(control) = control {
            control.notify_exit(if unresponsive {
                ProcessExit::Killed
            } else {
                ProcessExit::Terminated
            });
        }

        Ok(outcome)
    }
}

/// A control belongs to a handle when stopping through the handle reaches it.
fn handle_matches(control: &ProcessControl, handle: &ProcessHandle) -> bool {
    control.process_id() == handle.id()
}
