//! Transcode worker entity and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;
use crate::launcher::ProcessHandle;

/// Lifecycle state of a transcode worker.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
pub enum WorkerState {
    /// No process; initial state and terminal state on removal.
    #[default]
    Stopped,
    /// A launch is in flight.
    Starting,
    /// A process is live.
    Running,
    /// A termination is in flight.
    Stopping,
    /// The last launch or process failed.
    Failed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Failed => "Failed",
        }
    }

    /// Whether the worker currently owns (or is about to own) a process.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: WorkerState) -> bool {
        use WorkerState::*;

        matches!(
            (self, target),
            (Stopped, Starting)
                | (Starting, Running | Failed | Stopping)
                | (Running, Failed | Stopping)
                | (Failed, Starting | Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: WorkerState) -> Result<WorkerState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }
}

/// One supervised camera.
///
/// The worker exclusively owns at most one [`ProcessHandle`]. The handle has
/// to be taken out (and terminated) before a new one can be stored.
#[derive(Debug)]
pub struct TranscodeWorker {
    camera_id: String,
    state: WorkerState,
    process: Option<ProcessHandle>,
    /// Most recent failure description.
    pub last_error: Option<String>,
    /// Consecutive failures since the worker last ran stably.
    pub restart_count: u32,
    /// Last successful transition into `Running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Source used for the current or last launch.
    pub source_uri_snapshot: String,
    /// Bumped on every launch attempt and stop; stale async results compare
    /// against it and discard themselves.
    pub generation: u64,
    /// Automatic retries are exhausted.
    pub parked: bool,
    /// The camera left the inventory while an operation was in flight.
    pub removal_requested: bool,
}

impl TranscodeWorker {
    pub fn new(camera_id: impl Into<String>, source_uri: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            state: WorkerState::Stopped,
            process: None,
            last_error: None,
            restart_count: 0,
            started_at: None,
            source_uri_snapshot: source_uri.into(),
            generation: 0,
            parked: false,
            removal_requested: false,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Move to `target`, rejecting transitions the state machine forbids.
    pub fn transition(&mut self, target: WorkerState) -> Result<(), Error> {
        self.state = self.state.transition_to(target)?;
        Ok(())
    }

    /// Begin a launch attempt and return its generation.
    pub fn begin_launch(&mut self, source_uri: &str) -> Result<u64, Error> {
        self.transition(WorkerState::Starting)?;
        self.source_uri_snapshot = source_uri.to_string();
        self.parked = false;
        self.generation += 1;
        Ok(self.generation)
    }

    /// Record a successful launch.
    ///
    /// The failure count and last error are kept until the process proves
    /// stable, see [`TranscodeWorker::mark_stable`]. Fails if the worker still
    /// owns a process.
    pub fn mark_running(&mut self, handle: ProcessHandle) -> Result<(), Error> {
        if self.process.is_some() {
            return Err(Error::Other(format!(
                "worker {} already owns a process",
                self.camera_id
            )));
        }
        self.transition(WorkerState::Running)?;
        self.started_at = Some(handle.launched_at());
        self.process = Some(handle);
        Ok(())
    }

    /// Clear the failure count once the process has stayed up long enough.
    ///
    /// Returns `false` if the worker is not running.
    pub fn mark_stable(&mut self) -> bool {
        if self.state != WorkerState::Running {
            return false;
        }
        self.restart_count = 0;
        true
    }

    /// Record a launch error or an unexpected process exit.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> Result<(), Error> {
        self.transition(WorkerState::Failed)?;
        self.process = None;
        self.last_error = Some(error.into());
        self.restart_count = self.restart_count.saturating_add(1);
        Ok(())
    }

    /// Begin a stop and hand back the owned process, if any.
    pub fn begin_stop(&mut self) -> Result<Option<ProcessHandle>, Error> {
        self.transition(WorkerState::Stopping)?;
        self.generation += 1;
        Ok(self.process.take())
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        self.process.as_ref()
    }

    /// Take the owned process out of the worker without a state change.
    pub fn take_process(&mut self) -> Option<ProcessHandle> {
        self.process.take()
    }

    /// Read-only copy of the worker for reporting and diffing.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            camera_id: self.camera_id.clone(),
            state: self.state,
            last_error: self.last_error.clone(),
            restart_count: self.restart_count,
            started_at: self.started_at,
            source_uri: self.source_uri_snapshot.clone(),
            parked: self.parked,
            pid: self.process.as_ref().and_then(|p| p.pid()),
        }
    }
}

/// Point-in-time copy of a [`TranscodeWorker`] without its process handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSnapshot {
    pub camera_id: String,
    pub state: WorkerState,
    pub last_error: Option<String>,
    pub restart_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub source_uri: String,
    pub parked: bool,
    pub pid: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(WorkerState::Running.to_string(), "Running");
        assert_eq!(WorkerState::default(), WorkerState::Stopped);
    }

    #[test]
    fn test_valid_transitions() {
        use WorkerState::*;

        assert!(Stopped.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Starting.can_transition_to(Failed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Stopping));
        assert!(Failed.can_transition_to(Starting));
        assert!(Failed.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Stopped));
    }

    #[test]
    fn test_invalid_transitions() {
        use WorkerState::*;

        assert!(!Stopped.can_transition_to(Running));
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Starting));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Running.can_transition_to(Running));

        let err = Stopped.transition_to(Running).unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { ref from, ref to } if from == "Stopped" && to == "Running"));
    }

    #[test]
    fn test_worker_lifecycle() {
        let mut worker = TranscodeWorker::new("cam-1", "rtsp://a");
        assert_eq!(worker.state(), WorkerState::Stopped);

        let generation = worker.begin_launch("rtsp://a").unwrap();
        assert_eq!(generation, 1);

        worker.mark_failed("connection refused").unwrap();
        assert_eq!(worker.restart_count, 1);
        assert_eq!(worker.last_error.as_deref(), Some("connection refused"));

        worker.begin_launch("rtsp://a").unwrap();
        let (handle, _control) = ProcessHandle::new(Some(7));
        worker.mark_running(handle).unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        assert_eq!(worker.restart_count, 1);
        assert_eq!(worker.last_error.as_deref(), Some("connection refused"));
        assert!(worker.started_at.is_some());

        assert!(worker.mark_stable());
        assert_eq!(worker.restart_count, 0);
        assert_eq!(worker.last_error.as_deref(), Some("connection refused"));
        assert_eq!(worker.snapshot().pid, Some(7));

        let handle = worker.begin_stop().unwrap();
        assert!(handle.is_some());
        assert!(worker.process().is_none());
        worker.transition(WorkerState::Stopped).unwrap();
    }

    #[test]
    fn test_runtime_failure_clears_process() {
        let mut worker = TranscodeWorker::new("cam-1", "rtsp://a");
        worker.begin_launch("rtsp://a").unwrap();
        let (handle, _control) = ProcessHandle::new(None);
        worker.mark_running(handle).unwrap();

        worker.mark_failed("process exited with code 1").unwrap();
        assert!(worker.process().is_none());
        assert_eq!(worker.restart_count, 1);
        assert!(!worker.mark_stable());
        assert_eq!(worker.restart_count, 1);
    }

    #[test]
    fn test_crash_after_launch_keeps_counting() {
        let mut worker = TranscodeWorker::new("cam-1", "rtsp://a");
        for attempt in 1..=3 {
            worker.begin_launch("rtsp://a").unwrap();
            let (handle, _control) = ProcessHandle::new(None);
            worker.mark_running(handle).unwrap();
            worker.mark_failed(format!("process exited with code {}", attempt)).unwrap();
            assert_eq!(worker.restart_count, attempt);
        }
        assert_eq!(worker.last_error.as_deref(), Some("process exited with code 3"));
    }

    #[test]
    fn test_snapshot_tracks_source() {
        let mut worker = TranscodeWorker::new("cam-1", "rtsp://a");
        worker.begin_launch("rtsp://b").unwrap();
        let snapshot = worker.snapshot();
        assert_eq!(snapshot.source_uri, "rtsp://b");
        assert_eq!(snapshot.state, WorkerState::Starting);
    }
}
