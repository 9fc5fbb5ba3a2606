//! Opaque handle to a launched transcoder process.
//!
//! A launcher hands a [`ProcessHandle`] to the worker that owns the process and
//! keeps the matching [`ProcessControl`] in whatever task watches the real
//! child. The two halves talk through cancellation tokens (stop/kill requests)
//! and a watch channel (exit notification).

use std::fmt;
use std::io;
use std::process::ExitStatus;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How a transcoder process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// Process exited with the given code.
    Exited(i32),
    /// Process was ended by a signal nobody on our side sent.
    Signalled,
    /// Process stopped after we asked it to.
    Terminated,
    /// Process had to be killed.
    Killed,
    /// The process could no longer be observed.
    Lost(String),
}

impl ProcessExit {
    /// Classify the result of waiting on a child.
    pub fn from_wait(status: io::Result<ExitStatus>) -> Self {
        match status {
            Ok(status) => match status.code() {
                Some(code) => ProcessExit::Exited(code),
                None => ProcessExit::Signalled,
            },
            Err(e) => ProcessExit::Lost(e.to_string()),
        }
    }

    /// Whether the exit was requested by the orchestrator.
    pub fn is_requested(&self) -> bool {
        matches!(self, ProcessExit::Terminated | ProcessExit::Killed)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessExit::Exited(code) => write!(f, "exited with code {}", code),
            ProcessExit::Signalled => write!(f, "killed by signal"),
            ProcessExit::Terminated => write!(f, "terminated"),
            ProcessExit::Killed => write!(f, "killed"),
            ProcessExit::Lost(reason) => write!(f, "lost: {}", reason),
        }
    }
}

/// Result of stopping a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopOutcome {
    /// Process acknowledged the stop request in time.
    Graceful,
    /// Process was force-terminated or abandoned after the timeout.
    Forced,
}

/// Owning reference to one external process.
///
/// Not `Clone`: a worker owns at most one live handle, and the handle must be
/// given back to the launcher to terminate the process.
#[derive(Debug)]
pub struct ProcessHandle {
    id: String,
    pid: Option<u32>,
    launched_at: DateTime<Utc>,
    stop: CancellationToken,
    kill: CancellationToken,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

/// Launcher-side half of a [`ProcessHandle`].
#[derive(Debug)]
pub struct ProcessControl {
    id: String,
    stop: CancellationToken,
    kill: CancellationToken,
    exit_tx: watch::Sender<Option<ProcessExit>>,
}

impl ProcessHandle {
    /// Create a connected handle/control pair.
    pub fn new(pid: Option<u32>) -> (Self, ProcessControl) {
        let stop = CancellationToken::new();
        let kill = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);
        let id = uuid::Uuid::new_v4().to_string();

        let handle = Self {
            id: id.clone(),
            pid,
            launched_at: Utc::now(),
            stop: stop.clone(),
            kill: kill.clone(),
            exit_rx,
        };
        let control = ProcessControl {
            id,
            stop,
            kill,
            exit_tx,
        };

        (handle, control)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn launched_at(&self) -> DateTime<Utc> {
        self.launched_at
    }

    /// Exit of the process, if it has already ended.
    pub fn exit_status(&self) -> Option<ProcessExit> {
        self.exit_rx.borrow().clone()
    }

    /// Watcher that resolves when the process ends. Does not hold the handle.
    pub fn exit_watcher(&self) -> ExitWatcher {
        ExitWatcher {
            rx: self.exit_rx.clone(),
        }
    }

    /// Ask the process to stop gracefully.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Ask the launcher to kill the process immediately.
    pub fn force_kill(&self) {
        self.kill_switch().kill();
    }

    /// Kill trigger that stays usable after the handle is given away.
    pub fn kill_switch(&self) -> KillSwitch {
        KillSwitch {
            stop: self.stop.clone(),
            kill: self.kill.clone(),
        }
    }

    /// Wait for the process to end.
    pub async fn wait(&self) -> ProcessExit {
        self.exit_watcher().wait().await
    }
}

impl ProcessControl {
    /// Id of the handle this control belongs to.
    pub fn process_id(&self) -> &str {
        &self.id
    }

    /// Resolves once a graceful stop has been requested.
    pub async fn stop_requested(&self) {
        self.stop.cancelled().await
    }

    /// Resolves once a kill has been requested.
    pub async fn kill_requested(&self) {
        self.kill.cancelled().await
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Publish the process exit. Later notifications are ignored.
    pub fn notify_exit(&self, exit: ProcessExit) {
        self.exit_tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(exit);
                true
            } else {
                false
            }
        });
    }
}

/// Detached kill request for a process whose handle may already be gone.
#[derive(Debug, Clone)]
pub struct KillSwitch {
    stop: CancellationToken,
    kill: CancellationToken,
}

impl KillSwitch {
    pub fn kill(&self) {
        self.stop.cancel();
        self.kill.cancel();
    }
}

/// Future-like view on a process exit, detached from the owning handle.
#[derive(Debug, Clone)]
pub struct ExitWatcher {
    rx: watch::Receiver<Option<ProcessExit>>,
}

impl ExitWatcher {
    /// Wait for the exit. A dropped [`ProcessControl`] counts as a lost process.
    pub async fn wait(mut self) -> ProcessExit {
        loop {
            if let Some(exit) = self.rx.borrow_and_update().clone() {
                return exit;
            }
            if self.rx.changed().await.is_err() {
                return self
                    .rx
                    .borrow()
                    .clone()
                    .unwrap_or_else(|| ProcessExit::Lost("process monitor went away".to_string()));
            }
        }
    }
}
