//! Worker registry.
//!
//! The registry is the single source of truth for which cameras the
//! orchestrator currently supervises. Every access goes through one
//! `parking_lot::Mutex`, and the lock is never held across an `.await`:
//! callers read or update under the lock, release it, perform any launcher
//! I/O, then lock again to record the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::domain::{TranscodeWorker, WorkerSnapshot};

/// Shared map from camera id to worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerRegistry {
    inner: Arc<Mutex<HashMap<String, TranscodeWorker>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the whole map.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut HashMap<String, TranscodeWorker>) -> R) -> R {
        let mut workers = self.inner.lock();
        f(&mut workers)
    }

    /// Run `f` on one worker, if it exists.
    pub fn update<R>(&self, camera_id: &str, f: impl FnOnce(&mut TranscodeWorker) -> R) -> Option<R> {
        let mut workers = self.inner.lock();
        workers.get_mut(camera_id).map(f)
    }

    /// Consistent copy of every worker, taken under a single lock.
    pub fn snapshot(&self) -> Vec<WorkerSnapshot> {
        self.inner
            .lock()
            .values()
            .map(TranscodeWorker::snapshot)
            .collect()
    }

    /// Copy of one worker.
    pub fn get(&self, camera_id: &str) -> Option<WorkerSnapshot> {
        self.inner.lock().get(camera_id).map(TranscodeWorker::snapshot)
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.inner.lock().contains_key(camera_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Ids of every registered worker.
    pub fn ids(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn remove(&self, camera_id: &str) -> Option<TranscodeWorker> {
        self.inner.lock().remove(camera_id)
    }
}
