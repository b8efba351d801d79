//! Cancellation registry for import jobs
//!
//! Provides cooperative cancellation and RAII-based automatic cleanup via
//! `JobGuard`. The importer polls the job's token between rows.

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// RAII guard that removes the job from the registry when dropped.
/// Must be kept alive for the duration of job processing.
pub struct JobGuard {
    job_id: Uuid,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl JobGuard {
    /// Token to poll inside the processing loop
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}

/// Thread-safe registry of running jobs and their cancellation tokens
#[derive(Clone, Default)]
pub struct CancellationRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Hold the returned guard while the job runs.
    pub fn register(&self, job_id: Uuid) -> JobGuard {
        let token = CancellationToken::new();
        self.jobs.lock().insert(job_id, token.clone());
        JobGuard {
            job_id,
            token,
            registry: self.clone(),
        }
    }

    /// Cancel a running job. Returns `false` if the job is unknown
    /// (already finished or never started).
    pub fn cancel(&self, job_id: &Uuid) -> bool {
        match self.jobs.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn is_cancelled(&self, job_id: &Uuid) -> bool {
        self.jobs
            .lock()
            .get(job_id)
            .map_or(false, |token| token.is_cancelled())
    }

    /// Called by `JobGuard::drop`
    fn remove(&self, job_id: &Uuid) {
        self.jobs.lock().remove(job_id);
    }

    pub fn active_jobs(&self) -> usize {
        self.jobs.lock().len()
    }
}
