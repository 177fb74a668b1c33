use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use chrono::Utc;
use shared::{
    domain::{JobId, JobState},
    protocol::JobRecord,
};
use tokio::sync::RwLock;

/// Finished jobs kept for `GET /jobs` before the oldest are dropped.
pub const DEFAULT_JOB_HISTORY: usize = 100;

/// In-memory record of background executions. Nothing survives a restart.
///
/// Queued and running jobs are always kept; finished ones are evicted in the
/// order they finished once more than `history` of them exist.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RwLock<Registry>>,
    history: usize,
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, JobRecord>,
    finished: VecDeque<JobId>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_history(DEFAULT_JOB_HISTORY)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Registry::default())),
            history,
        }
    }

    pub async fn insert(&self, record: JobRecord) {
        let mut registry = self.inner.write().await;
        let job_id = record.job_id;
        let finished = record.state.is_terminal();
        registry.jobs.insert(job_id, record);
        if finished {
            registry.finish(job_id, self.history);
        }
    }

    pub async fn get(&self, job_id: JobId) -> Option<JobRecord> {
        self.inner.read().await.jobs.get(&job_id).cloned()
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let mut jobs: Vec<JobRecord> = self.inner.read().await.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    pub async fn mark_running(&self, job_id: JobId) {
        self.update(job_id, |job| {
            job.state = JobState::Running;
            job.started_at = Some(Utc::now());
        })
        .await;
    }

    pub async fn mark_succeeded(&self, job_id: JobId) {
        self.update(job_id, |job| {
            job.state = JobState::Succeeded;
            job.finished_at = Some(Utc::now());
        })
        .await;
    }

    pub async fn mark_failed(&self, job_id: JobId, error: impl Into<String>) {
        let error = error.into();
        self.update(job_id, |job| {
            job.state = JobState::Failed;
            job.error = Some(error);
            job.finished_at = Some(Utc::now());
        })
        .await;
    }

    async fn update(&self, job_id: JobId, apply: impl FnOnce(&mut JobRecord)) {
        let mut registry = self.inner.write().await;
        let Some(job) = registry.jobs.get_mut(&job_id) else {
            return;
        };
        let was_terminal = job.state.is_terminal();
        apply(job);
        if !was_terminal && job.state.is_terminal() {
            registry.finish(job_id, self.history);
        }
    }
}

impl Registry {
    fn finish(&mut self, job_id: JobId, history: usize) {
        self.finished.push_back(job_id);
        while self.finished.len() > history {
            if let Some(evicted) = self.finished.pop_front() {
                self.jobs.remove(&evicted);
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/jobs_tests.rs"]
mod tests;
