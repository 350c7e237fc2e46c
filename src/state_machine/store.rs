//! In-memory job registry shared by workers, status queries and retention.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::job::{Job, JobStatusReport};
use crate::error::JobError;

/// Cloneable handle to the job registry.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) {
        self.jobs.write().await.insert(job.id.clone(), job);
    }

    /// Snapshot of a job.
    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn status(&self, id: &str) -> Result<JobStatusReport, JobError> {
        self.jobs
            .read()
            .await
            .get(id)
            .map(Job::report)
            .ok_or_else(|| JobError::NotFound(id.to_string()))
    }

    /// Applies `f` to the job under the write lock.
    pub async fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Job) -> T,
    ) -> Result<T, JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        Ok(f(job))
    }

    /// Evicts terminal jobs created more than `horizon` before `now`.
    ///
    /// Jobs still pending or processing stay regardless of age, so a worker
    /// never loses the entry it is writing to. Returns the evicted ids; in
    /// dry-run mode nothing is removed but the same ids are returned.
    pub async fn remove_expired(
        &self,
        now: DateTime<Utc>,
        horizon: Duration,
        dry_run: bool,
    ) -> Vec<String> {
        let mut jobs = self.jobs.write().await;
        let expired: Vec<String> = jobs
            .values()
            .filter(|job| job.status().is_terminal() && is_older_than(job, now, horizon))
            .map(|job| job.id.clone())
            .collect();

        if !dry_run {
            for id in &expired {
                jobs.remove(id);
                debug!(job_id = %id, "Evicted expired job");
            }
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.jobs.read().await.keys().cloned().collect()
    }

    /// Ids of jobs that have not reached a terminal state.
    pub async fn active(&self) -> Vec<String> {
        self.jobs
            .read()
            .await
            .values()
            .filter(|job| !job.status().is_terminal())
            .map(|job| job.id.clone())
            .collect()
    }
}

/// Negative ages (clock skew) count as young.
fn is_older_than(job: &Job, now: DateTime<Utc>, horizon: Duration) -> bool {
    (now - job.created_at)
        .to_std()
        .is_ok_and(|age| age > horizon)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::JobStatus;

    fn finished_job(age_days: i64, status: JobStatus) -> Job {
        let mut job = Job::new("in.png", "out");
        job.created_at = Utc::now() - chrono::Duration::days(age_days);
        if status != JobStatus::Pending {
            job.transition(JobStatus::Processing).unwrap();
        }
        if status.is_terminal() {
            job.transition(status).unwrap();
        }
        job
    }

    #[tokio::test]
    async fn update_and_status_roundtrip() {
        let store = JobStore::new();
        let job = Job::new("in.png", "out");
        let id = job.id.clone();
        store.insert(job).await;

        store
            .update(&id, |job| {
                job.transition(JobStatus::Processing)?;
                job.set_progress("Processing 1 page(s)...");
                Ok::<_, JobError>(())
            })
            .await
            .unwrap()
            .unwrap();

        let report = store.status(&id).await.unwrap();
        assert_eq!(report.status, JobStatus::Processing);
        assert_eq!(report.progress, "Processing 1 page(s)...");
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let store = JobStore::new();
        assert!(matches!(store.status("nope").await, Err(JobError::NotFound(_))));
        assert!(store.update("nope", |_| ()).await.is_err());
    }

    #[tokio::test]
    async fn expired_terminal_jobs_are_evicted() {
        let store = JobStore::new();
        let old = finished_job(10, JobStatus::Completed);
        let young = finished_job(1, JobStatus::Failed);
        let (old_id, young_id) = (old.id.clone(), young.id.clone());
        store.insert(old).await;
        store.insert(young).await;

        let horizon = Duration::from_secs(7 * 86_400);
        let removed = store.remove_expired(Utc::now(), horizon, false).await;
        assert_eq!(removed, vec![old_id.clone()]);
        assert!(store.get(&old_id).await.is_none());
        assert!(store.get(&young_id).await.is_some());
    }

    #[tokio::test]
    async fn active_jobs_survive_the_horizon() {
        let store = JobStore::new();
        let running = finished_job(30, JobStatus::Processing);
        let waiting = finished_job(30, JobStatus::Pending);
        store.insert(running).await;
        store.insert(waiting).await;

        let removed = store
            .remove_expired(Utc::now(), Duration::from_secs(86_400), false)
            .await;
        assert!(removed.is_empty());
        assert_eq!(store.len().await, 2);
        assert_eq!(store.active().await.len(), 2);
    }

    #[tokio::test]
    async fn dry_run_reports_without_removing() {
        let store = JobStore::new();
        store.insert(finished_job(10, JobStatus::Completed)).await;

        let horizon = Duration::from_secs(86_400);
        let dry = store.remove_expired(Utc::now(), horizon, true).await;
        assert_eq!(store.len().await, 1);
        let live = store.remove_expired(Utc::now(), horizon, false).await;
        assert_eq!(dry, live);
        assert!(store.is_empty().await);
    }
}
