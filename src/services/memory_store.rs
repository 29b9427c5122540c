use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobInput, JobStatus, JobUpdate};
use crate::services::job_store::{JobStore, StoreError};

/// In-process job store.
///
/// A single mutex serializes claims, which gives the same at-most-one-claimant
/// guarantee as the Postgres dequeue for workers sharing one process.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Job>,
    last_created: Option<DateTime<Utc>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every job, oldest first.
    pub fn snapshot(&self) -> Vec<Job> {
        let inner = self.lock();
        let mut jobs: Vec<Job> = inner.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| (a.created_at, &a.job_id).cmp(&(b.created_at, &b.job_id)));
        jobs
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, input: &JobInput) -> Result<Job, StoreError> {
        let mut inner = self.lock();
        if inner.jobs.contains_key(&input.job_id) {
            return Err(StoreError::Duplicate(input.job_id.clone()));
        }

        // Keep created_at strictly increasing so insertion order is queue order.
        let mut now = Utc::now();
        if let Some(last) = inner.last_created {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        inner.last_created = Some(now);

        let job = Job::queued(input, now);
        inner.jobs.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn fetch_oldest_queued(&self) -> Result<Option<Job>, StoreError> {
        let mut inner = self.lock();
        let oldest = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by(|a, b| (a.created_at, &a.job_id).cmp(&(b.created_at, &b.job_id)))
            .map(|j| j.job_id.clone());

        let Some(job_id) = oldest else {
            return Ok(None);
        };

        let Some(job) = inner.jobs.get_mut(&job_id) else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.progress = 0;
        job.claim_id = Some(Uuid::new_v4());
        job.attempts += 1;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<Job, StoreError> {
        let mut inner = self.lock();
        let current = inner
            .jobs
            .get(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        let mut job = current.clone();
        update.apply_to(&mut job, Utc::now())?;
        inner.jobs.insert(job_id.to_string(), job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(job_id).cloned())
    }

    async fn requeue_stale(&self, lease: Duration) -> Result<u64, StoreError> {
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let cutoff = now.checked_sub_signed(lease).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut inner = self.lock();
        let mut requeued = 0;
        for job in inner.jobs.values_mut() {
            if job.status == JobStatus::Processing && job.updated_at < cutoff {
                job.status = JobStatus::Queued;
                job.progress = 0;
                job.claim_id = None;
                job.updated_at = now;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        let inner = self.lock();
        let depth = inner
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .count();
        Ok(depth as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplicate_job_id_is_rejected() {
        let store = MemoryJobStore::new();
        store.enqueue(&JobInput::new("a1", "http://x/1.mp3")).await.unwrap();
        let err = store
            .enqueue(&JobInput::new("a1", "http://x/2.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(id) if id == "a1"));
    }

    #[tokio::test]
    async fn test_claim_issues_fresh_claim_id() {
        let store = MemoryJobStore::new();
        store.enqueue(&JobInput::new("a1", "http://x/1.mp3")).await.unwrap();

        let job = store.fetch_oldest_queued().await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.claim_id.is_some());
        assert_eq!(store.queue_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let store = MemoryJobStore::new();
        let err = store
            .update("missing", &JobUpdate::progress(10))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
