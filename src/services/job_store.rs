use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::db::queries;
use crate::lifecycle::LifecycleError;
use crate::models::job::{Job, JobInput, JobUpdate};

/// Durable storage of analysis jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `queued` job.
    async fn enqueue(&self, input: &JobInput) -> Result<Job, StoreError>;

    /// Claim the oldest `queued` job, flipping it to `processing`.
    ///
    /// No two concurrent callers ever receive the same job.
    async fn fetch_oldest_queued(&self) -> Result<Option<Job>, StoreError>;

    /// Apply a partial update and return the updated row.
    async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<Job, StoreError>;

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Return `processing` jobs untouched for longer than `lease` to the queue.
    async fn requeue_stale(&self, lease: Duration) -> Result<u64, StoreError>;

    async fn queue_depth(&self) -> Result<i64, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} already exists")]
    Duplicate(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Postgres-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, input: &JobInput) -> Result<Job, StoreError> {
        queries::insert_job(&self.pool, input).await.map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::Duplicate(input.job_id.clone())
            }
            other => StoreError::Database(other),
        })
    }

    async fn fetch_oldest_queued(&self) -> Result<Option<Job>, StoreError> {
        Ok(queries::claim_oldest_queued(&self.pool, Uuid::new_v4()).await?)
    }

    async fn update(&self, job_id: &str, update: &JobUpdate) -> Result<Job, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut job = queries::lock_job(&mut *tx, job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        // Rejected updates roll back when `tx` drops.
        update.apply_to(&mut job, Utc::now())?;

        let saved = queries::save_job(&mut *tx, &job).await?;
        tx.commit().await?;
        Ok(saved)
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        Ok(queries::get_job(&self.pool, job_id).await?)
    }

    async fn requeue_stale(&self, lease: Duration) -> Result<u64, StoreError> {
        Ok(queries::requeue_stale(&self.pool, lease).await?)
    }

    async fn queue_depth(&self) -> Result<i64, StoreError> {
        Ok(queries::count_queued(&self.pool).await?)
    }
}
