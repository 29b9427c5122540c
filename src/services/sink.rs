use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::analysis::AnalysisResult;
use crate::lifecycle::LifecycleError;
use crate::models::job::JobUpdate;
use crate::services::control_plane::CallbackError;
use crate::services::job_store::{JobStore, StoreError};

/// Destination for a job's lifecycle writes.
///
/// The poll path writes into the job store; the HTTP path notifies the
/// control plane. The executor drives both the same way.
#[async_trait]
pub trait JobSink: Send + Sync {
    async fn progress(&self, job_id: &str, progress: i32) -> Result<(), SinkError>;

    async fn complete(
        &self,
        job_id: &str,
        result: &AnalysisResult,
        elapsed: Duration,
    ) -> Result<(), SinkError>;

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), SinkError>;

    /// Keep the job's claim alive while the adapter runs.
    async fn heartbeat(&self, _job_id: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Callback(#[from] CallbackError),

    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SinkError {
    /// The job was reclaimed by another worker after its lease expired.
    pub fn is_lease_lost(&self) -> bool {
        matches!(
            self,
            SinkError::Store(StoreError::Lifecycle(LifecycleError::LeaseLost { .. }))
        )
    }

    /// Whether repeating the same write could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SinkError::Store(StoreError::Database(_)) => true,
            SinkError::Store(_) => false,
            SinkError::Callback(_) => true,
            SinkError::Serialize(_) => false,
        }
    }
}

/// Writes lifecycle updates into the job store under the worker's claim.
pub struct StoreSink {
    store: Arc<dyn JobStore>,
    claim_id: Option<Uuid>,
}

impl StoreSink {
    pub fn new(store: Arc<dyn JobStore>, claim_id: Option<Uuid>) -> Self {
        Self { store, claim_id }
    }
}

#[async_trait]
impl JobSink for StoreSink {
    async fn progress(&self, job_id: &str, progress: i32) -> Result<(), SinkError> {
        let update = JobUpdate::progress(progress).with_claim(self.claim_id);
        self.store.update(job_id, &update).await?;
        Ok(())
    }

    async fn complete(
        &self,
        job_id: &str,
        result: &AnalysisResult,
        elapsed: Duration,
    ) -> Result<(), SinkError> {
        let fields = result.to_result_fields(elapsed)?;
        let update = JobUpdate::completed(fields).with_claim(self.claim_id);
        self.store.update(job_id, &update).await?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), SinkError> {
        let update = JobUpdate::failed(error).with_claim(self.claim_id);
        self.store.update(job_id, &update).await?;
        Ok(())
    }

    async fn heartbeat(&self, job_id: &str) -> Result<(), SinkError> {
        let update = JobUpdate::heartbeat().with_claim(self.claim_id);
        self.store.update(job_id, &update).await?;
        Ok(())
    }
}
