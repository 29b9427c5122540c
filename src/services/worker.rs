use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::services::analyzer::AnalysisAdapter;
use crate::services::executor::{self, ExecutionOptions, JobOutcome};
use crate::services::job_store::{JobStore, StoreError};
use crate::services::sink::StoreSink;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    /// Reclaim `processing` rows idle for longer than this.
    pub lease: Option<Duration>,
    pub job_timeout: Option<Duration>,
}

impl WorkerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            lease: config.job_lease(),
            job_timeout: config.job_timeout(),
        }
    }

    /// A claimed job refreshes its lease this often, so a live job never
    /// looks stale however long the adapter stays silent.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.lease.map(|lease| lease / 3)
    }
}

/// Polls the job store and runs one claimed job at a time.
pub struct Worker {
    store: Arc<dyn JobStore>,
    adapter: Arc<dyn AnalysisAdapter>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        adapter: Arc<dyn AnalysisAdapter>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            adapter,
            settings,
        }
    }

    /// Run until `shutdown` fires. A job in flight is finished first.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            lease_secs = self.settings.lease.map(|l| l.as_secs()),
            "Worker ready, starting job processing loop"
        );

        while !shutdown.is_cancelled() {
            match self.process_next_job().await {
                Ok(Some(_)) => {
                    // Job processed, continue immediately
                    tracing::debug!("Job processed, checking for next job");
                    continue;
                }
                Ok(None) => {
                    tracing::trace!("No jobs available, sleeping");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error polling job queue, will retry");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.settings.poll_interval) => {}
            }
        }

        tracing::info!("Worker stopped");
    }

    /// Claim and run the next queued job.
    /// Returns `Ok(None)` if the queue is empty.
    pub async fn process_next_job(&self) -> Result<Option<JobOutcome>, StoreError> {
        if let Some(lease) = self.settings.lease {
            let requeued = self.store.requeue_stale(lease).await?;
            if requeued > 0 {
                tracing::warn!(requeued, "Requeued jobs with expired lease");
            }
        }

        let job = match self.store.fetch_oldest_queued().await? {
            Some(job) => job,
            None => return Ok(None),
        };

        metrics::counter!("analysis_jobs_claimed_total").increment(1);
        tracing::info!(
            job_id = %job.job_id,
            audio_url = %job.audio_url,
            attempt = job.attempts,
            "Processing analysis job"
        );

        let sink = Arc::new(StoreSink::new(self.store.clone(), job.claim_id));
        let options = ExecutionOptions {
            timeout: self.settings.job_timeout,
            cancel: CancellationToken::new(),
            heartbeat: self.settings.heartbeat_interval(),
        };
        let outcome =
            executor::execute_job(job.input(), self.adapter.clone(), sink, options).await;

        Ok(Some(outcome))
    }
}
