use async_trait::async_trait;
use garde::Validate;
use reqwest::Client;
use std::time::Duration;

use crate::models::analysis::AnalysisResult;
use crate::models::job::JobInput;
use crate::services::progress::ProgressReporter;

/// The unit of work both ingestion paths run for a job.
#[async_trait]
pub trait AnalysisAdapter: Send + Sync {
    /// Analyze a track, reporting progress as the stages advance.
    async fn run(
        &self,
        input: &JobInput,
        progress: ProgressReporter,
    ) -> Result<AnalysisResult, AnalysisError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Analyzer returned status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Analyzer returned an invalid result: {0}")]
    InvalidResult(String),

    #[error("{0}")]
    Failed(String),
}

/// Client for the external analysis service.
///
/// Built once at process start and shared by every job through
/// `Arc<dyn AnalysisAdapter>`.
pub struct RemoteAnalyzer {
    http: Client,
    endpoint: String,
}

/// Longest error body kept from a rejected analyzer call.
const MAX_ERROR_BODY: usize = 512;

impl RemoteAnalyzer {
    pub fn init(endpoint: &str, timeout: Duration) -> Result<Self, AnalysisError> {
        let http = Client::builder().timeout(timeout).build()?;
        tracing::info!(endpoint = %endpoint, "Analyzer client initialized");
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }
}

#[async_trait]
impl AnalysisAdapter for RemoteAnalyzer {
    async fn run(
        &self,
        input: &JobInput,
        progress: ProgressReporter,
    ) -> Result<AnalysisResult, AnalysisError> {
        progress.report(5);

        let response = self.http.post(&self.endpoint).json(input).send().await?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(AnalysisError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let result: AnalysisResult = response.json().await?;
        result
            .validate()
            .map_err(|report| AnalysisError::InvalidResult(report.to_string()))?;

        progress.report(95);

        tracing::debug!(
            job_id = %input.job_id,
            hit_factor = result.hit_factor,
            model_version = %result.model_version,
            "Analyzer returned result"
        );

        Ok(result)
    }
}
