use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::models::analysis::AnalysisResult;
use crate::services::sink::{JobSink, SinkError};

/// Client for the control plane's job callback endpoints.
pub struct ControlPlaneClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressCallback<'a> {
    job_id: &'a str,
    progress: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteCallback<'a> {
    job_id: &'a str,
    result: &'a AnalysisResult,
    /// Milliseconds.
    processing_time: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorCallback<'a> {
    job_id: &'a str,
    error: &'a str,
}

impl ControlPlaneClient {
    pub fn new(
        base_url: &str,
        token: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, CallbackError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
        })
    }

    async fn post<T: Serialize + Sync>(&self, endpoint: &str, body: &T) -> Result<(), CallbackError> {
        let url = format!("{}/{}", self.base_url, endpoint);

        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallbackError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobSink for ControlPlaneClient {
    async fn progress(&self, job_id: &str, progress: i32) -> Result<(), SinkError> {
        self.post("progress", &ProgressCallback { job_id, progress })
            .await?;
        Ok(())
    }

    async fn complete(
        &self,
        job_id: &str,
        result: &AnalysisResult,
        elapsed: Duration,
    ) -> Result<(), SinkError> {
        let body = CompleteCallback {
            job_id,
            result,
            processing_time: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        };
        self.post("complete", &body).await?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<(), SinkError> {
        self.post("error", &ErrorCallback { job_id, error }).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Control plane rejected {endpoint} callback with status {status}")]
    Status { endpoint: String, status: u16 },
}
