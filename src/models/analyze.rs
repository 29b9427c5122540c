use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{JobInput, JobStatus};

/// Body of `POST /analyze`.
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[garde(length(min = 1, max = 128))]
    pub job_id: String,

    #[garde(url, custom(http_scheme))]
    pub audio_url: String,

    #[garde(length(max = 100_000))]
    pub lyrics_text: Option<String>,

    #[garde(length(max = 500))]
    pub reference_track: Option<String>,
}

fn http_scheme(value: &str, _ctx: &()) -> garde::Result {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(garde::Error::new("audio URL must use http or https"))
    }
}

impl AnalyzeRequest {
    pub fn into_input(self) -> JobInput {
        JobInput {
            job_id: self.job_id,
            audio_url: self.audio_url,
            lyrics_text: self.lyrics_text.filter(|t| !t.trim().is_empty()),
            reference_track: self.reference_track.filter(|t| !t.trim().is_empty()),
        }
    }
}

/// Acknowledgement returned before the job runs.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    pub job_id: String,
    pub status: JobStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
