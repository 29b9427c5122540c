use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an analysis job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Inputs handed to the analysis adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobInput {
    pub job_id: String,
    pub audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lyrics_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_track: Option<String>,
}

impl JobInput {
    pub fn new(job_id: impl Into<String>, audio_url: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            audio_url: audio_url.into(),
            lyrics_text: None,
            reference_track: None,
        }
    }
}

/// A persisted analysis job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: i32,

    pub audio_url: String,
    pub lyrics_text: Option<String>,
    pub reference_track: Option<String>,

    pub hit_factor: Option<i32>,
    pub audio_score: Option<i32>,
    pub lyrics_score: Option<i32>,
    pub brand_score: Option<i32>,
    pub market_score: Option<i32>,
    pub recommendations: Option<serde_json::Value>,
    pub similar_hits: Option<serde_json::Value>,
    pub full_report: Option<serde_json::Value>,
    pub model_version: Option<String>,
    /// Milliseconds.
    pub processing_time: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    /// Fencing token issued on each claim.
    pub claim_id: Option<Uuid>,
    pub attempts: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// A fresh `queued` row for the given inputs.
    pub fn queued(input: &JobInput, now: DateTime<Utc>) -> Self {
        Self {
            job_id: input.job_id.clone(),
            status: JobStatus::Queued,
            progress: 0,
            audio_url: input.audio_url.clone(),
            lyrics_text: input.lyrics_text.clone(),
            reference_track: input.reference_track.clone(),
            hit_factor: None,
            audio_score: None,
            lyrics_score: None,
            brand_score: None,
            market_score: None,
            recommendations: None,
            similar_hits: None,
            full_report: None,
            model_version: None,
            processing_time: None,
            completed_at: None,
            error_message: None,
            claim_id: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn input(&self) -> JobInput {
        JobInput {
            job_id: self.job_id.clone(),
            audio_url: self.audio_url.clone(),
            lyrics_text: self.lyrics_text.clone(),
            reference_track: self.reference_track.clone(),
        }
    }
}

/// Result columns written together with the `completed` flip.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResultFields {
    pub hit_factor: i32,
    pub audio_score: i32,
    pub lyrics_score: i32,
    pub brand_score: i32,
    pub market_score: i32,
    pub recommendations: serde_json::Value,
    pub similar_hits: serde_json::Value,
    pub full_report: serde_json::Value,
    pub model_version: String,
    pub processing_time: i64,
}

/// Partial update of a job row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<i32>,
    pub result: Option<JobResultFields>,
    pub error_message: Option<String>,
    /// When set, the update only applies while the row still carries this claim.
    pub claim_id: Option<Uuid>,
}

impl JobUpdate {
    pub fn progress(progress: i32) -> Self {
        Self {
            status: Some(JobStatus::Processing),
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Refreshes `updated_at` on a `processing` row without touching progress.
    pub fn heartbeat() -> Self {
        Self {
            status: Some(JobStatus::Processing),
            ..Default::default()
        }
    }

    pub fn completed(result: JobResultFields) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_claim(mut self, claim_id: Option<Uuid>) -> Self {
        self.claim_id = claim_id;
        self
    }
}
