//! Job lifecycle state machine.
//!
//! `queued → processing → completed | failed`. Terminal states are final.
//! A `processing` job may only go back to `queued` when its lease expires.
//!
//! Every store implementation applies updates through [`JobUpdate::apply_to`],
//! so the transition rules live here and nowhere else.

use chrono::{DateTime, Utc};

use crate::models::job::{Job, JobStatus, JobUpdate};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("job {job_id} is already {status}")]
    AlreadyTerminal { job_id: String, status: JobStatus },

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("job {job_id} is no longer held by this claim")]
    LeaseLost { job_id: String },

    #[error("completion of job {job_id} carries no result")]
    MissingResult { job_id: String },
}

/// Whether `from -> to` is an allowed edge (self-loops included).
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    use JobStatus::*;
    matches!(
        (from, to),
        (Queued, Queued)
            | (Queued, Processing)
            | (Processing, Processing)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Processing, Queued)
    )
}

pub fn clamp_progress(percent: i32) -> i32 {
    percent.clamp(0, 100)
}

impl JobUpdate {
    /// Apply this update to an in-memory row, enforcing the lifecycle rules.
    ///
    /// On error the row is left untouched.
    pub fn apply_to(&self, job: &mut Job, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if job.status.is_terminal() {
            return Err(LifecycleError::AlreadyTerminal {
                job_id: job.job_id.clone(),
                status: job.status,
            });
        }

        if let Some(claim) = self.claim_id {
            if job.claim_id != Some(claim) {
                return Err(LifecycleError::LeaseLost {
                    job_id: job.job_id.clone(),
                });
            }
        }

        let from = job.status;
        let to = self.status.unwrap_or(from);
        if !can_transition(from, to) {
            return Err(LifecycleError::InvalidTransition { from, to });
        }

        match to {
            JobStatus::Queued => {
                if from == JobStatus::Processing {
                    job.progress = 0;
                    job.claim_id = None;
                }
            }
            JobStatus::Processing => {
                if from == JobStatus::Queued {
                    job.progress = 0;
                }
                if let Some(percent) = self.progress {
                    job.progress = job.progress.max(clamp_progress(percent));
                }
            }
            JobStatus::Completed => {
                let result = self.result.as_ref().ok_or_else(|| LifecycleError::MissingResult {
                    job_id: job.job_id.clone(),
                })?;
                job.hit_factor = Some(result.hit_factor);
                job.audio_score = Some(result.audio_score);
                job.lyrics_score = Some(result.lyrics_score);
                job.brand_score = Some(result.brand_score);
                job.market_score = Some(result.market_score);
                job.recommendations = Some(result.recommendations.clone());
                job.similar_hits = Some(result.similar_hits.clone());
                job.full_report = Some(result.full_report.clone());
                job.model_version = Some(result.model_version.clone());
                job.processing_time = Some(result.processing_time);
                job.completed_at = Some(now);
                job.progress = 100;
            }
            JobStatus::Failed => {
                // progress keeps the value reached before the error
                let message = self
                    .error_message
                    .as_deref()
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .unwrap_or("unknown error");
                job.error_message = Some(message.to_string());
            }
        }

        job.status = to;
        job.updated_at = now;
        Ok(())
    }
}

/// Filters progress reports down to a clamped, strictly increasing sequence.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last: Option<i32>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value to publish, or `None` if it would not advance progress.
    pub fn observe(&mut self, percent: i32) -> Option<i32> {
        let percent = clamp_progress(percent);
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }

    pub fn last(&self) -> Option<i32> {
        self.last
    }
}
