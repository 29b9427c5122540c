use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::error::ApiError;
use crate::models::analyze::{AnalyzeRequest, AnalyzeResponse, CancelResponse};
use crate::models::job::JobStatus;
use crate::routes::auth::authorize;
use crate::services::executor::{self, ExecutionOptions};

/// POST /analyze: accept a job and run it in the background.
///
/// The response never waits for the analysis; its outcome reaches the
/// control plane through the progress/complete/error callbacks.
pub async fn submit_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AnalyzeResponse>), ApiError> {
    authorize(&headers, state.worker_secret.as_deref())?;

    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    request
        .validate()
        .map_err(|report| ApiError::BadRequest(report.to_string()))?;

    let input = request.into_input();
    let job_id = input.job_id.clone();

    let adapter = state.adapter.clone();
    let sink = state.sink.clone();
    let timeout = state.job_timeout;
    state
        .tasks
        .spawn(&job_id, move |cancel| async move {
            let options = ExecutionOptions {
                timeout,
                cancel,
                heartbeat: None,
            };
            executor::execute_job(input, adapter, sink, options).await;
        })
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    metrics::counter!("analysis_jobs_accepted_total").increment(1);
    tracing::info!(job_id = %job_id, "Analysis job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeResponse {
            job_id,
            status: JobStatus::Queued,
        }),
    ))
}

/// DELETE /analyze/{job_id}: ask a running job to stop.
pub async fn cancel_analysis(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<(StatusCode, Json<CancelResponse>), ApiError> {
    authorize(&headers, state.worker_secret.as_deref())?;

    if !state.tasks.cancel(&job_id) {
        return Err(ApiError::NotFound(format!("job {job_id} is not running")));
    }

    tracing::info!(job_id = %job_id, "Cancellation requested");
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id,
            cancelled: true,
        }),
    ))
}
