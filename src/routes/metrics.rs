use axum::extract::State;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;

/// Install the global Prometheus recorder and register the job metrics.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    metrics::describe_counter!("analysis_jobs_accepted_total", "Jobs accepted by the gateway");
    metrics::describe_counter!("analysis_jobs_claimed_total", "Jobs claimed from the job store");
    metrics::describe_counter!("analysis_jobs_completed_total", "Jobs that completed");
    metrics::describe_counter!("analysis_jobs_failed_total", "Jobs that failed");
    metrics::describe_histogram!(
        "analysis_processing_seconds",
        "Wall time from job start to terminal state"
    );
    metrics::describe_gauge!("analysis_active_tasks", "Gateway jobs currently running");

    Ok(handle)
}

/// `GET /metrics` in Prometheus text exposition format.
pub fn router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(Arc::new(handle))
}

async fn render(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
