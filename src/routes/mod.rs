use axum::routing::{delete, get, post};
use axum::Router;

use crate::app_state::AppState;

pub mod analyze;
pub mod auth;
pub mod health;
pub mod metrics;

/// Gateway routes without transport layers or the metrics endpoint.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/analyze", post(analyze::submit_analysis))
        .route("/analyze/{job_id}", delete(analyze::cancel_analysis))
        .with_state(state)
}
