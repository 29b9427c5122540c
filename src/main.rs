use std::sync::Arc;
use std::time::Duration;

use aura_worker::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{analyzer::RemoteAnalyzer, control_plane::ControlPlaneClient},
    shutdown,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

/// How long running jobs get to report their outcome after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing analysis gateway");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    let analyzer = RemoteAnalyzer::init(&config.analyzer_url, config.analyzer_timeout())
        .expect("Failed to initialize analyzer client");

    let control_plane_url = config
        .require_control_plane_url()
        .expect("Gateway requires a control plane");
    tracing::info!(control_plane = %control_plane_url, "Initializing control plane client");
    let control_plane = ControlPlaneClient::new(
        control_plane_url,
        config.control_plane_token(),
        config.callback_timeout(),
    )
    .expect("Failed to initialize control plane client");

    if config.worker_secret().is_none() {
        tracing::warn!("WORKER_SECRET not set, accepting unauthenticated submissions");
    }

    let state = AppState::new(
        Arc::new(analyzer),
        Arc::new(control_plane),
        config.worker_secret().map(str::to_string),
        config.job_timeout(),
    );
    let tasks = state.tasks.clone();

    let app = routes::router(state)
        .merge(routes::metrics::router(prometheus_handle))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Gateway listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await
        .expect("Server error");

    let running = tasks.len();
    if running > 0 {
        tracing::info!(running, "Cancelling running jobs");
        tasks.cancel_all();
        if !tasks.drain(SHUTDOWN_GRACE).await {
            tracing::warn!(remaining = tasks.len(), "Jobs still running at exit");
        }
    }

    tracing::info!("Gateway stopped");
}
