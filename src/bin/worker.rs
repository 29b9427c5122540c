use std::sync::Arc;

use aura_worker::{
    config::AppConfig,
    db,
    services::{
        analyzer::RemoteAnalyzer,
        job_store::PgJobStore,
        worker::{Worker, WorkerSettings},
    },
    shutdown,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting analysis poll worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let database_url = config
        .require_database_url()
        .expect("Worker requires a job store");
    let db_pool = db::init_pool(database_url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let analyzer = RemoteAnalyzer::init(&config.analyzer_url, config.analyzer_timeout())
        .expect("Failed to initialize analyzer client");

    let worker = Worker::new(
        Arc::new(PgJobStore::new(db_pool)),
        Arc::new(analyzer),
        WorkerSettings::from_config(&config),
    );

    worker.run(shutdown::token()).await;
}
