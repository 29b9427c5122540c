use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Gateway bind address (e.g., "0.0.0.0:8000"). Unused by the poll worker.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string. Required by the poll worker.
    pub database_url: Option<String>,

    /// Sleep between polls when the queue is empty or the store is unreachable.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// `processing` rows untouched for this long are returned to the queue.
    pub job_lease_secs: Option<u64>,

    /// Deadline for a single analysis run.
    pub job_timeout_secs: Option<u64>,

    /// Shared secret expected as a bearer token on the gateway.
    pub worker_secret: Option<String>,

    /// Base URL of the control plane receiving progress/complete/error callbacks.
    pub control_plane_url: Option<String>,

    /// Bearer token sent with control plane callbacks.
    pub control_plane_token: Option<String>,

    #[serde(default = "default_callback_timeout_secs")]
    pub callback_timeout_secs: u64,

    /// Analysis service endpoint.
    pub analyzer_url: String,

    #[serde(default = "default_analyzer_timeout_secs")]
    pub analyzer_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_callback_timeout_secs() -> u64 {
    10
}

fn default_analyzer_timeout_secs() -> u64 {
    600
}

/// Treats unset and empty variables alike.
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Ok(envy::from_env()?)
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        non_empty(&self.database_url).ok_or(ConfigError::Missing("DATABASE_URL"))
    }

    pub fn require_control_plane_url(&self) -> Result<&str, ConfigError> {
        non_empty(&self.control_plane_url).ok_or(ConfigError::Missing("CONTROL_PLANE_URL"))
    }

    pub fn worker_secret(&self) -> Option<&str> {
        non_empty(&self.worker_secret)
    }

    pub fn control_plane_token(&self) -> Option<&str> {
        non_empty(&self.control_plane_token)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_lease(&self) -> Option<Duration> {
        self.job_lease_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_secs(self.callback_timeout_secs)
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_secs(self.analyzer_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("Missing required environment variable {0}")]
    Missing(&'static str),
}
