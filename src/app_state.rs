use std::sync::Arc;
use std::time::Duration;

use crate::services::{analyzer::AnalysisAdapter, registry::TaskRegistry, sink::JobSink};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<dyn AnalysisAdapter>,
    /// Where background jobs report progress and outcome.
    pub sink: Arc<dyn JobSink>,
    pub tasks: TaskRegistry,
    /// Bearer token required on submissions; `None` accepts every request.
    pub worker_secret: Option<String>,
    pub job_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(
        adapter: Arc<dyn AnalysisAdapter>,
        sink: Arc<dyn JobSink>,
        worker_secret: Option<String>,
        job_timeout: Option<Duration>,
    ) -> Self {
        Self {
            adapter,
            sink,
            tasks: TaskRegistry::new(),
            worker_secret,
            job_timeout,
        }
    }
}
