//! Shared test doubles for the analysis adapter.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use aura_worker::models::analysis::AnalysisResult;
use aura_worker::models::job::JobInput;
use aura_worker::services::analyzer::{AnalysisAdapter, AnalysisError};
use aura_worker::services::progress::ProgressReporter;

/// What the adapter does for a given job.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report 5, 30, 60, 95 then return [`sample_result`].
    Succeed,
    /// Report 40 then return the error.
    Fail(String),
    /// Report 40 then panic.
    Panic,
    /// Report 25 then never return.
    Hang,
    /// Report 5, stay silent for the given time, then succeed.
    Quiet(Duration),
}

/// Adapter whose behavior is scripted per job ID.
pub struct ScriptedAdapter {
    default: Script,
    overrides: HashMap<String, Script>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, job_id: &str, script: Script) -> Self {
        self.overrides.insert(job_id.to_string(), script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisAdapter for ScriptedAdapter {
    async fn run(
        &self,
        input: &JobInput,
        progress: ProgressReporter,
    ) -> Result<AnalysisResult, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .overrides
            .get(&input.job_id)
            .unwrap_or(&self.default)
            .clone();

        match script {
            Script::Succeed => {
                for step in [5, 30, 60, 95] {
                    progress.report(step);
                    tokio::task::yield_now().await;
                }
                Ok(sample_result())
            }
            Script::Fail(message) => {
                progress.report(40);
                Err(AnalysisError::Failed(message))
            }
            Script::Panic => {
                progress.report(40);
                panic!("decoder crashed on {}", input.job_id);
            }
            Script::Quiet(pause) => {
                progress.report(5);
                tokio::time::sleep(pause).await;
                Ok(sample_result())
            }
            Script::Hang => {
                progress.report(25);
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(sample_result())
            }
        }
    }
}

/// A complete analyzer response: hit factor 78, scores 85/60/75/70.
pub fn sample_result() -> AnalysisResult {
    serde_json::from_value(sample_result_json()).expect("sample result is valid")
}

pub fn sample_result_json() -> serde_json::Value {
    serde_json::json!({
        "hit_factor": 78,
        "scores": {"audio": 85, "lyrics": 60, "brand": 75, "market": 70},
        "recommendations": [
            {"type": "production", "note": "Tighten the low end in the chorus", "priority": "high"}
        ],
        "similar_hits": [
            {"song": "Blinding Lights", "artist": "The Weeknd", "year": 2019, "similarity": 0.82}
        ],
        "model_version": "AURA-v2.1",
        "tempo_bpm": 118
    })
}

/// Poll `check` until it returns true or `limit` elapses.
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
