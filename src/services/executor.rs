//! Runs one job through the analysis adapter and reports its lifecycle.
//!
//! Both ingestion paths call [`execute_job`]; they differ only in the
//! [`JobSink`] they pass. Adapter errors, panics, timeouts, cancellation and
//! a lost lease all end in a `fail` write. Progress still queued when the
//! adapter returns is dropped, except for the latest value on failure, so a
//! slow sink never holds back the terminal write.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::models::analysis::AnalysisResult;
use crate::models::job::JobInput;
use crate::services::analyzer::{AnalysisAdapter, AnalysisError};
use crate::services::progress::ProgressReporter;
use crate::services::sink::{JobSink, SinkError};

#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Deadline for the adapter call.
    pub timeout: Option<Duration>,
    /// Cancels the adapter call; the job is then failed.
    pub cancel: CancellationToken,
    /// How often the sink's heartbeat runs while the adapter works.
    pub heartbeat: Option<Duration>,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { hit_factor: i32 },
    Failed { error: String },
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed { .. })
    }
}

pub const CANCELLED_MESSAGE: &str = "job cancelled";
pub const LEASE_LOST_MESSAGE: &str = "lease lost: job was reclaimed by another worker";

/// Attempts per terminal write before giving up.
const TERMINAL_WRITE_ATTEMPTS: u32 = 3;
const TERMINAL_WRITE_BACKOFF: Duration = Duration::from_millis(100);

pub async fn execute_job(
    input: JobInput,
    adapter: Arc<dyn AnalysisAdapter>,
    sink: Arc<dyn JobSink>,
    options: ExecutionOptions,
) -> JobOutcome {
    let started = Instant::now();
    let job_id = input.job_id.clone();

    let (reporter, progress_rx) = ProgressReporter::channel();
    let flush = CancellationToken::new();
    let forwarder = tokio::spawn(forward_progress(
        job_id.clone(),
        progress_rx,
        sink.clone(),
        flush.clone(),
    ));

    let lease_lost = CancellationToken::new();
    let heartbeat = options.heartbeat.map(|period| {
        tokio::spawn(keep_alive(
            job_id.clone(),
            period,
            sink.clone(),
            flush.clone(),
            lease_lost.clone(),
        ))
    });

    let task: JoinHandle<Result<AnalysisResult, AnalysisError>> = tokio::spawn(async move {
        adapter.run(&input, reporter).await
    });
    let abort = task.abort_handle();

    let result = tokio::select! {
        joined = await_analysis(task, options.timeout) => joined,
        _ = options.cancel.cancelled() => {
            abort.abort();
            Err(CANCELLED_MESSAGE.to_string())
        }
        _ = lease_lost.cancelled() => {
            abort.abort();
            Err(LEASE_LOST_MESSAGE.to_string())
        }
    };

    flush.cancel();
    if let Some(heartbeat) = heartbeat {
        if let Err(e) = heartbeat.await {
            tracing::warn!(job_id = %job_id, error = %e, "Heartbeat ended abnormally");
        }
    }
    let pending = match forwarder.await {
        Ok(pending) => pending,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Progress forwarder ended abnormally");
            None
        }
    };

    let elapsed = started.elapsed();
    metrics::histogram!("analysis_processing_seconds").record(elapsed.as_secs_f64());

    let error = match result {
        Ok(analysis) => {
            match write_terminal(&job_id, || sink.complete(&job_id, &analysis, elapsed)).await {
                Ok(()) => {
                    metrics::counter!("analysis_jobs_completed_total").increment(1);
                    tracing::info!(
                        job_id = %job_id,
                        hit_factor = analysis.hit_factor,
                        duration_ms = elapsed.as_millis() as u64,
                        "Job completed successfully"
                    );
                    return JobOutcome::Completed {
                        hit_factor: analysis.hit_factor,
                    };
                }
                Err(e) => format!("failed to record result: {e}"),
            }
        }
        Err(error) => {
            if let Some(progress) = pending {
                deliver(&job_id, progress, sink.as_ref()).await;
            }
            error
        }
    };

    if let Err(e) = write_terminal(&job_id, || sink.fail(&job_id, &error)).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to record job failure");
    }
    metrics::counter!("analysis_jobs_failed_total").increment(1);
    tracing::warn!(
        job_id = %job_id,
        error = %error,
        duration_ms = elapsed.as_millis() as u64,
        "Job failed"
    );
    JobOutcome::Failed { error }
}

/// Retries a terminal write while its error is transient.
async fn write_terminal<F, Fut>(job_id: &str, mut write: F) -> Result<(), SinkError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), SinkError>>,
{
    let mut attempt = 1;
    loop {
        match write().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < TERMINAL_WRITE_ATTEMPTS => {
                tracing::warn!(job_id = %job_id, attempt, error = %e, "Terminal write failed, retrying");
                tokio::time::sleep(TERMINAL_WRITE_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Waits for the adapter task, converting every way it can end into a result.
async fn await_analysis(
    task: JoinHandle<Result<AnalysisResult, AnalysisError>>,
    timeout: Option<Duration>,
) -> Result<AnalysisResult, String> {
    let abort = task.abort_handle();
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                return Err(format!("job exceeded timeout of {}s", limit.as_secs_f64()));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(describe_join_error(e)),
    }
}

fn describe_join_error(e: JoinError) -> String {
    if e.is_panic() {
        format!("analysis panicked: {}", panic_message(e.into_panic()))
    } else {
        "analysis task was aborted".to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Refreshes the job's lease every `period` until `stop` fires.
///
/// Cancels `lease_lost` if the sink reports the claim is gone.
async fn keep_alive(
    job_id: String,
    period: Duration,
    sink: Arc<dyn JobSink>,
    stop: CancellationToken,
    lease_lost: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match sink.heartbeat(&job_id).await {
            Ok(()) => tracing::trace!(job_id = %job_id, "Lease refreshed"),
            Err(e) if e.is_lease_lost() => {
                tracing::error!(job_id = %job_id, error = %e, "Lease lost, abandoning job");
                lease_lost.cancel();
                return;
            }
            Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Lease refresh failed"),
        }
    }
}

/// Delivers accepted progress values to the sink in order.
///
/// Once `flush` fires, values still queued are not delivered; the highest of
/// them is returned so a failing job can record the progress it reached.
async fn forward_progress(
    job_id: String,
    mut rx: mpsc::UnboundedReceiver<i32>,
    sink: Arc<dyn JobSink>,
    flush: CancellationToken,
) -> Option<i32> {
    loop {
        tokio::select! {
            biased;
            _ = flush.cancelled() => break,
            next = rx.recv() => match next {
                Some(progress) => deliver(&job_id, progress, sink.as_ref()).await,
                None => return None,
            },
        }
    }

    rx.close();
    let mut pending = None;
    while let Ok(progress) = rx.try_recv() {
        pending = Some(progress);
    }
    pending
}

async fn deliver(job_id: &str, progress: i32, sink: &dyn JobSink) {
    match sink.progress(job_id, progress).await {
        Ok(()) => tracing::debug!(job_id = %job_id, progress, "Progress reported"),
        Err(e) => {
            tracing::warn!(job_id = %job_id, progress, error = %e, "Progress report failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleError;
    use crate::services::job_store::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Progress(i32),
        Heartbeat,
        Complete(i32),
        Fail(String),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
        /// Transient failures returned by `complete` before it succeeds.
        complete_failures: AtomicU32,
        progress_delay: Duration,
        lose_lease: bool,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[async_trait]
    impl JobSink for RecordingSink {
        async fn progress(&self, _job_id: &str, progress: i32) -> Result<(), SinkError> {
            if !self.progress_delay.is_zero() {
                tokio::time::sleep(self.progress_delay).await;
            }
            self.push(Event::Progress(progress));
            Ok(())
        }

        async fn complete(
            &self,
            _job_id: &str,
            result: &AnalysisResult,
            _elapsed: Duration,
        ) -> Result<(), SinkError> {
            let remaining = self.complete_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.complete_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut).into());
            }
            self.push(Event::Complete(result.hit_factor));
            Ok(())
        }

        async fn fail(&self, _job_id: &str, error: &str) -> Result<(), SinkError> {
            self.push(Event::Fail(error.to_string()));
            Ok(())
        }

        async fn heartbeat(&self, job_id: &str) -> Result<(), SinkError> {
            if self.lose_lease {
                return Err(StoreError::Lifecycle(LifecycleError::LeaseLost {
                    job_id: job_id.to_string(),
                })
                .into());
            }
            self.push(Event::Heartbeat);
            Ok(())
        }
    }

    enum Behavior {
        Succeed(Vec<i32>),
        Fail,
        Panic,
        Hang,
        Quiet(Duration),
    }

    struct StubAdapter(Behavior);

    fn sample_result() -> AnalysisResult {
        serde_json::from_value(serde_json::json!({
            "hit_factor": 78,
            "scores": {"audio": 85, "lyrics": 60, "brand": 75, "market": 70},
            "model_version": "AURA-v2.1"
        }))
        .unwrap()
    }

    #[async_trait]
    impl AnalysisAdapter for StubAdapter {
        async fn run(
            &self,
            _input: &JobInput,
            progress: ProgressReporter,
        ) -> Result<AnalysisResult, AnalysisError> {
            match &self.0 {
                Behavior::Succeed(steps) => {
                    for step in steps {
                        progress.report(*step);
                        tokio::task::yield_now().await;
                    }
                    Ok(sample_result())
                }
                Behavior::Fail => {
                    progress.report(10);
                    Err(AnalysisError::Failed("download failed: 404".to_string()))
                }
                Behavior::Panic => panic!("decoder blew up"),
                Behavior::Hang => {
                    progress.report(5);
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(sample_result())
                }
                Behavior::Quiet(pause) => {
                    progress.report(5);
                    tokio::time::sleep(*pause).await;
                    Ok(sample_result())
                }
            }
        }
    }

    async fn run_with(
        behavior: Behavior,
        sink: Arc<RecordingSink>,
        options: ExecutionOptions,
    ) -> (JobOutcome, Vec<Event>) {
        let outcome = execute_job(
            JobInput::new("a1", "http://x/track.mp3"),
            Arc::new(StubAdapter(behavior)),
            sink.clone(),
            options,
        )
        .await;
        (outcome, sink.events())
    }

    async fn run(behavior: Behavior, options: ExecutionOptions) -> (JobOutcome, Vec<Event>) {
        run_with(behavior, Arc::new(RecordingSink::default()), options).await
    }

    fn progress_values(events: &[Event]) -> Vec<i32> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_progress_precedes_completion_and_never_regresses() {
        let (outcome, events) = run(
            Behavior::Succeed(vec![5, 10, 8, 30, 50, 50, 70, 120]),
            ExecutionOptions::default(),
        )
        .await;

        assert_eq!(outcome, JobOutcome::Completed { hit_factor: 78 });
        assert_eq!(events.last(), Some(&Event::Complete(78)));

        let progress = progress_values(&events);
        assert!(progress.windows(2).all(|w| w[0] < w[1]), "{progress:?}");
        assert!(progress
            .iter()
            .all(|p| [5, 10, 30, 50, 70, 100].contains(p)));
    }

    #[tokio::test]
    async fn test_slow_progress_sink_does_not_hold_back_completion() {
        let sink = Arc::new(RecordingSink {
            progress_delay: Duration::from_millis(200),
            ..Default::default()
        });
        let started = Instant::now();
        let (outcome, events) = run_with(
            Behavior::Succeed(vec![10, 20, 30, 40, 50, 60, 70, 80, 90]),
            sink,
            ExecutionOptions::default(),
        )
        .await;

        assert!(outcome.is_completed());
        assert_eq!(events.last(), Some(&Event::Complete(78)));
        // at most the in-flight progress write is waited for
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
        assert!(progress_values(&events).len() <= 2);
    }

    #[tokio::test]
    async fn test_adapter_error_fails_job() {
        let (outcome, events) = run(Behavior::Fail, ExecutionOptions::default()).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: "download failed: 404".to_string()
            }
        );
        // the progress reached is recorded before the failure
        assert_eq!(
            events,
            vec![
                Event::Progress(10),
                Event::Fail("download failed: 404".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let (outcome, events) = run(Behavior::Panic, ExecutionOptions::default()).await;

        match outcome {
            JobOutcome::Failed { error } => assert!(error.contains("decoder blew up"), "{error}"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(matches!(events.last(), Some(Event::Fail(_))));
    }

    #[tokio::test]
    async fn test_timeout_fails_job() {
        let options = ExecutionOptions {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let (outcome, events) = run(Behavior::Hang, options).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: "job exceeded timeout of 0.05s".to_string()
            }
        );
        assert_eq!(events.first(), Some(&Event::Progress(5)));
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_fails_job() {
        let options = ExecutionOptions::default();
        let cancel = options.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let (outcome, events) = run(Behavior::Hang, options).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: CANCELLED_MESSAGE.to_string()
            }
        );
        assert_eq!(events.last(), Some(&Event::Fail(CANCELLED_MESSAGE.to_string())));
    }

    #[tokio::test]
    async fn test_heartbeat_runs_while_adapter_is_quiet() {
        let options = ExecutionOptions {
            heartbeat: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let (outcome, events) = run(Behavior::Quiet(Duration::from_millis(150)), options).await;

        assert!(outcome.is_completed());
        let beats = events.iter().filter(|e| **e == Event::Heartbeat).count();
        assert!(beats >= 3, "{events:?}");
        assert_eq!(events.last(), Some(&Event::Complete(78)));
    }

    #[tokio::test]
    async fn test_lost_lease_abandons_job() {
        let sink = Arc::new(RecordingSink {
            lose_lease: true,
            ..Default::default()
        });
        let options = ExecutionOptions {
            heartbeat: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let (outcome, events) = run_with(Behavior::Hang, sink, options).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                error: LEASE_LOST_MESSAGE.to_string()
            }
        );
        assert_eq!(events.last(), Some(&Event::Fail(LEASE_LOST_MESSAGE.to_string())));
    }

    #[tokio::test]
    async fn test_transient_completion_error_is_retried() {
        let sink = Arc::new(RecordingSink {
            complete_failures: AtomicU32::new(1),
            ..Default::default()
        });
        let (outcome, events) =
            run_with(Behavior::Succeed(vec![50]), sink, ExecutionOptions::default()).await;

        assert_eq!(outcome, JobOutcome::Completed { hit_factor: 78 });
        assert_eq!(events.last(), Some(&Event::Complete(78)));
    }

    #[tokio::test]
    async fn test_unrecorded_completion_fails_job() {
        let sink = Arc::new(RecordingSink {
            complete_failures: AtomicU32::new(u32::MAX),
            ..Default::default()
        });
        let (outcome, events) =
            run_with(Behavior::Succeed(vec![50]), sink, ExecutionOptions::default()).await;

        match outcome {
            JobOutcome::Failed { error } => {
                assert!(error.starts_with("failed to record result: "), "{error}")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!events.contains(&Event::Complete(78)));
        assert!(matches!(events.last(), Some(Event::Fail(e)) if e.starts_with("failed to record result")));
    }
}
