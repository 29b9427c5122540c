use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Background analysis tasks of the gateway, keyed by job ID.
///
/// Each task gets its own cancellation token; the entry is removed when the
/// task finishes.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("job {0} is already running")]
    AlreadyRunning(String),
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawn a task for `job_id`, handing it the token that cancels it.
    pub fn spawn<F, Fut>(&self, job_id: &str, make_task: F) -> Result<(), RegistryError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        {
            let mut tasks = self.lock();
            if tasks.contains_key(job_id) {
                return Err(RegistryError::AlreadyRunning(job_id.to_string()));
            }
            tasks.insert(job_id.to_string(), token.clone());
            metrics::gauge!("analysis_active_tasks").set(tasks.len() as f64);
        }

        let task = make_task(token);
        let registry = self.clone();
        let job_id = job_id.to_string();
        tokio::spawn(async move {
            task.await;
            registry.finish(&job_id);
        });
        Ok(())
    }

    fn finish(&self, job_id: &str) {
        let mut tasks = self.lock();
        tasks.remove(job_id);
        metrics::gauge!("analysis_active_tasks").set(tasks.len() as f64);
    }

    /// Signal cancellation to a running task. Returns false if none is running.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for token in self.lock().values() {
            token.cancel();
        }
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `grace` for running tasks to finish. Returns true if none remain.
    pub async fn drain(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        while !self.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}
