use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use may::coroutine;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use super::{run_contained, Job, TaskExecutor, TaskHandle};
use crate::error::AsyncError;

/// Settings for [`CoroutineExecutor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoroutineExecutorConfig {
    /// Prefix for coroutine names (`{prefix}-{n}`)
    pub name_prefix: String,
    /// Stack size for each task coroutine in bytes
    pub stack_size: usize,
    /// Maximum number of concurrently running tasks; `None` means unlimited
    pub concurrency_limit: Option<usize>,
}

impl Default for CoroutineExecutorConfig {
    fn default() -> Self {
        Self {
            name_prefix: "webasync".to_string(),
            stack_size: 0x10000, // 64KB
            concurrency_limit: None,
        }
    }
}

/// Spawns a fresh `may` coroutine for every submitted job.
///
/// This is the default executor: cheap to create, no queue to size, and a
/// slow task never holds up another one.
pub struct CoroutineExecutor {
    config: CoroutineExecutorConfig,
    active: Arc<AtomicUsize>,
    spawned: AtomicUsize,
}

impl CoroutineExecutor {
    #[must_use]
    pub fn new(config: CoroutineExecutorConfig) -> Self {
        Self {
            config,
            active: Arc::new(AtomicUsize::new(0)),
            spawned: AtomicUsize::new(0),
        }
    }

    /// Number of tasks currently running.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn config(&self) -> &CoroutineExecutorConfig {
        &self.config
    }

    fn acquire_slot(&self) -> Result<(), AsyncError> {
        let Some(limit) = self.config.concurrency_limit else {
            self.active.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        };
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= limit {
                warn!(
                    executor = %self.config.name_prefix,
                    active = current,
                    limit,
                    "Concurrency limit reached, rejecting task"
                );
                return Err(AsyncError::rejected(format!(
                    "concurrency limit of {limit} reached"
                )));
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for CoroutineExecutor {
    fn default() -> Self {
        Self::new(CoroutineExecutorConfig::default())
    }
}

impl TaskExecutor for CoroutineExecutor {
    fn submit(&self, job: Job) -> Result<TaskHandle, AsyncError> {
        self.acquire_slot()?;

        let (handle, job) = TaskHandle::wrap(job);
        let task_id = handle.id();
        let seq = self.spawned.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.config.name_prefix, seq);
        let active = Arc::clone(&self.active);
        let executor_name = self.config.name_prefix.clone();

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime
        // because coroutines must not hold thread-local references across yields.
        // The job is Send + 'static and owns everything it touches.
        #[allow(unsafe_code)]
        let spawn_result = unsafe {
            coroutine::Builder::new()
                .name(name.clone())
                .stack_size(self.config.stack_size)
                .spawn(move || {
                    debug!(task_id = %task_id, coroutine = %name, "Task coroutine start");
                    run_contained(&executor_name, task_id, job);
                    active.fetch_sub(1, Ordering::AcqRel);
                })
        };

        match spawn_result {
            Ok(_) => Ok(handle),
            Err(e) => {
                self.active.fetch_sub(1, Ordering::AcqRel);
                error!(
                    executor = %self.config.name_prefix,
                    task_id = %task_id,
                    error = %e,
                    "Failed to spawn task coroutine"
                );
                Err(AsyncError::rejected(format!("failed to spawn coroutine: {e}")))
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.name_prefix
    }
}
