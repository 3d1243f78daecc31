//! # Executor Module
//!
//! Executors run the unit of work of a callable cycle away from the request
//! thread. The coordinator only needs [`TaskExecutor::submit`]; everything
//! else (coroutines, pools, inline execution) is an implementation choice.
//!
//! ## Implementations
//!
//! - [`CoroutineExecutor`] - one `may` coroutine per job (the default)
//! - [`WorkerPoolExecutor`] - a fixed set of worker coroutines sharing a queue
//! - [`InlineExecutor`] - runs the job on the submitting thread
//!
//! ## Cancellation
//!
//! Every submission returns a [`TaskHandle`]. Cancelling a handle is advisory:
//! a job that has not started yet is skipped when it is dequeued, a job that
//! is already running is left alone.

mod coroutine;
mod inline;
mod worker_pool;

pub use coroutine::{CoroutineExecutor, CoroutineExecutorConfig};
pub use inline::InlineExecutor;
pub use worker_pool::{BackpressureMode, WorkerPoolConfig, WorkerPoolExecutor, WorkerPoolMetrics};

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::AsyncError;
use crate::ids::TaskId;

/// A boxed job handed to an executor.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs submitted by the coordinator.
pub trait TaskExecutor: Send + Sync {
    /// Submit a job for execution.
    ///
    /// Returns `Err(AsyncError::Rejected)` when the job cannot be accepted;
    /// in that case the job has not run and never will.
    fn submit(&self, job: Job) -> Result<TaskHandle, AsyncError>;

    /// Name used in log records.
    fn name(&self) -> &str {
        "executor"
    }
}

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Queued,
    Running,
    Finished,
    Cancelled,
}

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

#[derive(Debug)]
struct HandleState {
    id: TaskId,
    status: AtomicU8,
    cancel_requested: AtomicBool,
}

/// Shared handle to a queued or running job.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    inner: Arc<HandleState>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(HandleState {
                id: TaskId::new(),
                status: AtomicU8::new(QUEUED),
                cancel_requested: AtomicBool::new(false),
            }),
        }
    }

    /// Wrap `job` so that it observes cancellation and records its status.
    ///
    /// Executors call this before queueing so every implementation shares the
    /// same cancellation semantics.
    pub fn wrap(job: Job) -> (TaskHandle, Job) {
        let handle = TaskHandle::new();
        let tracked = handle.clone();
        let wrapped: Job = Box::new(move || {
            if !tracked.begin() {
                debug!(task_id = %tracked.id(), "Skipping cancelled task");
                return;
            }
            job();
            tracked.finish();
        });
        (handle, wrapped)
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        match self.inner.status.load(Ordering::Acquire) {
            QUEUED => TaskStatus::Queued,
            RUNNING => TaskStatus::Running,
            FINISHED => TaskStatus::Finished,
            _ => TaskStatus::Cancelled,
        }
    }

    /// Request cancellation.
    ///
    /// Returns `true` if the job had not started and will now never run.
    pub fn cancel(&self) -> bool {
        self.inner.cancel_requested.store(true, Ordering::Release);
        let prevented = self
            .inner
            .status
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        debug!(task_id = %self.id(), prevented, "Task cancellation requested");
        prevented
    }

    /// Whether cancellation has been requested, regardless of whether it took effect.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.status() == TaskStatus::Finished
    }

    fn begin(&self) -> bool {
        self.inner
            .status
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.inner.status.store(FINISHED, Ordering::Release);
    }
}

/// Run a job and contain any panic it raises, logging it against the executor.
pub(crate) fn run_contained(executor: &str, task_id: TaskId, job: Job) {
    if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
        tracing::error!(
            executor = %executor,
            task_id = %task_id,
            panic_message = %AsyncError::from_panic(panic.as_ref()),
            "Job panicked outside of task capture"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_wrapped_job_runs_and_finishes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let (handle, job) = TaskHandle::wrap(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(handle.status(), TaskStatus::Queued);
        job();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
        assert!(!handle.cancel());
    }

    #[test]
    fn test_cancel_before_start_skips_job() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let (handle, job) = TaskHandle::wrap(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(handle.cancel());
        job();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(handle.status(), TaskStatus::Cancelled);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_run_contained_swallows_panic() {
        run_contained(
            "test",
            TaskId::new(),
            Box::new(|| panic!("contained")),
        );
    }
}
