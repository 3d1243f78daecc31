//! Unit of work for callable-mode processing.
//!
//! An [`AsyncTask`] bundles the work closure with per-cycle settings: a
//! timeout override, an executor override, a diagnostic label and optional
//! timeout/error/completion callbacks. The callbacks are exposed to the
//! interceptor chain as the task's own interceptor, which always runs first.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::AsyncError;
use crate::executor::{TaskExecutor, TaskHandle};
use crate::interceptor::{CallableInterceptor, Interception};
use crate::request::AsyncWebRequest;
use crate::Outcome;

/// The closure executed on the executor.
pub type Work = Box<dyn FnOnce() -> Outcome + Send + 'static>;

type TimeoutCallback = Box<dyn FnOnce() -> Outcome + Send + 'static>;
type ErrorCallback = Box<dyn FnOnce(&AsyncError) -> Outcome + Send + 'static>;
type CompletionCallback = Box<dyn FnOnce() + Send + 'static>;

/// What interceptors see of a running task.
#[derive(Debug)]
pub struct TaskInfo {
    label: String,
    handle: OnceLock<TaskHandle>,
}

impl TaskInfo {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            handle: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Executor handle, available once the work has been submitted.
    #[must_use]
    pub fn handle(&self) -> Option<&TaskHandle> {
        self.handle.get()
    }

    pub(crate) fn set_handle(&self, handle: TaskHandle) {
        if let Err(extra) = self.handle.set(handle) {
            debug!(task = %self.label, task_id = %extra.id(), "Task already has a handle; ignoring");
        }
    }
}

/// Work to run on an executor, with optional per-task settings.
///
/// ```rust
/// use serde_json::json;
/// use webasync::AsyncTask;
///
/// let task = AsyncTask::new(|| Ok(json!({"status": "done"})))
///     .with_label("report")
///     .with_timeout(5_000)
///     .on_timeout(|| Ok(json!({"status": "pending"})));
/// assert_eq!(task.label(), "report");
/// assert_eq!(task.timeout_ms(), Some(5_000));
/// ```
pub struct AsyncTask {
    work: Work,
    label: String,
    timeout_ms: Option<u64>,
    executor: Option<Arc<dyn TaskExecutor>>,
    on_timeout: Option<TimeoutCallback>,
    on_error: Option<ErrorCallback>,
    on_completion: Option<CompletionCallback>,
}

impl AsyncTask {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        Self {
            work: Box::new(work),
            label: "task".to_string(),
            timeout_ms: None,
            executor: None,
            on_timeout: None,
            on_error: None,
            on_completion: None,
        }
    }

    /// Override the request timeout for this cycle.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Run this task on `executor` instead of the manager's executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Outcome to commit when the request times out.
    #[must_use]
    pub fn on_timeout<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        self.on_timeout = Some(Box::new(callback));
        self
    }

    /// Outcome to commit when the transport reports an error.
    #[must_use]
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&AsyncError) -> Outcome + Send + 'static,
    {
        self.on_error = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn on_completion<F>(mut self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_completion = Some(Box::new(callback));
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout_ms
    }

    pub(crate) fn into_parts(self) -> TaskParts {
        let has_callbacks =
            self.on_timeout.is_some() || self.on_error.is_some() || self.on_completion.is_some();
        let interceptor: Option<Arc<dyn CallableInterceptor>> = if has_callbacks {
            Some(Arc::new(TaskCallbacks {
                on_timeout: Mutex::new(self.on_timeout),
                on_error: Mutex::new(self.on_error),
                on_completion: Mutex::new(self.on_completion),
            }))
        } else {
            None
        };
        TaskParts {
            work: self.work,
            info: Arc::new(TaskInfo::new(self.label)),
            timeout_ms: self.timeout_ms,
            executor: self.executor,
            interceptor,
        }
    }
}

impl fmt::Debug for AsyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("label", &self.label)
            .field("timeout_ms", &self.timeout_ms)
            .field("executor", &self.executor.as_ref().map(|e| e.name().to_string()))
            .field("on_timeout", &self.on_timeout.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_completion", &self.on_completion.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) struct TaskParts {
    pub work: Work,
    pub info: Arc<TaskInfo>,
    pub timeout_ms: Option<u64>,
    pub executor: Option<Arc<dyn TaskExecutor>>,
    pub interceptor: Option<Arc<dyn CallableInterceptor>>,
}

/// The task's own callbacks, first in the chain.
struct TaskCallbacks {
    on_timeout: Mutex<Option<TimeoutCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
    on_completion: Mutex<Option<CompletionCallback>>,
}

impl CallableInterceptor for TaskCallbacks {
    fn name(&self) -> &'static str {
        "task_callbacks"
    }

    fn handle_timeout(
        &self,
        _request: &dyn AsyncWebRequest,
        _task: &TaskInfo,
    ) -> Result<Interception, AsyncError> {
        let callback = self.on_timeout.lock().take();
        Ok(match callback {
            Some(callback) => Interception::Resolved(callback()),
            None => Interception::Continue,
        })
    }

    fn handle_error(
        &self,
        _request: &dyn AsyncWebRequest,
        _task: &TaskInfo,
        error: &AsyncError,
    ) -> Result<Interception, AsyncError> {
        let callback = self.on_error.lock().take();
        Ok(match callback {
            Some(callback) => Interception::Resolved(callback(error)),
            None => Interception::Continue,
        })
    }

    fn after_completion(&self, _request: &dyn AsyncWebRequest, _task: &TaskInfo) -> Result<(), AsyncError> {
        if let Some(callback) = self.on_completion.lock().take() {
            callback();
        }
        Ok(())
    }
}
