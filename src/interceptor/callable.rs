use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{CallableInterceptor, Interception};
use crate::error::AsyncError;
use crate::request::AsyncWebRequest;
use crate::task::TaskInfo;
use crate::Outcome;

/// Ordered chain of [`CallableInterceptor`]s for one callable cycle.
pub struct CallableInterceptorChain {
    interceptors: Vec<Arc<dyn CallableInterceptor>>,
    // Number of hooks whose pre_process succeeded; post_process only runs
    // for those.
    pre_processed: AtomicUsize,
}

impl CallableInterceptorChain {
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn CallableInterceptor>>) -> Self {
        Self {
            interceptors,
            pre_processed: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn apply_before_concurrent_handling(
        &self,
        request: &dyn AsyncWebRequest,
        task: &TaskInfo,
    ) -> Result<(), AsyncError> {
        for interceptor in &self.interceptors {
            interceptor.before_concurrent_handling(request, task)?;
        }
        Ok(())
    }

    pub fn apply_pre_process(&self, request: &dyn AsyncWebRequest, task: &TaskInfo) -> Result<(), AsyncError> {
        for (i, interceptor) in self.interceptors.iter().enumerate() {
            interceptor.pre_process(request, task)?;
            self.pre_processed.store(i + 1, Ordering::Release);
        }
        Ok(())
    }

    /// Run `post_process` in reverse over the hooks that pre-processed.
    pub fn apply_post_process(
        &self,
        request: &dyn AsyncWebRequest,
        task: &TaskInfo,
        mut result: Outcome,
    ) -> Outcome {
        let count = self.pre_processed.load(Ordering::Acquire);
        for interceptor in self.interceptors[..count].iter().rev() {
            if let Err(e) = interceptor.post_process(request, task, &mut result) {
                debug!(
                    interceptor = interceptor.name(),
                    error = %e,
                    "post_process failed; error becomes the result"
                );
                result = Err(e);
            }
        }
        result
    }

    /// Cancel the task and ask each hook for a timeout outcome.
    ///
    /// A `Handled` answer yields [`AsyncError::ResponseHandled`]. Returns
    /// `None` when every hook continued.
    pub fn trigger_after_timeout(&self, request: &dyn AsyncWebRequest, task: &TaskInfo) -> Option<Outcome> {
        cancel_task(task);
        for interceptor in &self.interceptors {
            match interceptor.handle_timeout(request, task) {
                Ok(Interception::Continue) => continue,
                Ok(Interception::Handled) => return Some(Err(AsyncError::ResponseHandled)),
                Ok(Interception::Resolved(outcome)) => return Some(outcome),
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    /// Cancel the task and ask each hook for an outcome for `error`.
    ///
    /// Same answers as [`trigger_after_timeout`](Self::trigger_after_timeout).
    pub fn trigger_after_error(
        &self,
        request: &dyn AsyncWebRequest,
        task: &TaskInfo,
        error: &AsyncError,
    ) -> Option<Outcome> {
        cancel_task(task);
        for interceptor in &self.interceptors {
            match interceptor.handle_error(request, task, error) {
                Ok(Interception::Continue) => continue,
                Ok(Interception::Handled) => return Some(Err(AsyncError::ResponseHandled)),
                Ok(Interception::Resolved(outcome)) => return Some(outcome),
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }

    pub fn trigger_after_completion(&self, request: &dyn AsyncWebRequest, task: &TaskInfo) {
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.after_completion(request, task) {
                warn!(
                    interceptor = interceptor.name(),
                    task = %task.label(),
                    error = %e,
                    "after_completion failed"
                );
            }
        }
    }
}

fn cancel_task(task: &TaskInfo) {
    let Some(handle) = task.handle() else {
        debug!(task = %task.label(), "No task handle to cancel");
        return;
    };
    if handle.is_finished() {
        return;
    }
    if handle.cancel() {
        debug!(task = %task.label(), task_id = %handle.id(), "Queued task cancelled before it ran");
    } else {
        debug!(
            task = %task.label(),
            task_id = %handle.id(),
            "Task already running; cancellation is cooperative"
        );
    }
}

/// Terminal hook: a timeout that no earlier hook resolved becomes [`AsyncError::Timeout`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeoutCallableInterceptor;

impl CallableInterceptor for TimeoutCallableInterceptor {
    fn handle_timeout(
        &self,
        _request: &dyn AsyncWebRequest,
        _task: &TaskInfo,
    ) -> Result<Interception, AsyncError> {
        Ok(Interception::Resolved(Err(AsyncError::Timeout)))
    }
}
