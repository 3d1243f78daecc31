use super::{run_contained, Job, TaskExecutor, TaskHandle};
use crate::error::AsyncError;

/// Runs every job synchronously on the submitting thread.
///
/// The job has finished by the time `submit` returns, which makes this
/// executor convenient for tests and for work that is already non-blocking.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn submit(&self, job: Job) -> Result<TaskHandle, AsyncError> {
        let (handle, job) = TaskHandle::wrap(job);
        run_contained(self.name(), handle.id(), job);
        Ok(handle)
    }

    fn name(&self) -> &str {
        "inline"
    }
}
