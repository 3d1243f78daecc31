//! # Interceptor Module
//!
//! Interceptors are hooks around one cycle of asynchronous processing. There
//! are two flavours, one per processing mode:
//!
//! - [`CallableInterceptor`] for work submitted to an executor
//! - [`DeferredResultInterceptor`] for results fulfilled by an external producer
//!
//! ## Ordering
//!
//! For a cycle the coordinator builds a chain of
//! `[task or slot's own hook] + [registered hooks, insertion order] + [terminal timeout hook]`.
//!
//! | Callback | Order | Failure |
//! |---|---|---|
//! | `before_concurrent_handling` | forward | aborts the start call |
//! | `pre_process` | forward | stops remaining pre-processing, captured as the result |
//! | `post_process` | **reverse**, only hooks that pre-processed | becomes the result seen by later hooks |
//! | `handle_timeout` | forward | stops at first non-continue answer |
//! | `handle_error` | forward | stops at first non-continue answer |
//! | `after_completion` | forward | logged, never stops the chain |
//!
//! The chain is immutable once the cycle has started.

mod callable;
mod deferred;
mod registry;

pub use callable::{CallableInterceptorChain, TimeoutCallableInterceptor};
pub use deferred::{DeferredResultInterceptorChain, TimeoutDeferredResultInterceptor};
pub use registry::{identity_key, InterceptorRegistry};

use crate::deferred::DeferredResult;
use crate::error::AsyncError;
use crate::request::AsyncWebRequest;
use crate::task::TaskInfo;
use crate::Outcome;

/// Answer of a callable hook to a timeout or error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// No opinion; ask the next hook.
    Continue,
    /// The hook handled the event itself; stop and commit
    /// [`AsyncError::ResponseHandled`] so the request is still dispatched.
    Handled,
    /// Stop and commit this outcome.
    Resolved(Outcome),
}

/// Hook around work executed on a [`TaskExecutor`](crate::executor::TaskExecutor).
///
/// Every method has a no-op default so implementations override only what
/// they need.
pub trait CallableInterceptor: Send + Sync {
    /// Name used in log records and in derived registration keys.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called on the request thread before async handling starts.
    fn before_concurrent_handling(
        &self,
        _request: &dyn AsyncWebRequest,
        _task: &TaskInfo,
    ) -> Result<(), AsyncError> {
        Ok(())
    }

    /// Called on the executor thread right before the work runs.
    fn pre_process(&self, _request: &dyn AsyncWebRequest, _task: &TaskInfo) -> Result<(), AsyncError> {
        Ok(())
    }

    /// Called on the executor thread after the work, in reverse order.
    ///
    /// The hook may replace `result`; returning `Err` replaces it with the error.
    fn post_process(
        &self,
        _request: &dyn AsyncWebRequest,
        _task: &TaskInfo,
        _result: &mut Outcome,
    ) -> Result<(), AsyncError> {
        Ok(())
    }

    fn handle_timeout(
        &self,
        _request: &dyn AsyncWebRequest,
        _task: &TaskInfo,
    ) -> Result<Interception, AsyncError> {
        Ok(Interception::Continue)
    }

    fn handle_error(
        &self,
        _request: &dyn AsyncWebRequest,
        _task: &TaskInfo,
        _error: &AsyncError,
    ) -> Result<Interception, AsyncError> {
        Ok(Interception::Continue)
    }

    fn after_completion(&self, _request: &dyn AsyncWebRequest, _task: &TaskInfo) -> Result<(), AsyncError> {
        Ok(())
    }
}

/// Hook around a [`DeferredResult`] fulfilled by an external producer.
///
/// `handle_timeout` and `handle_error` return `Ok(true)` to let the next
/// hook run and `Ok(false)` to stop the chain.
pub trait DeferredResultInterceptor: Send + Sync {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn before_concurrent_handling(
        &self,
        _request: &dyn AsyncWebRequest,
        _deferred: &DeferredResult,
    ) -> Result<(), AsyncError> {
        Ok(())
    }

    fn pre_process(
        &self,
        _request: &dyn AsyncWebRequest,
        _deferred: &DeferredResult,
    ) -> Result<(), AsyncError> {
        Ok(())
    }

    /// Called on the producer's thread once the slot is fulfilled, in reverse order.
    fn post_process(
        &self,
        _request: &dyn AsyncWebRequest,
        _deferred: &DeferredResult,
        _result: &mut Outcome,
    ) -> Result<(), AsyncError> {
        Ok(())
    }

    fn handle_timeout(
        &self,
        _request: &dyn AsyncWebRequest,
        _deferred: &DeferredResult,
    ) -> Result<bool, AsyncError> {
        Ok(true)
    }

    fn handle_error(
        &self,
        _request: &dyn AsyncWebRequest,
        _deferred: &DeferredResult,
        _error: &AsyncError,
    ) -> Result<bool, AsyncError> {
        Ok(true)
    }

    fn after_completion(
        &self,
        _request: &dyn AsyncWebRequest,
        _deferred: &DeferredResult,
    ) -> Result<(), AsyncError> {
        Ok(())
    }
}
