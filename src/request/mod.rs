//! # Request Module
//!
//! The transport side of asynchronous processing. An [`AsyncWebRequest`] is
//! the async-capable view of one in-flight request: it can be switched into
//! async mode, it reports timeouts, errors and completion through registered
//! handlers, and it can be asked to dispatch the request back into the
//! processing pipeline on another thread.
//!
//! The coordinator never runs timers or threads of its own for a request;
//! the transport owns deadlines and fires the handlers.
//!
//! [`StandardAsyncRequest`] is the in-process implementation used by the demo
//! binary and tests. Server integrations implement the trait directly.

mod standard;

pub use standard::{DispatchSignal, StandardAsyncRequest};

use crate::error::AsyncError;

/// Invoked when the request deadline expires.
pub type TimeoutHandler = Box<dyn FnOnce() + Send + 'static>;
/// Invoked when the transport observes an error (I/O failure, client gone).
pub type ErrorHandler = Box<dyn FnOnce(AsyncError) + Send + 'static>;
/// Invoked when async processing of the request is complete.
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// Async-capable request transport consumed by the coordinator.
///
/// Each registered handler fires at most once. Handlers are fired by the
/// transport on whatever thread observes the event, never by the coordinator.
pub trait AsyncWebRequest: Send + Sync {
    /// Set the deadline for the next async cycle, in milliseconds.
    fn set_timeout(&self, timeout_ms: u64);

    fn add_timeout_handler(&self, handler: TimeoutHandler);

    fn add_error_handler(&self, handler: ErrorHandler);

    fn add_completion_handler(&self, handler: CompletionHandler);

    /// Mark the request as being handled asynchronously.
    ///
    /// Returns `IllegalState` if the request has already completed.
    fn start_async(&self) -> Result<(), AsyncError>;

    /// Whether async handling is started and not yet dispatched or completed.
    fn is_async_started(&self) -> bool;

    /// Whether the request has fully completed; nothing can be dispatched anymore.
    fn is_async_complete(&self) -> bool;

    /// Resume the request pipeline on a container thread.
    fn dispatch(&self);

    /// Request URI for diagnostics, when the transport knows it.
    fn request_uri(&self) -> Option<String> {
        None
    }
}

/// Render the request for log records.
pub(crate) fn describe(request: &dyn AsyncWebRequest) -> String {
    request
        .request_uri()
        .unwrap_or_else(|| "async transport".to_string())
}
