//! Error types for asynchronous request processing.
//!
//! Two families of errors exist:
//!
//! - [`AsyncError`] is a *value*. Once a cycle is active, every failure (work
//!   failure, timeout, transport error, hook failure) is captured as an
//!   `AsyncError` and committed as the cycle's result. It is `Clone` so the
//!   committed result can be read any number of times from the dispatch thread.
//! - [`StartError`] is returned synchronously from the `start_*_processing`
//!   calls when a cycle cannot begin.

use std::fmt;
use std::io;

/// Failure produced or observed during a cycle of asynchronous processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncError {
    /// The request timed out and no interceptor supplied a result.
    Timeout,
    /// The task was cancelled before it produced a result.
    Cancelled,
    /// The unit of work (or a hook) failed.
    Failed {
        /// Human-readable failure description
        message: String,
    },
    /// The unit of work panicked; the panic payload is captured as text.
    Panicked {
        /// Panic payload rendered as a string
        message: String,
    },
    /// The executor refused the job before it ran.
    Rejected {
        /// Why the executor refused the job
        message: String,
    },
    /// I/O failure reported by the request transport (e.g. client went away).
    Io {
        /// The I/O error kind reported by the transport
        kind: io::ErrorKind,
        /// Transport-provided description
        message: String,
    },
    /// An operation was attempted in a state that does not allow it.
    IllegalState {
        /// Description of the violated state precondition
        message: String,
    },
    /// A hook answered a timeout or error itself; there is nothing left to render.
    ResponseHandled,
}

impl AsyncError {
    pub fn failed(message: impl Into<String>) -> Self {
        AsyncError::Failed {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        AsyncError::Rejected {
            message: message.into(),
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        AsyncError::IllegalState {
            message: message.into(),
        }
    }

    pub fn io(kind: io::ErrorKind, message: impl Into<String>) -> Self {
        AsyncError::Io {
            kind,
            message: message.into(),
        }
    }

    /// Build an error from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        AsyncError::Panicked { message }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, AsyncError::Timeout)
    }

    /// Whether this is the marker committed when a hook handled the response.
    #[must_use]
    pub fn is_response_handled(&self) -> bool {
        matches!(self, AsyncError::ResponseHandled)
    }
}

impl fmt::Display for AsyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AsyncError::Timeout => write!(f, "async request timed out"),
            AsyncError::Cancelled => write!(f, "async task was cancelled"),
            AsyncError::Failed { message } => write!(f, "async task failed: {message}"),
            AsyncError::Panicked { message } => write!(f, "async task panicked: {message}"),
            AsyncError::Rejected { message } => {
                write!(f, "executor rejected async task: {message}")
            }
            AsyncError::Io { kind, message } => write!(f, "I/O error ({kind:?}): {message}"),
            AsyncError::IllegalState { message } => write!(f, "illegal state: {message}"),
            AsyncError::ResponseHandled => write!(f, "response already handled by an interceptor"),
        }
    }
}

impl std::error::Error for AsyncError {}

impl From<io::Error> for AsyncError {
    fn from(err: io::Error) -> Self {
        AsyncError::io(err.kind(), err.to_string())
    }
}

/// Why a call to start concurrent processing was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartError {
    /// No [`AsyncWebRequest`](crate::request::AsyncWebRequest) was configured.
    RequestNotConfigured,
    /// The previous cycle is still in progress on the request transport.
    AlreadyStarted,
    /// A `before_concurrent_handling` hook failed.
    Interceptor(AsyncError),
    /// The transport refused to start async handling.
    Request(AsyncError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::RequestNotConfigured => {
                write!(f, "AsyncWebRequest must be configured before starting")
            }
            StartError::AlreadyStarted => write!(
                f,
                "concurrent handling already started; clear the previous result or wait for dispatch"
            ),
            StartError::Interceptor(err) => write!(f, "interceptor refused to start: {err}"),
            StartError::Request(err) => write!(f, "request could not start async: {err}"),
        }
    }
}

impl std::error::Error for StartError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartError::Interceptor(err) | StartError::Request(err) => Some(err),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_from_panic_payloads() {
        let p: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(
            AsyncError::from_panic(p.as_ref()),
            AsyncError::Panicked {
                message: "boom".to_string()
            }
        );

        let p: Box<dyn std::any::Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(
            AsyncError::from_panic(p.as_ref()),
            AsyncError::Panicked {
                message: "owned boom".to_string()
            }
        );

        let p: Box<dyn std::any::Any + Send> = Box::new(42_u32);
        assert!(matches!(
            AsyncError::from_panic(p.as_ref()),
            AsyncError::Panicked { .. }
        ));
    }

    #[test]
    fn test_io_conversion_keeps_kind() {
        let err: AsyncError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed").into();
        match err {
            AsyncError::Io { kind, message } => {
                assert_eq!(kind, io::ErrorKind::BrokenPipe);
                assert!(message.contains("pipe closed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_start_error_source() {
        let err = StartError::Interceptor(AsyncError::failed("nope"));
        assert!(err.source().is_some());
        assert!(StartError::AlreadyStarted.source().is_none());
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_display() {
        assert_eq!(AsyncError::Timeout.to_string(), "async request timed out");
        assert!(AsyncError::Timeout.is_timeout());
        assert!(!AsyncError::Cancelled.is_timeout());
        assert!(AsyncError::ResponseHandled.is_response_handled());
        assert!(!AsyncError::Timeout.is_response_handled());
    }
}
