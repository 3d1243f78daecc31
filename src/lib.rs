//! # webasync
//!
//! **webasync** hands long-running request work off the request thread and
//! resumes the request pipeline once a result is available, on top of the
//! `may` coroutine runtime.
//!
//! ## Overview
//!
//! A request thread configures an [`AsyncManager`] with the request's async
//! transport ([`AsyncWebRequest`]) and starts a cycle in one of two modes:
//!
//! - **Callable**: an [`AsyncTask`] runs on a [`TaskExecutor`]
//! - **Deferred result**: an external producer fulfils a [`DeferredResult`]
//!
//! The request thread returns immediately. Whatever finishes first (the work,
//! the transport's timeout or error notification, the producer) commits the
//! cycle's result exactly once, and the manager asks the transport to
//! dispatch the request back into the pipeline, where the committed result
//! is read.
//!
//! ## Architecture
//!
//! - **[`manager`]** - the per-request coordinator and its cycle state machine
//! - **[`interceptor`]** - hook traits, ordered chains and terminal timeout hooks
//! - **[`task`]** - the unit of work for callable mode
//! - **[`deferred`]** - the write-once result slot for deferred mode
//! - **[`executor`]** - coroutine, worker-pool and inline executors
//! - **[`request`]** - the transport trait and an in-process implementation
//! - **[`disconnect`]** - client-disconnect detection
//! - **[`config`]** / **[`logging`]** - process-wide settings and tracing setup
//!
//! ### Callable Cycle
//!
//! ```mermaid
//! sequenceDiagram
//!     participant T1 as Request thread
//!     participant M as AsyncManager
//!     participant R as AsyncWebRequest
//!     participant E as TaskExecutor
//!     participant T3 as Dispatch thread
//!
//!     T1->>M: start_callable_processing(task, context)
//!     M->>R: add timeout / error / completion handlers
//!     M->>M: before_concurrent_handling (forward)
//!     M->>R: start_async()
//!     M->>E: submit(job)
//!     M-->>T1: Ok(())
//!     E->>E: pre_process, work, post_process (reverse)
//!     E->>M: commit(result)
//!     M->>R: dispatch()
//!     R->>T3: DispatchSignal
//!     T3->>M: concurrent_result()
//!     T3->>M: clear_concurrent_result()
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use serde_json::json;
//! use webasync::request::StandardAsyncRequest;
//! use webasync::{AsyncManager, DeferredResult};
//!
//! let mut manager = AsyncManager::default();
//! let (request, dispatched) = StandardAsyncRequest::new("/quotes/latest");
//! manager.configure_request(request).unwrap();
//!
//! let quote = DeferredResult::new().with_timeout(5_000);
//! manager.start_deferred_result_processing(&quote, &[]).unwrap();
//!
//! // Later, on any thread:
//! quote.set_result(json!({"price": 42}));
//!
//! dispatched.recv_timeout(Duration::from_secs(1)).unwrap();
//! assert_eq!(manager.concurrent_result(), Some(Ok(json!({"price": 42}))));
//! ```

pub mod cli;
pub mod config;
pub mod deferred;
pub mod disconnect;
pub mod error;
pub mod executor;
pub mod ids;
pub mod interceptor;
pub mod logging;
pub mod manager;
pub mod request;
pub mod task;

use serde_json::Value;
use smallvec::SmallVec;

/// Result of one cycle: a JSON value or the failure that replaced it.
pub type Outcome = Result<Value, AsyncError>;

/// Values saved at cycle start and handed back after dispatch.
pub type ResultContext = SmallVec<[Value; 4]>;

pub use config::AsyncConfig;
pub use deferred::DeferredResult;
pub use error::{AsyncError, StartError};
pub use executor::{TaskExecutor, TaskHandle};
pub use interceptor::{CallableInterceptor, DeferredResultInterceptor, Interception};
pub use manager::{AsyncDefaults, AsyncManager, CyclePhase};
pub use request::AsyncWebRequest;
pub use task::{AsyncTask, TaskInfo};
