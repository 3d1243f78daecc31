//! # Manager Module
//!
//! [`AsyncManager`] is the per-request coordinator of asynchronous
//! processing. Request-handling code starts a cycle in one of two modes and
//! returns; the result is produced on another thread, committed exactly once,
//! and the request is dispatched back into the pipeline where the committed
//! result is read.
//!
//! ## Modes
//!
//! - **Callable**: [`start_callable_processing`](AsyncManager::start_callable_processing)
//!   submits an [`AsyncTask`](crate::AsyncTask) to a [`TaskExecutor`].
//! - **Deferred result**: [`start_deferred_result_processing`](AsyncManager::start_deferred_result_processing)
//!   waits for an external producer to fulfil a [`DeferredResult`](crate::DeferredResult).
//!
//! ## Cycle State Machine
//!
//! ```text
//!   Idle ──start──▶ Active ──commit──▶ Committed ──dispatch──▶ Dispatched
//!    ▲                                                             │
//!    └──────────────────── clear / next start ◀────────────────────┘
//! ```
//!
//! The first of {work completion, timeout result, error result, slot
//! fulfillment} commits. Every later commit attempt is ignored, as is any
//! commit arriving after the cycle was cleared.
//!
//! Dispatch is skipped when the transport has already completed or when the
//! committed failure is a client disconnect.

mod core;

pub use self::core::AsyncManager;

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::disconnect::{DisconnectDetector, DisconnectedClientDetector};
use crate::executor::{CoroutineExecutor, TaskExecutor};
use crate::interceptor::{
    CallableInterceptor, DeferredResultInterceptor, TimeoutCallableInterceptor,
    TimeoutDeferredResultInterceptor,
};

/// Phase of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// No cycle, or the last cycle was cleared.
    Idle,
    /// Started; waiting for a result.
    Active,
    /// A result is committed; dispatch was skipped or is in progress.
    Committed,
    /// The transport was asked to dispatch.
    Dispatched,
}

/// Process-wide defaults shared by every manager built from them.
///
/// Built once at startup, usually with
/// [`AsyncConfig::build_defaults`](crate::config::AsyncConfig::build_defaults),
/// and cloned into each [`AsyncManager`].
#[derive(Clone)]
pub struct AsyncDefaults {
    /// Executor for callable tasks that do not name their own.
    pub executor: Arc<dyn TaskExecutor>,
    /// Request timeout applied when neither the task nor the slot sets one.
    pub default_timeout_ms: Option<u64>,
    /// Appended last to every callable chain.
    pub timeout_callable_interceptor: Arc<dyn CallableInterceptor>,
    /// Appended last to every deferred-result chain.
    pub timeout_deferred_result_interceptor: Arc<dyn DeferredResultInterceptor>,
    pub disconnect_detector: Arc<dyn DisconnectDetector>,
}

impl Default for AsyncDefaults {
    fn default() -> Self {
        Self {
            executor: Arc::new(CoroutineExecutor::default()),
            default_timeout_ms: None,
            timeout_callable_interceptor: Arc::new(TimeoutCallableInterceptor),
            timeout_deferred_result_interceptor: Arc::new(TimeoutDeferredResultInterceptor),
            disconnect_detector: Arc::new(DisconnectedClientDetector::default()),
        }
    }
}

impl fmt::Debug for AsyncDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncDefaults")
            .field("executor", &self.executor.name())
            .field("default_timeout_ms", &self.default_timeout_ms)
            .field(
                "timeout_callable_interceptor",
                &self.timeout_callable_interceptor.name(),
            )
            .field(
                "timeout_deferred_result_interceptor",
                &self.timeout_deferred_result_interceptor.name(),
            )
            .finish_non_exhaustive()
    }
}
