//! Write-once result slot fulfilled by an external producer.
//!
//! A [`DeferredResult`] is handed out by request-handling code and fulfilled
//! later, from any thread, by whatever produces the value: a message
//! consumer, a scheduled job, another request. The first fulfillment wins;
//! every later attempt is a no-op that returns `false`.
//!
//! Clones share the same slot.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::AsyncError;
use crate::interceptor::DeferredResultInterceptor;
use crate::request::AsyncWebRequest;
use crate::Outcome;

/// Callback invoked with the winning outcome, exactly once.
pub(crate) type ResultHandler = Box<dyn FnOnce(&DeferredResult, Outcome) + Send + 'static>;

type TimeoutSupplier = Box<dyn FnOnce() -> Outcome + Send + 'static>;

enum TimeoutResult {
    None,
    Fixed(Outcome),
    Supplier(TimeoutSupplier),
}

impl TimeoutResult {
    fn take(&mut self) -> Option<Outcome> {
        match std::mem::replace(self, TimeoutResult::None) {
            TimeoutResult::None => None,
            TimeoutResult::Fixed(outcome) => Some(outcome),
            TimeoutResult::Supplier(supplier) => Some(supplier()),
        }
    }
}

#[derive(Default)]
struct Slot {
    result: Option<Outcome>,
    handler: Option<ResultHandler>,
    handler_installed: bool,
    expired: bool,
}

#[derive(Default)]
struct Callbacks {
    on_timeout: Option<Box<dyn FnOnce() + Send + 'static>>,
    on_error: Option<Box<dyn FnOnce(&AsyncError) + Send + 'static>>,
    on_completion: Option<Box<dyn FnOnce() + Send + 'static>>,
}

struct Inner {
    timeout_ms: Mutex<Option<u64>>,
    timeout_result: Mutex<TimeoutResult>,
    slot: Mutex<Slot>,
    callbacks: Mutex<Callbacks>,
}

/// Single-assignment result slot with a one-shot result handler.
///
/// ```rust
/// use serde_json::json;
/// use webasync::DeferredResult;
///
/// let deferred = DeferredResult::new().with_timeout(1_000);
/// let producer = deferred.clone();
///
/// assert!(producer.set_result(json!("first")));
/// assert!(!producer.set_result(json!("second")));
/// assert_eq!(deferred.result(), Some(Ok(json!("first"))));
/// ```
#[derive(Clone)]
pub struct DeferredResult {
    inner: Arc<Inner>,
}

impl Default for DeferredResult {
    fn default() -> Self {
        Self::new()
    }
}

impl DeferredResult {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                timeout_ms: Mutex::new(None),
                timeout_result: Mutex::new(TimeoutResult::None),
                slot: Mutex::new(Slot::default()),
                callbacks: Mutex::new(Callbacks::default()),
            }),
        }
    }

    /// Request timeout to apply while this slot is pending.
    #[must_use]
    pub fn with_timeout(self, timeout_ms: u64) -> Self {
        *self.inner.timeout_ms.lock() = Some(timeout_ms);
        self
    }

    /// Fixed outcome used to fulfil the slot when the request times out.
    #[must_use]
    pub fn with_timeout_result(self, outcome: Outcome) -> Self {
        *self.inner.timeout_result.lock() = TimeoutResult::Fixed(outcome);
        self
    }

    /// Like [`with_timeout_result`](Self::with_timeout_result), computed lazily on timeout.
    #[must_use]
    pub fn with_timeout_result_fn<F>(self, supplier: F) -> Self
    where
        F: FnOnce() -> Outcome + Send + 'static,
    {
        *self.inner.timeout_result.lock() = TimeoutResult::Supplier(Box::new(supplier));
        self
    }

    #[must_use]
    pub fn timeout_ms(&self) -> Option<u64> {
        *self.inner.timeout_ms.lock()
    }

    /// Run `callback` when the request times out, before any timeout result is applied.
    pub fn on_timeout<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.callbacks.lock().on_timeout = Some(Box::new(callback));
    }

    /// Run `callback` when the transport reports an error.
    pub fn on_error<F>(&self, callback: F)
    where
        F: FnOnce(&AsyncError) + Send + 'static,
    {
        self.inner.callbacks.lock().on_error = Some(Box::new(callback));
    }

    pub fn on_completion<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.callbacks.lock().on_completion = Some(Box::new(callback));
    }

    /// Fulfil the slot with a value. Returns `true` only for the winning fulfillment.
    pub fn set_result(&self, value: Value) -> bool {
        self.fulfil(Ok(value))
    }

    /// Fulfil the slot with a failure. Returns `true` only for the winning fulfillment.
    pub fn set_error_result(&self, error: AsyncError) -> bool {
        self.fulfil(Err(error))
    }

    #[must_use]
    pub fn has_result(&self) -> bool {
        self.inner.slot.lock().result.is_some()
    }

    #[must_use]
    pub fn result(&self) -> Option<Outcome> {
        self.inner.slot.lock().result.clone()
    }

    /// Whether the slot was fulfilled or its request already completed.
    #[must_use]
    pub fn is_set_or_expired(&self) -> bool {
        let slot = self.inner.slot.lock();
        slot.result.is_some() || slot.expired
    }

    fn fulfil(&self, outcome: Outcome) -> bool {
        let (handler, outcome) = {
            let mut slot = self.inner.slot.lock();
            if slot.result.is_some() || slot.expired {
                debug!(expired = slot.expired, "Deferred result already set or expired; ignoring");
                return false;
            }
            slot.result = Some(outcome.clone());
            match slot.handler.take() {
                Some(handler) => (handler, outcome),
                // The handler picks the stored result up when installed.
                None => return true,
            }
        };
        handler(self, outcome);
        true
    }

    /// Install the one-shot handler. Fires immediately when a result is already stored.
    pub(crate) fn set_result_handler(&self, handler: ResultHandler) -> Result<(), AsyncError> {
        let stored = {
            let mut slot = self.inner.slot.lock();
            if slot.expired {
                return Err(AsyncError::illegal_state(
                    "deferred result has expired; its request already completed",
                ));
            }
            if slot.handler_installed {
                return Err(AsyncError::illegal_state(
                    "deferred result handler is already installed",
                ));
            }
            slot.handler_installed = true;
            match slot.result.clone() {
                Some(outcome) => outcome,
                None => {
                    slot.handler = Some(handler);
                    return Ok(());
                }
            }
        };
        handler(self, stored);
        Ok(())
    }

    /// The slot's own lifecycle interceptor, first in every deferred chain.
    pub(crate) fn interceptor() -> Arc<dyn DeferredResultInterceptor> {
        Arc::new(SlotLifecycle)
    }

    fn expire(&self) {
        let mut slot = self.inner.slot.lock();
        slot.expired = true;
        slot.handler = None;
    }
}

impl fmt::Debug for DeferredResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("DeferredResult")
            .field("timeout_ms", &*self.inner.timeout_ms.lock())
            .field("result", &slot.result)
            .field("handler_installed", &slot.handler_installed)
            .field("expired", &slot.expired)
            .finish()
    }
}

/// Applies the slot's callbacks and timeout result to the cycle.
struct SlotLifecycle;

impl DeferredResultInterceptor for SlotLifecycle {
    fn name(&self) -> &'static str {
        "deferred_result_lifecycle"
    }

    fn handle_timeout(
        &self,
        _request: &dyn AsyncWebRequest,
        deferred: &DeferredResult,
    ) -> Result<bool, AsyncError> {
        let callback = deferred.inner.callbacks.lock().on_timeout.take();
        if let Some(callback) = callback {
            callback();
        }
        let timeout_result = deferred.inner.timeout_result.lock().take();
        match timeout_result {
            Some(outcome) => {
                deferred.fulfil(outcome);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    fn handle_error(
        &self,
        _request: &dyn AsyncWebRequest,
        deferred: &DeferredResult,
        error: &AsyncError,
    ) -> Result<bool, AsyncError> {
        let callback = deferred.inner.callbacks.lock().on_error.take();
        if let Some(callback) = callback {
            callback(error);
        }
        deferred.set_error_result(error.clone());
        Ok(false)
    }

    fn after_completion(
        &self,
        _request: &dyn AsyncWebRequest,
        deferred: &DeferredResult,
    ) -> Result<(), AsyncError> {
        deferred.expire();
        let callback = deferred.inner.callbacks.lock().on_completion.take();
        if let Some(callback) = callback {
            callback();
        }
        Ok(())
    }
}
