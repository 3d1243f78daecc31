use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::DeferredResultInterceptor;
use crate::deferred::DeferredResult;
use crate::error::AsyncError;
use crate::request::AsyncWebRequest;
use crate::Outcome;

/// Ordered chain of [`DeferredResultInterceptor`]s for one deferred cycle.
pub struct DeferredResultInterceptorChain {
    interceptors: Vec<Arc<dyn DeferredResultInterceptor>>,
    pre_processed: AtomicUsize,
}

impl DeferredResultInterceptorChain {
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn DeferredResultInterceptor>>) -> Self {
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
        deferred: &DeferredResult,
    ) -> Result<(), AsyncError> {
        for interceptor in &self.interceptors {
            interceptor.before_concurrent_handling(request, deferred)?;
        }
        Ok(())
    }

    pub fn apply_pre_process(
        &self,
        request: &dyn AsyncWebRequest,
        deferred: &DeferredResult,
    ) -> Result<(), AsyncError> {
        for (i, interceptor) in self.interceptors.iter().enumerate() {
            interceptor.pre_process(request, deferred)?;
            self.pre_processed.store(i + 1, Ordering::Release);
        }
        Ok(())
    }

    pub fn apply_post_process(
        &self,
        request: &dyn AsyncWebRequest,
        deferred: &DeferredResult,
        mut result: Outcome,
    ) -> Outcome {
        let count = self.pre_processed.load(Ordering::Acquire);
        for interceptor in self.interceptors[..count].iter().rev() {
            if let Err(e) = interceptor.post_process(request, deferred, &mut result) {
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

    /// Give each hook a chance to fulfil the slot on timeout.
    ///
    /// Stops as soon as the slot is set or expired, or a hook answers `false`.
    pub fn trigger_after_timeout(
        &self,
        request: &dyn AsyncWebRequest,
        deferred: &DeferredResult,
    ) -> Result<(), AsyncError> {
        for interceptor in &self.interceptors {
            if deferred.is_set_or_expired() {
                return Ok(());
            }
            if !interceptor.handle_timeout(request, deferred)? {
                break;
            }
        }
        Ok(())
    }

    /// Returns `Ok(true)` when every hook let processing continue, in which
    /// case the caller fulfils the slot with the error.
    pub fn trigger_after_error(
        &self,
        request: &dyn AsyncWebRequest,
        deferred: &DeferredResult,
        error: &AsyncError,
    ) -> Result<bool, AsyncError> {
        for interceptor in &self.interceptors {
            if deferred.is_set_or_expired() {
                return Ok(false);
            }
            if !interceptor.handle_error(request, deferred, error)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn trigger_after_completion(&self, request: &dyn AsyncWebRequest, deferred: &DeferredResult) {
        for interceptor in &self.interceptors {
            if let Err(e) = interceptor.after_completion(request, deferred) {
                warn!(
                    interceptor = interceptor.name(),
                    error = %e,
                    "after_completion failed"
                );
            }
        }
    }
}

/// Terminal hook: fulfils an unset slot with [`AsyncError::Timeout`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeoutDeferredResultInterceptor;

impl DeferredResultInterceptor for TimeoutDeferredResultInterceptor {
    fn handle_timeout(
        &self,
        _request: &dyn AsyncWebRequest,
        deferred: &DeferredResult,
    ) -> Result<bool, AsyncError> {
        deferred.set_error_result(AsyncError::Timeout);
        Ok(true)
    }
}
