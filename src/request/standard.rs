use std::sync::{Arc, Weak};
use std::time::Duration;

use may::sync::mpsc;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{AsyncWebRequest, CompletionHandler, ErrorHandler, TimeoutHandler};
use crate::error::AsyncError;
use crate::ids::RequestId;

/// Message pushed onto the dispatch queue when a request is resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSignal {
    pub request_id: RequestId,
    pub uri: String,
}

#[derive(Default)]
struct Handlers {
    timeout: Vec<TimeoutHandler>,
    error: Vec<ErrorHandler>,
    completion: Vec<CompletionHandler>,
}

#[derive(Default)]
struct RequestState {
    started: bool,
    complete: bool,
    // Bumped on every async start so a stale deadline timer never fires
    // into a later cycle.
    generation: u64,
    timeout_ms: Option<u64>,
}

/// In-process [`AsyncWebRequest`] backed by a may channel.
///
/// The "container" side owns the receiving end of the dispatch queue and
/// drives the lifecycle with [`fire_timeout`](Self::fire_timeout),
/// [`fire_error`](Self::fire_error) and [`complete`](Self::complete).
/// When a timeout is set, starting async handling arms a deadline coroutine
/// that fires the timeout handlers unless the cycle was dispatched first.
pub struct StandardAsyncRequest {
    request_id: RequestId,
    uri: String,
    state: Mutex<RequestState>,
    handlers: Mutex<Handlers>,
    dispatch_tx: Mutex<mpsc::Sender<DispatchSignal>>,
    this: Weak<StandardAsyncRequest>,
}

impl StandardAsyncRequest {
    /// Create a request with its own dispatch queue.
    pub fn new(uri: impl Into<String>) -> (Arc<Self>, mpsc::Receiver<DispatchSignal>) {
        let (tx, rx) = mpsc::channel();
        (Self::with_dispatcher(uri, tx), rx)
    }

    /// Create a request that dispatches onto a shared queue.
    pub fn with_dispatcher(uri: impl Into<String>, tx: mpsc::Sender<DispatchSignal>) -> Arc<Self> {
        let uri = uri.into();
        Arc::new_cyclic(|this| StandardAsyncRequest {
            request_id: RequestId::new(),
            uri,
            state: Mutex::new(RequestState::default()),
            handlers: Mutex::new(Handlers::default()),
            dispatch_tx: Mutex::new(tx),
            this: this.clone(),
        })
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Fire the registered timeout handlers.
    pub fn fire_timeout(&self) {
        let handlers = std::mem::take(&mut self.handlers.lock().timeout);
        debug!(
            request_id = %self.request_id,
            uri = %self.uri,
            handlers = handlers.len(),
            "Async request timeout"
        );
        for handler in handlers {
            handler();
        }
    }

    /// Fire the registered error handlers with `error`.
    pub fn fire_error(&self, error: AsyncError) {
        let handlers = std::mem::take(&mut self.handlers.lock().error);
        debug!(
            request_id = %self.request_id,
            uri = %self.uri,
            handlers = handlers.len(),
            error = %error,
            "Async request error"
        );
        for handler in handlers {
            handler(error.clone());
        }
    }

    /// Complete the request: run completion handlers and drop every other handler.
    pub fn complete(&self) {
        {
            let mut state = self.state.lock();
            if state.complete {
                return;
            }
            state.complete = true;
            state.started = false;
        }
        let handlers = std::mem::take(&mut *self.handlers.lock());
        debug!(
            request_id = %self.request_id,
            uri = %self.uri,
            handlers = handlers.completion.len(),
            "Async request complete"
        );
        for handler in handlers.completion {
            handler();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        let state = self.state.lock();
        state.started && !state.complete && state.generation == generation
    }

    fn arm_deadline(&self, generation: u64, timeout_ms: u64) {
        let this = self.this.clone();
        let request_id = self.request_id;

        // SAFETY: may::coroutine::Builder::spawn() is marked unsafe by the may runtime.
        // The timer only owns a Weak reference and a copy of the request id.
        #[allow(unsafe_code)]
        let spawn_result = unsafe {
            may::coroutine::Builder::new()
                .name(format!("deadline-{request_id}"))
                .spawn(move || {
                    may::coroutine::sleep(Duration::from_millis(timeout_ms));
                    if let Some(request) = this.upgrade() {
                        if request.is_current(generation) {
                            request.fire_timeout();
                        }
                    }
                })
        };

        if let Err(e) = spawn_result {
            warn!(
                request_id = %request_id,
                error = %e,
                "Failed to arm async deadline; timeout will not fire"
            );
        }
    }
}

impl AsyncWebRequest for StandardAsyncRequest {
    fn set_timeout(&self, timeout_ms: u64) {
        self.state.lock().timeout_ms = Some(timeout_ms);
    }

    fn add_timeout_handler(&self, handler: TimeoutHandler) {
        self.handlers.lock().timeout.push(handler);
    }

    fn add_error_handler(&self, handler: ErrorHandler) {
        self.handlers.lock().error.push(handler);
    }

    fn add_completion_handler(&self, handler: CompletionHandler) {
        self.handlers.lock().completion.push(handler);
    }

    fn start_async(&self) -> Result<(), AsyncError> {
        let (generation, timeout_ms) = {
            let mut state = self.state.lock();
            if state.complete {
                return Err(AsyncError::illegal_state(
                    "async processing has already completed and cannot be repeated",
                ));
            }
            if state.started {
                return Ok(());
            }
            state.started = true;
            state.generation += 1;
            (state.generation, state.timeout_ms)
        };

        if let Some(timeout_ms) = timeout_ms {
            self.arm_deadline(generation, timeout_ms);
        }
        Ok(())
    }

    fn is_async_started(&self) -> bool {
        self.state.lock().started
    }

    fn is_async_complete(&self) -> bool {
        self.state.lock().complete
    }

    fn dispatch(&self) {
        if self.state.lock().complete {
            warn!(request_id = %self.request_id, "Dispatch after completion ignored");
            return;
        }
        // Timeout and error handlers belong to the cycle being dispatched.
        // They are dropped before async mode ends so a following cycle only
        // ever sees its own.
        let stale = {
            let mut handlers = self.handlers.lock();
            (
                std::mem::take(&mut handlers.timeout),
                std::mem::take(&mut handlers.error),
            )
        };
        debug!(
            request_id = %self.request_id,
            timeout_handlers = stale.0.len(),
            error_handlers = stale.1.len(),
            "Dropping handlers of dispatched cycle"
        );
        drop(stale);
        self.state.lock().started = false;

        let signal = DispatchSignal {
            request_id: self.request_id,
            uri: self.uri.clone(),
        };
        if let Err(e) = self.dispatch_tx.lock().send(signal) {
            warn!(
                request_id = %self.request_id,
                error = %e,
                "Dispatch queue closed; resumed request dropped"
            );
        }
    }

    fn request_uri(&self) -> Option<String> {
        Some(self.uri.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_start_dispatch_cycle() {
        let (request, rx) = StandardAsyncRequest::new("/orders/7");
        assert!(!request.is_async_started());

        request.start_async().unwrap();
        assert!(request.is_async_started());

        request.dispatch();
        assert!(!request.is_async_started());

        let signal = rx.recv().unwrap();
        assert_eq!(signal.uri, "/orders/7");
        assert_eq!(signal.request_id, request.request_id());
    }

    #[test]
    fn test_start_after_complete_is_illegal() {
        let (request, _rx) = StandardAsyncRequest::new("/done");
        request.complete();
        assert!(request.is_async_complete());
        assert!(matches!(
            request.start_async(),
            Err(AsyncError::IllegalState { .. })
        ));
    }

    #[test]
    fn test_handlers_fire_at_most_once() {
        let (request, _rx) = StandardAsyncRequest::new("/once");
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        request.add_timeout_handler(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let f = Arc::clone(&fired);
        request.add_error_handler(Box::new(move |_| {
            f.fetch_add(10, Ordering::SeqCst);
        }));

        request.fire_timeout();
        request.fire_timeout();
        request.fire_error(AsyncError::Cancelled);
        request.fire_error(AsyncError::Cancelled);
        assert_eq!(fired.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_complete_drops_pending_handlers() {
        let (request, _rx) = StandardAsyncRequest::new("/complete");
        let fired = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&fired);
        request.add_timeout_handler(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let f = Arc::clone(&fired);
        request.add_completion_handler(Box::new(move || {
            f.fetch_add(100, Ordering::SeqCst);
        }));

        request.complete();
        request.complete();
        request.fire_timeout();
        assert_eq!(fired.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_deadline_fires_timeout() {
        let (request, _rx) = StandardAsyncRequest::new("/slow");
        let (tx, rx) = mpsc::channel();
        request.add_timeout_handler(Box::new(move || {
            let _ = tx.send(());
        }));
        request.set_timeout(20);
        request.start_async().unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_dispatch_drops_cycle_handlers() {
        let (request, _rx) = StandardAsyncRequest::new("/cycles");
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        request.add_timeout_handler(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let f = Arc::clone(&fired);
        request.add_error_handler(Box::new(move |_| {
            f.fetch_add(10, Ordering::SeqCst);
        }));
        let f = Arc::clone(&fired);
        request.add_completion_handler(Box::new(move || {
            f.fetch_add(100, Ordering::SeqCst);
        }));

        request.start_async().unwrap();
        request.dispatch();
        request.fire_timeout();
        request.fire_error(AsyncError::Cancelled);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        request.complete();
        assert_eq!(fired.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn test_dispatch_disarms_deadline() {
        let (request, _rx) = StandardAsyncRequest::new("/fast");
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        request.add_timeout_handler(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        request.set_timeout(20);
        request.start_async().unwrap();
        request.dispatch();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
