use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::{AsyncDefaults, CyclePhase};
use crate::deferred::DeferredResult;
use crate::disconnect::DisconnectDetector;
use crate::error::{AsyncError, StartError};
use crate::executor::{Job, TaskExecutor};
use crate::interceptor::{
    identity_key, CallableInterceptor, CallableInterceptorChain, DeferredResultInterceptor,
    DeferredResultInterceptorChain, InterceptorRegistry,
};
use crate::request::{describe, AsyncWebRequest};
use crate::task::AsyncTask;
use crate::{Outcome, ResultContext};

/// State shared between the request thread, the producing thread and the
/// dispatch thread. Commit and reset both go through this one lock.
#[derive(Debug)]
struct CycleState {
    result: Option<Outcome>,
    context: ResultContext,
    error_handling_in_progress: bool,
    phase: CyclePhase,
    // Cycle that currently owns the state; commits from any other cycle are dropped.
    generation: u64,
}

impl Default for CycleState {
    fn default() -> Self {
        Self {
            result: None,
            context: ResultContext::new(),
            error_handling_in_progress: false,
            phase: CyclePhase::Idle,
            generation: 0,
        }
    }
}

/// Coordinator of asynchronous processing for one request.
///
/// Configure the transport with [`configure_request`](Self::configure_request),
/// register interceptors, then start a cycle. The start call returns as soon
/// as the work is handed off. Once the transport dispatches the request, the
/// resuming code reads [`concurrent_result`](Self::concurrent_result) and
/// calls [`clear_concurrent_result`](Self::clear_concurrent_result) before
/// reusing the manager.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use std::time::Duration;
/// use serde_json::json;
/// use webasync::executor::InlineExecutor;
/// use webasync::request::StandardAsyncRequest;
/// use webasync::{AsyncDefaults, AsyncManager, AsyncTask};
///
/// let defaults = AsyncDefaults {
///     executor: Arc::new(InlineExecutor),
///     ..AsyncDefaults::default()
/// };
/// let mut manager = AsyncManager::new(defaults);
/// let (request, dispatched) = StandardAsyncRequest::new("/reports/42");
/// manager.configure_request(request).unwrap();
///
/// manager
///     .start_callable_processing(AsyncTask::new(|| Ok(json!("ok"))), &[json!("ctx")])
///     .unwrap();
///
/// let signal = dispatched.recv_timeout(Duration::from_secs(1)).unwrap();
/// assert_eq!(signal.uri, "/reports/42");
/// assert_eq!(manager.concurrent_result(), Some(Ok(json!("ok"))));
/// assert_eq!(manager.concurrent_result_context().as_slice(), &[json!("ctx")]);
/// ```
pub struct AsyncManager {
    request: Option<Arc<dyn AsyncWebRequest>>,
    executor: Arc<dyn TaskExecutor>,
    default_timeout_ms: Option<u64>,
    timeout_callable_interceptor: Arc<dyn CallableInterceptor>,
    timeout_deferred_result_interceptor: Arc<dyn DeferredResultInterceptor>,
    disconnect_detector: Arc<dyn DisconnectDetector>,
    callable_interceptors: InterceptorRegistry<dyn CallableInterceptor>,
    deferred_result_interceptors: InterceptorRegistry<dyn DeferredResultInterceptor>,
    state: Arc<Mutex<CycleState>>,
    generations: AtomicU64,
}

impl Default for AsyncManager {
    fn default() -> Self {
        Self::new(AsyncDefaults::default())
    }
}

impl AsyncManager {
    #[must_use]
    pub fn new(defaults: AsyncDefaults) -> Self {
        Self {
            request: None,
            executor: defaults.executor,
            default_timeout_ms: defaults.default_timeout_ms,
            timeout_callable_interceptor: defaults.timeout_callable_interceptor,
            timeout_deferred_result_interceptor: defaults.timeout_deferred_result_interceptor,
            disconnect_detector: defaults.disconnect_detector,
            callable_interceptors: InterceptorRegistry::new(),
            deferred_result_interceptors: InterceptorRegistry::new(),
            state: Arc::new(Mutex::new(CycleState::default())),
            generations: AtomicU64::new(0),
        }
    }

    /// Set the transport for this request.
    ///
    /// Fails with `IllegalState` while concurrent handling is in progress.
    pub fn configure_request(&mut self, request: Arc<dyn AsyncWebRequest>) -> Result<(), AsyncError> {
        if self.is_concurrent_handling_started() {
            return Err(AsyncError::illegal_state(
                "cannot replace the request while concurrent handling is in progress",
            ));
        }
        self.request = Some(request);
        Ok(())
    }

    /// Replace the executor used by callable tasks without an executor of their own.
    pub fn configure_executor(&mut self, executor: Arc<dyn TaskExecutor>) {
        self.executor = executor;
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<dyn TaskExecutor> {
        &self.executor
    }

    /// Whether the configured transport is in async mode.
    ///
    /// Turns `false` again once the request has been dispatched.
    #[must_use]
    pub fn is_concurrent_handling_started(&self) -> bool {
        self.request
            .as_ref()
            .is_some_and(|request| request.is_async_started())
    }

    #[must_use]
    pub fn has_concurrent_result(&self) -> bool {
        self.state.lock().result.is_some()
    }

    /// The committed result, `None` until a commit happens.
    #[must_use]
    pub fn concurrent_result(&self) -> Option<Outcome> {
        self.state.lock().result.clone()
    }

    /// Values saved when the cycle started.
    #[must_use]
    pub fn concurrent_result_context(&self) -> ResultContext {
        self.state.lock().context.clone()
    }

    /// Whether the committed result is a failure.
    #[must_use]
    pub fn is_error_handling_in_progress(&self) -> bool {
        self.state.lock().error_handling_in_progress
    }

    #[must_use]
    pub fn cycle_phase(&self) -> CyclePhase {
        self.state.lock().phase
    }

    /// Reset the result and context so the manager can run another cycle.
    pub fn clear_concurrent_result(&self) {
        let mut state = self.state.lock();
        state.result = None;
        state.context = ResultContext::new();
        state.phase = CyclePhase::Idle;
    }

    /// Register a callable interceptor under `key`, replacing any previous one.
    pub fn register_callable_interceptor(
        &mut self,
        key: impl Into<String>,
        interceptor: Arc<dyn CallableInterceptor>,
    ) -> Option<Arc<dyn CallableInterceptor>> {
        self.callable_interceptors.insert(key, interceptor)
    }

    /// Register callable interceptors under keys derived from their identity.
    pub fn register_callable_interceptors<I>(&mut self, interceptors: I)
    where
        I: IntoIterator<Item = Arc<dyn CallableInterceptor>>,
    {
        for interceptor in interceptors {
            let key = identity_key(interceptor.name(), &interceptor);
            self.callable_interceptors.insert(key, interceptor);
        }
    }

    #[must_use]
    pub fn callable_interceptor(&self, key: &str) -> Option<Arc<dyn CallableInterceptor>> {
        self.callable_interceptors.get(key).map(Arc::clone)
    }

    pub fn register_deferred_result_interceptor(
        &mut self,
        key: impl Into<String>,
        interceptor: Arc<dyn DeferredResultInterceptor>,
    ) -> Option<Arc<dyn DeferredResultInterceptor>> {
        self.deferred_result_interceptors.insert(key, interceptor)
    }

    pub fn register_deferred_result_interceptors<I>(&mut self, interceptors: I)
    where
        I: IntoIterator<Item = Arc<dyn DeferredResultInterceptor>>,
    {
        for interceptor in interceptors {
            let key = identity_key(interceptor.name(), &interceptor);
            self.deferred_result_interceptors.insert(key, interceptor);
        }
    }

    #[must_use]
    pub fn deferred_result_interceptor(&self, key: &str) -> Option<Arc<dyn DeferredResultInterceptor>> {
        self.deferred_result_interceptors.get(key).map(Arc::clone)
    }

    /// Start a callable cycle: run `task` on an executor and commit its outcome.
    ///
    /// `context` is saved and readable through
    /// [`concurrent_result_context`](Self::concurrent_result_context) after
    /// dispatch. Once this returns `Ok`, every failure, including the
    /// executor rejecting the job, is committed as the result.
    pub fn start_callable_processing(&self, task: AsyncTask, context: &[Value]) -> Result<(), StartError> {
        let request = self.startable_request()?;
        let parts = task.into_parts();

        if let Some(timeout_ms) = parts.timeout_ms.or(self.default_timeout_ms) {
            request.set_timeout(timeout_ms);
        }
        let executor = parts.executor.unwrap_or_else(|| Arc::clone(&self.executor));

        let mut interceptors: Vec<Arc<dyn CallableInterceptor>> =
            Vec::with_capacity(self.callable_interceptors.len() + 2);
        interceptors.extend(parts.interceptor);
        interceptors.extend(self.callable_interceptors.values().map(Arc::clone));
        interceptors.push(Arc::clone(&self.timeout_callable_interceptor));
        let chain = Arc::new(CallableInterceptorChain::new(interceptors));
        let committer = self.committer(&request);
        let info = parts.info;

        {
            let chain = Arc::clone(&chain);
            let info = Arc::clone(&info);
            let committer = committer.clone();
            request.add_timeout_handler(Box::new(move || {
                let Some(request) = committer.live_request() else {
                    return;
                };
                debug!(uri = %describe(request.as_ref()), task = %info.label(), "Async request timeout");
                let result = match run_guarded(|| Ok(chain.trigger_after_timeout(request.as_ref(), &info))) {
                    Ok(Some(result)) => result,
                    Ok(None) => return,
                    Err(panic) => Err(panic),
                };
                committer.commit(result);
            }));
        }
        {
            let chain = Arc::clone(&chain);
            let info = Arc::clone(&info);
            let committer = committer.clone();
            request.add_error_handler(Box::new(move |error| {
                let Some(request) = committer.live_request() else {
                    return;
                };
                debug!(
                    uri = %describe(request.as_ref()),
                    task = %info.label(),
                    error = %error,
                    "Async request error"
                );
                let result = match run_guarded(|| Ok(chain.trigger_after_error(request.as_ref(), &info, &error))) {
                    Ok(answer) => answer.unwrap_or(Err(error)),
                    Err(panic) => Err(panic),
                };
                committer.commit(result);
            }));
        }
        {
            let chain = Arc::clone(&chain);
            let info = Arc::clone(&info);
            let committer = committer.clone();
            request.add_completion_handler(Box::new(move || {
                if let Some(request) = committer.request() {
                    chain.trigger_after_completion(request.as_ref(), &info);
                }
            }));
        }

        chain
            .apply_before_concurrent_handling(request.as_ref(), &info)
            .map_err(StartError::Interceptor)?;
        self.start_async_processing(request.as_ref(), context.iter().cloned().collect(), &committer)?;

        let job: Job = {
            let chain = Arc::clone(&chain);
            let info = Arc::clone(&info);
            let request = Arc::clone(&request);
            let committer = committer.clone();
            let work = parts.work;
            Box::new(move || {
                let result = run_guarded(|| {
                    let result = match chain.apply_pre_process(request.as_ref(), &info) {
                        Ok(()) => run_guarded(work),
                        Err(e) => Err(e),
                    };
                    chain.apply_post_process(request.as_ref(), &info, result)
                });
                committer.commit(result);
            })
        };

        match executor.submit(job) {
            Ok(handle) => {
                debug!(
                    executor = %executor.name(),
                    task = %info.label(),
                    task_id = %handle.id(),
                    "Async task submitted"
                );
                info.set_handle(handle);
            }
            Err(e) => {
                warn!(
                    executor = %executor.name(),
                    task = %info.label(),
                    error = %e,
                    "Executor rejected async task"
                );
                let result = run_guarded(|| chain.apply_post_process(request.as_ref(), &info, Err(e)));
                committer.commit(result);
            }
        }
        Ok(())
    }

    /// Start a deferred-result cycle: commit whatever fulfils `deferred` first.
    pub fn start_deferred_result_processing(
        &self,
        deferred: &DeferredResult,
        context: &[Value],
    ) -> Result<(), StartError> {
        let request = self.startable_request()?;

        if let Some(timeout_ms) = deferred.timeout_ms().or(self.default_timeout_ms) {
            request.set_timeout(timeout_ms);
        }

        let mut interceptors: Vec<Arc<dyn DeferredResultInterceptor>> =
            Vec::with_capacity(self.deferred_result_interceptors.len() + 2);
        interceptors.push(DeferredResult::interceptor());
        interceptors.extend(self.deferred_result_interceptors.values().map(Arc::clone));
        interceptors.push(Arc::clone(&self.timeout_deferred_result_interceptor));
        let chain = Arc::new(DeferredResultInterceptorChain::new(interceptors));
        let committer = self.committer(&request);

        {
            let chain = Arc::clone(&chain);
            let deferred = deferred.clone();
            let committer = committer.clone();
            request.add_timeout_handler(Box::new(move || {
                let Some(request) = committer.live_request() else {
                    return;
                };
                debug!(uri = %describe(request.as_ref()), "Async request timeout");
                if let Err(e) = run_guarded(|| chain.trigger_after_timeout(request.as_ref(), &deferred)) {
                    committer.commit(Err(e));
                }
            }));
        }
        {
            let chain = Arc::clone(&chain);
            let deferred = deferred.clone();
            let committer = committer.clone();
            request.add_error_handler(Box::new(move |error| {
                let Some(request) = committer.live_request() else {
                    return;
                };
                debug!(uri = %describe(request.as_ref()), error = %error, "Async request error");
                match run_guarded(|| chain.trigger_after_error(request.as_ref(), &deferred, &error)) {
                    Ok(true) => {
                        deferred.set_error_result(error);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        committer.commit(Err(e));
                    }
                }
            }));
        }
        {
            let chain = Arc::clone(&chain);
            let deferred = deferred.clone();
            let committer = committer.clone();
            request.add_completion_handler(Box::new(move || {
                if let Some(request) = committer.request() {
                    chain.trigger_after_completion(request.as_ref(), &deferred);
                }
            }));
        }

        chain
            .apply_before_concurrent_handling(request.as_ref(), deferred)
            .map_err(StartError::Interceptor)?;
        self.start_async_processing(request.as_ref(), context.iter().cloned().collect(), &committer)?;

        let pre_processed = run_guarded(|| chain.apply_pre_process(request.as_ref(), deferred));
        let installed = pre_processed.and_then(|()| {
            let chain = Arc::clone(&chain);
            let committer = committer.clone();
            deferred.set_result_handler(Box::new(move |deferred, result| {
                let result = match committer.request() {
                    Some(request) => run_guarded(|| chain.apply_post_process(request.as_ref(), deferred, result)),
                    None => result,
                };
                committer.commit(result);
            }))
        });
        if let Err(e) = installed {
            debug!(error = %e, "Deferred result could not be armed; committing failure");
            committer.commit(Err(e));
        }
        Ok(())
    }

    fn startable_request(&self) -> Result<Arc<dyn AsyncWebRequest>, StartError> {
        let request = self
            .request
            .as_ref()
            .map(Arc::clone)
            .ok_or(StartError::RequestNotConfigured)?;
        if request.is_async_started() && self.cycle_phase() != CyclePhase::Idle {
            return Err(StartError::AlreadyStarted);
        }
        Ok(request)
    }

    fn start_async_processing(
        &self,
        request: &dyn AsyncWebRequest,
        context: ResultContext,
        committer: &Committer,
    ) -> Result<(), StartError> {
        {
            let mut state = self.state.lock();
            state.result = None;
            state.context = context;
            state.error_handling_in_progress = false;
            state.phase = CyclePhase::Active;
            state.generation = committer.generation;
        }

        if let Err(e) = request.start_async() {
            self.state.lock().phase = CyclePhase::Idle;
            return Err(StartError::Request(e));
        }
        debug!(uri = %describe(request), generation = committer.generation, "Started async request");
        Ok(())
    }

    /// Committer for a new cycle. The cycle owns the shared state only once
    /// it has started.
    fn committer(&self, request: &Arc<dyn AsyncWebRequest>) -> Committer {
        Committer {
            generation: self.generations.fetch_add(1, Ordering::Relaxed) + 1,
            state: Arc::clone(&self.state),
            request: Arc::downgrade(request),
            detector: Arc::clone(&self.disconnect_detector),
        }
    }
}

impl fmt::Debug for AsyncManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncManager")
            .field("request", &self.request.as_ref().map(|r| describe(r.as_ref())))
            .field("executor", &self.executor.name())
            .field(
                "callable_interceptors",
                &self.callable_interceptors.keys().collect::<Vec<_>>(),
            )
            .field(
                "deferred_result_interceptors",
                &self.deferred_result_interceptors.keys().collect::<Vec<_>>(),
            )
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// Run `f`, turning a panic into [`AsyncError::Panicked`].
fn run_guarded<T>(f: impl FnOnce() -> Result<T, AsyncError>) -> Result<T, AsyncError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        let error = AsyncError::from_panic(panic.as_ref());
        warn!(error = %error, "Async processing panicked; committing the panic");
        Err(error)
    })
}

/// Commits a cycle's result and dispatches the request.
///
/// Handlers registered on the transport hold one of these; it keeps only a
/// weak reference to the transport so the handlers never keep it alive.
/// Each committer belongs to one cycle and is inert once another cycle has
/// started on the same manager.
#[derive(Clone)]
struct Committer {
    generation: u64,
    state: Arc<Mutex<CycleState>>,
    request: Weak<dyn AsyncWebRequest>,
    detector: Arc<dyn DisconnectDetector>,
}

impl Committer {
    fn request(&self) -> Option<Arc<dyn AsyncWebRequest>> {
        self.request.upgrade()
    }

    /// The transport, if this cycle is still waiting for its result.
    fn live_request(&self) -> Option<Arc<dyn AsyncWebRequest>> {
        {
            let state = self.state.lock();
            if state.generation != self.generation || state.phase != CyclePhase::Active {
                debug!(
                    generation = self.generation,
                    current = state.generation,
                    phase = ?state.phase,
                    "Ignoring transport event for a settled cycle"
                );
                return None;
            }
        }
        self.request()
    }

    /// Commit `result` if nothing was committed this cycle, then dispatch.
    ///
    /// Returns whether this call won the commit.
    fn commit(&self, result: Outcome) -> bool {
        let error = {
            let mut state = self.state.lock();
            if state.generation != self.generation {
                debug!(
                    generation = self.generation,
                    current = state.generation,
                    "Result belongs to an earlier cycle; ignoring"
                );
                return false;
            }
            if state.phase != CyclePhase::Active || state.result.is_some() {
                debug!(phase = ?state.phase, "Async result already set; ignoring late result");
                return false;
            }
            let error = result.as_ref().err().filter(|e| !e.is_response_handled()).cloned();
            state.error_handling_in_progress = error.is_some();
            state.result = Some(result);
            state.phase = CyclePhase::Committed;
            error
        };

        let Some(request) = self.request() else {
            debug!("Async result set but request is gone");
            return true;
        };
        let uri = describe(request.as_ref());

        if request.is_async_complete() {
            debug!(uri = %uri, "Async result set but request already complete");
            return true;
        }
        if let Some(error) = &error {
            if self.detector.check_and_log(error) {
                return true;
            }
        }

        {
            let mut state = self.state.lock();
            if state.generation == self.generation && state.phase == CyclePhase::Committed {
                state.phase = CyclePhase::Dispatched;
            }
        }
        debug!(
            uri = %uri,
            error = error.is_some(),
            "Async {}, dispatch to request",
            if error.is_some() { "error" } else { "result set" }
        );
        request.dispatch();
        true
    }
}
