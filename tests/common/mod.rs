#![allow(dead_code)]

pub mod test_runtime {
    use std::sync::Once;
    use std::time::{Duration, Instant};

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_workers(2).set_stack_size(0x8000);
        });
    }

    /// Poll `condition` until it holds or `timeout` elapses.
    pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        condition()
    }
}

pub mod mock_request {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use webasync::request::{AsyncWebRequest, CompletionHandler, ErrorHandler, TimeoutHandler};
    use webasync::AsyncError;

    #[derive(Default)]
    struct Handlers {
        timeout: Vec<TimeoutHandler>,
        error: Vec<ErrorHandler>,
        completion: Vec<CompletionHandler>,
    }

    /// Scriptable transport.
    ///
    /// Unlike the standard transport, dispatching does not end the started
    /// state; tests flip it with [`MockRequest::set_started`].
    #[derive(Default)]
    pub struct MockRequest {
        started: AtomicBool,
        complete: AtomicBool,
        start_calls: AtomicUsize,
        dispatches: AtomicUsize,
        timeout_ms: Mutex<Option<u64>>,
        start_error: Mutex<Option<AsyncError>>,
        handlers: Mutex<Handlers>,
    }

    impl MockRequest {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn dispatch_count(&self) -> usize {
            self.dispatches.load(Ordering::SeqCst)
        }

        pub fn start_calls(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        pub fn timeout_ms(&self) -> Option<u64> {
            *self.timeout_ms.lock()
        }

        pub fn set_started(&self, started: bool) {
            self.started.store(started, Ordering::SeqCst);
        }

        /// Report the request as complete without running any handler.
        pub fn mark_complete(&self) {
            self.complete.store(true, Ordering::SeqCst);
        }

        pub fn fail_next_start(&self, error: AsyncError) {
            *self.start_error.lock() = Some(error);
        }

        pub fn fire_timeout(&self) {
            let handlers = std::mem::take(&mut self.handlers.lock().timeout);
            for handler in handlers {
                handler();
            }
        }

        pub fn fire_error(&self, error: AsyncError) {
            let handlers = std::mem::take(&mut self.handlers.lock().error);
            for handler in handlers {
                handler(error.clone());
            }
        }

        pub fn complete(&self) {
            self.complete.store(true, Ordering::SeqCst);
            self.started.store(false, Ordering::SeqCst);
            let handlers = std::mem::take(&mut *self.handlers.lock());
            for handler in handlers.completion {
                handler();
            }
        }
    }

    impl AsyncWebRequest for MockRequest {
        fn set_timeout(&self, timeout_ms: u64) {
            *self.timeout_ms.lock() = Some(timeout_ms);
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
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.start_error.lock().take() {
                return Err(error);
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_async_started(&self) -> bool {
            self.started.load(Ordering::SeqCst)
        }

        fn is_async_complete(&self) -> bool {
            self.complete.load(Ordering::SeqCst)
        }

        fn dispatch(&self) {
            self.dispatches.fetch_add(1, Ordering::SeqCst);
        }

        fn request_uri(&self) -> Option<String> {
            Some("/mock".to_string())
        }
    }
}

pub mod executors {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::JoinHandle;
    use webasync::executor::{Job, TaskExecutor, TaskHandle};
    use webasync::AsyncError;

    /// Runs each job on a fresh OS thread.
    #[derive(Default)]
    pub struct ThreadExecutor {
        submitted: AtomicUsize,
        threads: Mutex<Vec<JoinHandle<()>>>,
    }

    impl ThreadExecutor {
        pub fn submitted(&self) -> usize {
            self.submitted.load(Ordering::SeqCst)
        }

        /// Wait for every job submitted so far.
        pub fn join_all(&self) {
            let threads = std::mem::take(&mut *self.threads.lock());
            for thread in threads {
                thread.join().expect("executor thread panicked");
            }
        }
    }

    impl TaskExecutor for ThreadExecutor {
        fn submit(&self, job: Job) -> Result<TaskHandle, AsyncError> {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            let (handle, job) = TaskHandle::wrap(job);
            let thread = std::thread::Builder::new()
                .name("test-executor".to_string())
                .spawn(job)
                .map_err(|e| AsyncError::rejected(e.to_string()))?;
            self.threads.lock().push(thread);
            Ok(handle)
        }

        fn name(&self) -> &str {
            "thread"
        }
    }

    /// Refuses every job.
    pub struct RejectingExecutor;

    impl TaskExecutor for RejectingExecutor {
        fn submit(&self, _job: Job) -> Result<TaskHandle, AsyncError> {
            Err(AsyncError::rejected("saturated"))
        }

        fn name(&self) -> &str {
            "rejecting"
        }
    }
}

pub mod recording {
    use parking_lot::Mutex;
    use std::sync::Arc;
    use webasync::interceptor::{CallableInterceptor, DeferredResultInterceptor};
    use webasync::request::AsyncWebRequest;
    use webasync::{AsyncError, DeferredResult, Outcome, TaskInfo};

    pub type EventLog = Arc<Mutex<Vec<String>>>;

    pub fn event_log() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    /// Records every callback as `"{event}:{tag}"`.
    pub struct Recorder {
        tag: &'static str,
        log: EventLog,
    }

    impl Recorder {
        pub fn callable(tag: &'static str, log: &EventLog) -> Arc<dyn CallableInterceptor> {
            Arc::new(Self {
                tag,
                log: Arc::clone(log),
            })
        }

        pub fn deferred(tag: &'static str, log: &EventLog) -> Arc<dyn DeferredResultInterceptor> {
            Arc::new(Self {
                tag,
                log: Arc::clone(log),
            })
        }

        fn record(&self, event: &str) {
            self.log.lock().push(format!("{event}:{}", self.tag));
        }
    }

    impl CallableInterceptor for Recorder {
        fn before_concurrent_handling(
            &self,
            _request: &dyn AsyncWebRequest,
            _task: &TaskInfo,
        ) -> Result<(), AsyncError> {
            self.record("before");
            Ok(())
        }

        fn pre_process(&self, _request: &dyn AsyncWebRequest, _task: &TaskInfo) -> Result<(), AsyncError> {
            self.record("pre");
            Ok(())
        }

        fn post_process(
            &self,
            _request: &dyn AsyncWebRequest,
            _task: &TaskInfo,
            _result: &mut Outcome,
        ) -> Result<(), AsyncError> {
            self.record("post");
            Ok(())
        }

        fn handle_timeout(
            &self,
            _request: &dyn AsyncWebRequest,
            _task: &TaskInfo,
        ) -> Result<webasync::Interception, AsyncError> {
            self.record("timeout");
            Ok(webasync::Interception::Continue)
        }

        fn handle_error(
            &self,
            _request: &dyn AsyncWebRequest,
            _task: &TaskInfo,
            _error: &AsyncError,
        ) -> Result<webasync::Interception, AsyncError> {
            self.record("error");
            Ok(webasync::Interception::Continue)
        }

        fn after_completion(&self, _request: &dyn AsyncWebRequest, _task: &TaskInfo) -> Result<(), AsyncError> {
            self.record("after");
            Ok(())
        }
    }

    impl DeferredResultInterceptor for Recorder {
        fn before_concurrent_handling(
            &self,
            _request: &dyn AsyncWebRequest,
            _deferred: &DeferredResult,
        ) -> Result<(), AsyncError> {
            self.record("before");
            Ok(())
        }

        fn pre_process(
            &self,
            _request: &dyn AsyncWebRequest,
            _deferred: &DeferredResult,
        ) -> Result<(), AsyncError> {
            self.record("pre");
            Ok(())
        }

        fn post_process(
            &self,
            _request: &dyn AsyncWebRequest,
            _deferred: &DeferredResult,
            _result: &mut Outcome,
        ) -> Result<(), AsyncError> {
            self.record("post");
            Ok(())
        }

        fn handle_timeout(
            &self,
            _request: &dyn AsyncWebRequest,
            _deferred: &DeferredResult,
        ) -> Result<bool, AsyncError> {
            self.record("timeout");
            Ok(true)
        }

        fn handle_error(
            &self,
            _request: &dyn AsyncWebRequest,
            _deferred: &DeferredResult,
            _error: &AsyncError,
        ) -> Result<bool, AsyncError> {
            self.record("error");
            Ok(true)
        }

        fn after_completion(
            &self,
            _request: &dyn AsyncWebRequest,
            _deferred: &DeferredResult,
        ) -> Result<(), AsyncError> {
            self.record("after");
            Ok(())
        }
    }
}
