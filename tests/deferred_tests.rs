#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use common::mock_request::MockRequest;
use common::recording::{event_log, Recorder};
use common::test_runtime::wait_until;
use webasync::executor::InlineExecutor;
use webasync::request::AsyncWebRequest;
use webasync::{
    AsyncDefaults, AsyncError, AsyncManager, CyclePhase, DeferredResult, DeferredResultInterceptor,
};

const WAIT: Duration = Duration::from_secs(5);

fn deferred_manager() -> (AsyncManager, Arc<MockRequest>) {
    let mut manager = AsyncManager::new(AsyncDefaults {
        executor: Arc::new(InlineExecutor),
        ..AsyncDefaults::default()
    });
    let request = MockRequest::new();
    manager
        .configure_request(Arc::clone(&request) as Arc<dyn AsyncWebRequest>)
        .unwrap();
    (manager, request)
}

#[test]
fn test_result_from_producer_thread() {
    let (manager, request) = deferred_manager();
    let deferred = DeferredResult::new();
    manager
        .start_deferred_result_processing(&deferred, &[json!({"order": 7})])
        .unwrap();
    assert_eq!(manager.cycle_phase(), CyclePhase::Active);
    assert_eq!(request.dispatch_count(), 0);

    let producer = deferred.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(10));
        producer.set_result(json!("shipped"))
    });
    assert!(handle.join().unwrap());

    assert!(wait_until(WAIT, || request.dispatch_count() == 1));
    assert_eq!(manager.concurrent_result(), Some(Ok(json!("shipped"))));
    assert_eq!(
        manager.concurrent_result_context().as_slice(),
        &[json!({"order": 7})]
    );
    assert!(!deferred.set_result(json!("again")));
}

#[test]
fn test_concurrent_producers_one_winner() {
    let (manager, request) = deferred_manager();
    let deferred = DeferredResult::new();
    manager.start_deferred_result_processing(&deferred, &[]).unwrap();

    let producers: Vec<_> = (0..8)
        .map(|i| {
            let producer = deferred.clone();
            std::thread::spawn(move || producer.set_result(json!(i)))
        })
        .collect();
    let winners = producers
        .into_iter()
        .map(|p| p.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    assert_eq!(request.dispatch_count(), 1);
    assert_eq!(manager.concurrent_result(), deferred.result());
}

#[test]
fn test_result_set_before_start_dispatches_immediately() {
    let (manager, request) = deferred_manager();
    let deferred = DeferredResult::new();
    assert!(deferred.set_result(json!("early")));

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();

    assert_eq!(request.dispatch_count(), 1);
    assert_eq!(manager.concurrent_result(), Some(Ok(json!("early"))));
}

#[test]
fn test_timeout_without_result_commits_timeout_error() {
    let (mut manager, request) = deferred_manager();
    let log = event_log();
    manager.register_deferred_result_interceptor("a", Recorder::deferred("a", &log));
    let deferred = DeferredResult::new().with_timeout(1_000);
    let timed_out = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&timed_out);
    deferred.on_timeout(move || flag.store(true, Ordering::SeqCst));

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    assert_eq!(request.timeout_ms(), Some(1_000));
    request.fire_timeout();

    assert!(timed_out.load(Ordering::SeqCst));
    assert_eq!(manager.concurrent_result(), Some(Err(AsyncError::Timeout)));
    assert!(manager.is_error_handling_in_progress());
    assert_eq!(request.dispatch_count(), 1);
    assert!(!deferred.set_result(json!("too late")));
    assert_eq!(
        *log.lock(),
        vec!["before:a", "pre:a", "timeout:a", "post:a"]
    );
}

#[test]
fn test_timeout_result_is_used() {
    let (manager, request) = deferred_manager();
    let deferred = DeferredResult::new().with_timeout_result(Ok(json!({"status": "pending"})));

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    request.fire_timeout();

    assert_eq!(
        manager.concurrent_result(),
        Some(Ok(json!({"status": "pending"})))
    );
    assert!(!manager.is_error_handling_in_progress());
    assert_eq!(request.dispatch_count(), 1);
}

#[test]
fn test_lazy_timeout_result() {
    let (manager, request) = deferred_manager();
    let deferred = DeferredResult::new().with_timeout_result_fn(|| Err(AsyncError::failed("gave up")));

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    request.fire_timeout();

    assert_eq!(
        manager.concurrent_result(),
        Some(Err(AsyncError::failed("gave up")))
    );
}

#[test]
fn test_transport_error_fulfils_slot() {
    let (mut manager, request) = deferred_manager();
    let log = event_log();
    manager.register_deferred_result_interceptor("a", Recorder::deferred("a", &log));
    let deferred = DeferredResult::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    deferred.on_error(move |error| *sink.lock() = Some(error.clone()));

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    request.fire_error(AsyncError::failed("upstream closed"));

    assert_eq!(*seen.lock(), Some(AsyncError::failed("upstream closed")));
    assert_eq!(
        deferred.result(),
        Some(Err(AsyncError::failed("upstream closed")))
    );
    assert_eq!(
        manager.concurrent_result(),
        Some(Err(AsyncError::failed("upstream closed")))
    );
    assert_eq!(request.dispatch_count(), 1);
    // The slot's own hook handles the error and stops the chain.
    assert!(!log.lock().contains(&"error:a".to_string()));
}

#[test]
fn test_ordering_and_completion() {
    let (mut manager, request) = deferred_manager();
    let log = event_log();
    manager.register_deferred_result_interceptor("a", Recorder::deferred("a", &log));
    manager.register_deferred_result_interceptor("b", Recorder::deferred("b", &log));
    let deferred = DeferredResult::new();
    let completed = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&completed);
    deferred.on_completion(move || flag.store(true, Ordering::SeqCst));

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    assert!(deferred.set_result(json!(1)));
    request.complete();

    assert_eq!(
        *log.lock(),
        vec!["before:a", "before:b", "pre:a", "pre:b", "post:b", "post:a", "after:a", "after:b"]
    );
    assert!(completed.load(Ordering::SeqCst));
    assert!(deferred.is_set_or_expired());
}

#[test]
fn test_completion_expires_pending_slot() {
    let (manager, request) = deferred_manager();
    let deferred = DeferredResult::new();

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    request.complete();

    assert!(deferred.is_set_or_expired());
    assert!(!deferred.set_result(json!("nobody listening")));
    assert!(!manager.has_concurrent_result());
    assert_eq!(request.dispatch_count(), 0);
}

struct FailingPreProcess;

impl DeferredResultInterceptor for FailingPreProcess {
    fn pre_process(
        &self,
        _request: &dyn AsyncWebRequest,
        _deferred: &DeferredResult,
    ) -> Result<(), AsyncError> {
        Err(AsyncError::failed("pre_process refused"))
    }
}

#[test]
fn test_pre_process_failure_is_committed() {
    let (mut manager, request) = deferred_manager();
    manager.register_deferred_result_interceptor("failing", Arc::new(FailingPreProcess));
    let deferred = DeferredResult::new();

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();

    assert_eq!(
        manager.concurrent_result(),
        Some(Err(AsyncError::failed("pre_process refused")))
    );
    assert_eq!(request.dispatch_count(), 1);

    // The slot never got a handler, so a producer cannot override the failure.
    assert!(deferred.set_result(json!("ignored")));
    assert_eq!(
        manager.concurrent_result(),
        Some(Err(AsyncError::failed("pre_process refused")))
    );
    assert_eq!(request.dispatch_count(), 1);
}

#[test]
fn test_slot_cannot_serve_two_cycles() {
    let (manager, request) = deferred_manager();
    let deferred = DeferredResult::new();
    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    assert!(deferred.set_result(json!(1)));
    manager.clear_concurrent_result();
    request.set_started(false);

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    assert!(matches!(
        manager.concurrent_result(),
        Some(Err(AsyncError::IllegalState { .. }))
    ));
}

struct PanickingPostProcess;

impl DeferredResultInterceptor for PanickingPostProcess {
    fn post_process(
        &self,
        _request: &dyn AsyncWebRequest,
        _deferred: &DeferredResult,
        _result: &mut webasync::Outcome,
    ) -> Result<(), AsyncError> {
        panic!("slot hook exploded")
    }
}

#[test]
fn test_panicking_post_process_is_committed() {
    let (mut manager, request) = deferred_manager();
    manager.register_deferred_result_interceptor("panic", Arc::new(PanickingPostProcess));
    let deferred = DeferredResult::new();
    manager.start_deferred_result_processing(&deferred, &[]).unwrap();

    let producer = deferred.clone();
    std::thread::spawn(move || producer.set_result(json!("value")))
        .join()
        .unwrap();

    assert_eq!(
        manager.concurrent_result(),
        Some(Err(AsyncError::Panicked {
            message: "slot hook exploded".to_string()
        }))
    );
    assert!(manager.is_error_handling_in_progress());
    assert_eq!(request.dispatch_count(), 1);
}
