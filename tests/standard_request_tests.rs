#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::test_runtime::setup_may_runtime;
use webasync::executor::{CoroutineExecutor, CoroutineExecutorConfig};
use webasync::request::{AsyncWebRequest, StandardAsyncRequest};
use webasync::{AsyncDefaults, AsyncError, AsyncManager, AsyncTask, CyclePhase, DeferredResult};

const WAIT: Duration = Duration::from_secs(5);

fn coroutine_manager() -> AsyncManager {
    setup_may_runtime();
    AsyncManager::new(AsyncDefaults {
        executor: Arc::new(CoroutineExecutor::new(CoroutineExecutorConfig {
            stack_size: 0x8000,
            ..CoroutineExecutorConfig::default()
        })),
        ..AsyncDefaults::default()
    })
}

#[test]
fn test_callable_cycle_on_coroutines() {
    let mut manager = coroutine_manager();
    let (request, dispatched) = StandardAsyncRequest::new("/reports/1");
    manager
        .configure_request(Arc::clone(&request) as Arc<dyn AsyncWebRequest>)
        .unwrap();

    manager
        .start_callable_processing(
            AsyncTask::new(|| {
                may::coroutine::sleep(Duration::from_millis(5));
                Ok(json!({"rows": 3}))
            })
            .with_timeout(2_000),
            &[json!("report")],
        )
        .unwrap();
    assert!(manager.is_concurrent_handling_started() || manager.has_concurrent_result());

    let signal = dispatched.recv_timeout(WAIT).unwrap();
    assert_eq!(signal.uri, "/reports/1");
    assert_eq!(signal.request_id, request.request_id());
    assert_eq!(manager.concurrent_result(), Some(Ok(json!({"rows": 3}))));
    assert_eq!(manager.cycle_phase(), CyclePhase::Dispatched);
    assert!(!manager.is_concurrent_handling_started());

    request.complete();
    manager.clear_concurrent_result();
    assert!(!manager.has_concurrent_result());
}

#[test]
fn test_deadline_fires_timeout() {
    let mut manager = coroutine_manager();
    let (request, dispatched) = StandardAsyncRequest::new("/slow");
    manager
        .configure_request(Arc::clone(&request) as Arc<dyn AsyncWebRequest>)
        .unwrap();
    let deferred = DeferredResult::new().with_timeout(20);

    manager.start_deferred_result_processing(&deferred, &[]).unwrap();

    dispatched.recv_timeout(WAIT).unwrap();
    assert_eq!(manager.concurrent_result(), Some(Err(AsyncError::Timeout)));
    assert!(manager.is_error_handling_in_progress());
    assert!(!deferred.set_result(json!("late")));
}

#[test]
fn test_dispatch_allows_next_cycle() {
    let mut manager = coroutine_manager();
    let (request, dispatched) = StandardAsyncRequest::new("/twice");
    manager
        .configure_request(Arc::clone(&request) as Arc<dyn AsyncWebRequest>)
        .unwrap();

    manager
        .start_callable_processing(AsyncTask::new(|| Ok(json!(1))), &[])
        .unwrap();
    dispatched.recv_timeout(WAIT).unwrap();

    // The transport left async mode on dispatch, so a new cycle may start
    // even before the previous result is cleared.
    let deferred = DeferredResult::new();
    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    assert!(!manager.has_concurrent_result());
    assert!(deferred.set_result(json!(2)));

    dispatched.recv_timeout(WAIT).unwrap();
    assert_eq!(manager.concurrent_result(), Some(Ok(json!(2))));
}

#[test]
fn test_completed_request_refuses_new_cycle() {
    let mut manager = coroutine_manager();
    let (request, _dispatched) = StandardAsyncRequest::new("/done");
    manager
        .configure_request(Arc::clone(&request) as Arc<dyn AsyncWebRequest>)
        .unwrap();
    request.complete();

    assert!(matches!(
        manager.start_deferred_result_processing(&DeferredResult::new(), &[]),
        Err(webasync::StartError::Request(AsyncError::IllegalState { .. }))
    ));
    assert_eq!(manager.cycle_phase(), CyclePhase::Idle);
}

#[test]
fn test_timeout_after_redispatch_reaches_only_the_current_cycle() {
    let mut manager = coroutine_manager();
    let (request, dispatched) = StandardAsyncRequest::new("/again");
    manager
        .configure_request(Arc::clone(&request) as Arc<dyn AsyncWebRequest>)
        .unwrap();

    manager
        .start_callable_processing(AsyncTask::new(|| Ok(json!(1))), &[])
        .unwrap();
    dispatched.recv_timeout(WAIT).unwrap();
    assert_eq!(manager.concurrent_result(), Some(Ok(json!(1))));

    let deferred = DeferredResult::new().with_timeout_result(Ok(json!("fallback")));
    manager.start_deferred_result_processing(&deferred, &[]).unwrap();
    request.fire_timeout();

    dispatched.recv_timeout(WAIT).unwrap();
    assert_eq!(manager.concurrent_result(), Some(Ok(json!("fallback"))));
    assert!(!manager.is_error_handling_in_progress());
    assert!(dispatched.try_recv().is_err());
}
