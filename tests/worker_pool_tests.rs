#![allow(clippy::unwrap_used, clippy::expect_used)]

use fnrunner::agent::CallContext;
use fnrunner::ids::CallId;
use fnrunner::models::ApiError;
use fnrunner::worker_pool::{BackpressureMode, WorkerPool, WorkerPoolConfig};
use may::sync::mpsc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

// These tests are affected by global env vars. Use a mutex to serialize access.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const WAIT: Duration = Duration::from_secs(2);

fn clean_worker_pool_env_vars() {
    std::env::remove_var("FN_HANDLER_WORKERS");
    std::env::remove_var("FN_HANDLER_QUEUE_BOUND");
    std::env::remove_var("FN_BACKPRESSURE_MODE");
    std::env::remove_var("FN_BACKPRESSURE_TIMEOUT_MS");
    std::env::remove_var("FN_STACK_SIZE");
}

fn pool(workers: usize, bound: usize, mode: BackpressureMode, timeout_ms: u64) -> WorkerPool {
    may::config().set_workers(2);
    let config = WorkerPoolConfig::new(workers, bound, mode, timeout_ms, 0x10000);
    unsafe { WorkerPool::new("test", config) }
}

#[test]
fn test_job_result_is_returned() {
    let pool = pool(2, 8, BackpressureMode::Block, 50);

    let handle = pool.submit(CallId::new(), || 21 * 2).unwrap();

    assert_eq!(handle.wait(WAIT, &CallContext::new()).unwrap(), 42);
    assert_eq!(pool.metrics().get_dispatched_count(), 1);
}

#[test]
fn test_shed_mode_rejects_when_full() {
    let pool = pool(1, 1, BackpressureMode::Shed, 50);
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let first = pool
        .submit(CallId::new(), move || {
            let _ = gate_rx.recv();
            "first"
        })
        .unwrap();

    let second = pool.submit(CallId::new(), || "second");
    assert!(matches!(second, Err(ApiError::CallTimeoutServerBusy)));
    assert_eq!(pool.metrics().get_shed_count(), 1);

    gate_tx.send(()).unwrap();
    assert_eq!(first.wait(WAIT, &CallContext::new()).unwrap(), "first");
}

#[test]
fn test_block_mode_waits_for_a_slot() {
    let pool = pool(1, 1, BackpressureMode::Block, 1_000);

    let first = pool
        .submit(CallId::new(), || {
            may::coroutine::sleep(Duration::from_millis(30));
            1
        })
        .unwrap();
    let second = pool.submit(CallId::new(), || 2).unwrap();

    assert_eq!(first.wait(WAIT, &CallContext::new()).unwrap(), 1);
    assert_eq!(second.wait(WAIT, &CallContext::new()).unwrap(), 2);
    assert_eq!(pool.metrics().get_shed_count(), 0);
}

#[test]
fn test_block_mode_gives_up_after_timeout() {
    let pool = pool(1, 1, BackpressureMode::Block, 20);
    let (gate_tx, gate_rx) = mpsc::channel::<()>();

    let first = pool
        .submit(CallId::new(), move || {
            let _ = gate_rx.recv();
        })
        .unwrap();

    let start = Instant::now();
    let second = pool.submit(CallId::new(), || ());
    assert!(matches!(second, Err(ApiError::CallTimeoutServerBusy)));
    assert!(start.elapsed() >= Duration::from_millis(20));

    gate_tx.send(()).unwrap();
    first.wait(WAIT, &CallContext::new()).unwrap();
}

#[test]
fn test_panic_is_reported_as_function_failure() {
    let pool = pool(1, 4, BackpressureMode::Block, 50);

    let handle = pool
        .submit(CallId::new(), || -> u32 { panic!("handler blew up") })
        .unwrap();

    let err = handle.wait(WAIT, &CallContext::new()).unwrap_err();
    assert!(matches!(err, ApiError::FunctionFailed(_)));

    // The worker survives the panic.
    let handle = pool.submit(CallId::new(), || 7u32).unwrap();
    assert_eq!(handle.wait(WAIT, &CallContext::new()).unwrap(), 7);
}

#[test]
fn test_wait_times_out() {
    let pool = pool(1, 4, BackpressureMode::Block, 50);

    let handle = pool
        .submit(CallId::new(), || {
            may::coroutine::sleep(Duration::from_millis(500));
        })
        .unwrap();

    let err = handle
        .wait(Duration::from_millis(20), &CallContext::new())
        .unwrap_err();
    assert!(matches!(err, ApiError::CallTimeout));
}

#[test]
fn test_cancelled_context_stops_waiting() {
    let pool = pool(1, 4, BackpressureMode::Block, 50);
    let handle = pool
        .submit(CallId::new(), || {
            may::coroutine::sleep(Duration::from_millis(200));
        })
        .unwrap();

    let ctx = CallContext::new();
    ctx.cancel();
    let err = handle.wait(WAIT, &ctx).unwrap_err();
    assert!(matches!(err, ApiError::CallStopped));
}

#[test]
fn test_config_env_overrides() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_worker_pool_env_vars();

    std::env::set_var("FN_HANDLER_WORKERS", "8");
    std::env::set_var("FN_HANDLER_QUEUE_BOUND", "16");
    std::env::set_var("FN_BACKPRESSURE_MODE", "shed");
    std::env::set_var("FN_BACKPRESSURE_TIMEOUT_MS", "250");
    std::env::set_var("FN_STACK_SIZE", "0x8000");

    let config = WorkerPoolConfig::from_env();
    clean_worker_pool_env_vars();

    assert_eq!(config.num_workers, 8);
    assert_eq!(config.queue_bound, 16);
    assert_eq!(config.backpressure_mode, BackpressureMode::Shed);
    assert_eq!(config.backpressure_timeout_ms, 250);
    assert_eq!(config.stack_size, 0x8000);
}

#[test]
fn test_config_ignores_garbage_env() {
    let _guard = ENV_MUTEX.lock().unwrap();
    clean_worker_pool_env_vars();

    std::env::set_var("FN_HANDLER_WORKERS", "lots");
    std::env::set_var("FN_BACKPRESSURE_MODE", "panic");

    let config = WorkerPoolConfig::from_env();
    clean_worker_pool_env_vars();

    let defaults = WorkerPoolConfig::default();
    assert_eq!(config.num_workers, defaults.num_workers);
    assert_eq!(config.backpressure_mode, BackpressureMode::Block);
}
