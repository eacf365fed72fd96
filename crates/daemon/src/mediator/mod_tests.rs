// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;
use std::sync::atomic::AtomicUsize;

/// Arithmetic worker used across the pool tests.
struct Calc {
    gate: Option<Arc<AtomicBool>>,
}

impl Calc {
    fn free() -> Self {
        Self { gate: None }
    }
}

impl Worker for Calc {
    fn dispatch(&mut self, method: &str, args: &[Value]) -> Result<Value, WorkerError> {
        match method {
            "square" => {
                let n = args
                    .first()
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| WorkerError::failed("square needs an integer"))?;
                Ok(json!(n * n))
            }
            "sleepy" => {
                let ms = args.first().and_then(|v| v.as_u64()).unwrap_or(0);
                std::thread::sleep(Duration::from_millis(ms));
                Ok(json!(ms))
            }
            "blocked" => {
                if let Some(gate) = &self.gate {
                    while !gate.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(5));
                    }
                }
                Ok(json!("released"))
            }
            "fail" => Err(WorkerError::failed("deliberate failure")),
            other => Err(WorkerError::UnknownMethod(other.to_string())),
        }
    }
}

fn tick_until(mediator: &WorkerMediator<Calc>, mut done: impl FnMut() -> bool, max: Duration) {
    let start = Instant::now();
    while !done() {
        if start.elapsed() > max {
            panic!("condition not reached within {max:?}");
        }
        mediator.tick();
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn returns_log(mediator: &WorkerMediator<Calc>) -> Arc<Mutex<Vec<Call>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    mediator.on_return(move |call, _| sink.lock().push(call.clone()));
    log
}

fn timeouts_log(mediator: &WorkerMediator<Calc>) -> Arc<Mutex<Vec<Call>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    mediator.on_timeout(move |call, _| sink.lock().push(call.clone()));
    log
}

#[test]
fn round_trip_returns_value_once() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    mediator.workers(2).unwrap();
    let returns = returns_log(&mediator);
    mediator.setup().unwrap();

    let id = mediator.call("square", vec![json!(7)]).unwrap();
    tick_until(&mediator, || !returns.lock().is_empty(), Duration::from_secs(5));

    // Extra ticks must not re-dispatch the terminal call.
    mediator.tick();
    mediator.tick();
    let calls = returns.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, id);
    assert_eq!(calls[0].status, CallStatus::Returned);
    assert_eq!(calls[0].return_value, Some(json!(49)));
    assert!(calls[0].queued_at.is_some());
    assert!(calls[0].returned_at.is_some());
    drop(calls);

    assert_eq!(mediator.call_status(id), Some(CallStatus::Returned));
    mediator.teardown();
}

#[test]
fn worker_error_surfaces_as_uncaught_return() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    let returns = returns_log(&mediator);
    mediator.setup().unwrap();

    mediator.call("fail", vec![]).unwrap();
    tick_until(&mediator, || !returns.lock().is_empty(), Duration::from_secs(5));

    let calls = returns.lock();
    assert_eq!(calls[0].status, CallStatus::Uncaught);
    assert_eq!(calls[0].errors, 1);
    assert_eq!(calls[0].return_value, Some(json!("deliberate failure")));
    drop(calls);
    mediator.teardown();
}

#[test]
fn unknown_method_does_not_kill_the_executor() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    let returns = returns_log(&mediator);
    mediator.setup().unwrap();

    mediator.call("no_such_method", vec![]).unwrap();
    mediator.call("square", vec![json!(3)]).unwrap();
    tick_until(&mediator, || returns.lock().len() == 2, Duration::from_secs(5));

    let calls = returns.lock();
    let square = calls.iter().find(|c| c.method == "square").unwrap();
    assert_eq!(square.return_value, Some(json!(9)));
    drop(calls);
    mediator.teardown();
}

#[test]
fn per_method_timeout_fires_exactly_once() {
    let cfg = MediatorConfig::default().workers(1);
    let mediator =
        WorkerMediator::with_clock_and_config(SystemClock, "calc", Calc::free, cfg);
    let returns = returns_log(&mediator);
    let timeouts = timeouts_log(&mediator);
    mediator.timeout("sleepy", Duration::from_millis(100));
    mediator.setup().unwrap();

    let started = Instant::now();
    let id = mediator.call("sleepy", vec![json!(500u64)]).unwrap();
    tick_until(&mediator, || !timeouts.lock().is_empty(), Duration::from_secs(5));
    assert!(
        started.elapsed() < Duration::from_millis(450),
        "timeout must fire before the worker finishes"
    );
    assert_eq!(mediator.call_status(id), Some(CallStatus::Timeout));

    // Let the worker finish its sleep; its late RETURN must be dropped.
    std::thread::sleep(Duration::from_millis(500));
    mediator.tick();
    mediator.tick();
    assert_eq!(timeouts.lock().len(), 1);
    assert!(returns.lock().is_empty());
    assert_eq!(mediator.call_status(id), Some(CallStatus::Timeout));
    mediator.teardown();
}

#[test]
fn backpressure_refuses_then_recovers() {
    let gate = Arc::new(AtomicBool::new(false));
    let factory_gate = Arc::clone(&gate);
    let cfg = MediatorConfig::default()
        .workers(1)
        .capacity(2)
        .high_water(2)
        .low_water(0);
    let mediator = WorkerMediator::with_clock_and_config(
        SystemClock,
        "calc",
        move || Calc {
            gate: Some(Arc::clone(&factory_gate)),
        },
        cfg,
    );
    let returns = returns_log(&mediator);
    mediator.setup().unwrap();

    // First call occupies the single executor; two more fill the lane.
    mediator.call("blocked", vec![]).unwrap();
    tick_until(
        &mediator,
        || mediator.snapshot().active_calls == 1 && mediator.queue_state().messages == 0,
        Duration::from_secs(5),
    );
    mediator.call("blocked", vec![]).unwrap();
    mediator.call("blocked", vec![]).unwrap();

    mediator.tick();
    assert!(mediator.snapshot().saturated);
    assert!(matches!(
        mediator.call("blocked", vec![]),
        Err(MediatorError::Saturated)
    ));

    // Open the gate: the pool drains and calls are accepted again.
    gate.store(true, Ordering::SeqCst);
    tick_until(&mediator, || returns.lock().len() == 3, Duration::from_secs(5));
    assert!(!mediator.snapshot().saturated);
    mediator.call("square", vec![json!(2)]).unwrap();
    tick_until(&mediator, || returns.lock().len() == 4, Duration::from_secs(5));
    mediator.teardown();
}

#[test]
fn recycled_executors_are_respawned() {
    let cfg = MediatorConfig::default().workers(1).recycle_after(1);
    let mediator =
        WorkerMediator::with_clock_and_config(SystemClock, "calc", Calc::free, cfg);
    let returns = returns_log(&mediator);
    mediator.setup().unwrap();

    for n in 0..3 {
        mediator.call("square", vec![json!(n)]).unwrap();
        tick_until(
            &mediator,
            || returns.lock().len() == (n + 1) as usize,
            Duration::from_secs(5),
        );
    }
    // Each call consumed one executor incarnation; the pool keeps its size.
    tick_until(
        &mediator,
        || mediator.snapshot().pool == 1,
        Duration::from_secs(5),
    );
    mediator.teardown();
}

#[test]
fn teardown_fails_in_flight_calls_as_timeout_class() {
    let gate = Arc::new(AtomicBool::new(false));
    let factory_gate = Arc::clone(&gate);
    let mediator = WorkerMediator::new("calc", move || Calc {
        gate: Some(Arc::clone(&factory_gate)),
    });
    let timeouts = timeouts_log(&mediator);
    mediator.setup().unwrap();

    let id = mediator.call("blocked", vec![]).unwrap();
    tick_until(
        &mediator,
        || mediator.call_status(id) == Some(CallStatus::Running),
        Duration::from_secs(5),
    );
    gate.store(true, Ordering::SeqCst);
    mediator.teardown();

    let fired = timeouts.lock();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].status, CallStatus::Uncaught);
}

#[test]
fn call_requires_a_running_pool() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    assert!(matches!(
        mediator.call("square", vec![json!(1)]),
        Err(MediatorError::NotRunning)
    ));
    mediator.setup().unwrap();
    mediator.teardown();
    assert!(matches!(
        mediator.call("square", vec![json!(1)]),
        Err(MediatorError::NotRunning)
    ));
}

#[test]
fn workers_cannot_resize_while_running() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    mediator.workers(3).unwrap();
    mediator.setup().unwrap();
    assert!(matches!(
        mediator.workers(5),
        Err(MediatorError::AlreadyRunning)
    ));
    assert_eq!(mediator.snapshot().pool, 3);
    mediator.teardown();
}

#[test]
fn inline_bypasses_the_queue() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    // No setup: inline works without a pool.
    let value = mediator.inline(|w| w.dispatch("square", &[json!(12)]));
    assert_eq!(value.unwrap(), json!(144));
}

#[test]
fn listener_can_issue_follow_up_calls() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    let chained = Arc::new(AtomicUsize::new(0));
    {
        let mediator = mediator.clone();
        let chained = Arc::clone(&chained);
        mediator.clone().on_return(move |call, _| {
            if call.method == "square" && chained.fetch_add(1, Ordering::SeqCst) == 0 {
                // Re-entrant call from inside a listener must not deadlock.
                let _ = mediator.call("square", vec![json!(5)]);
            }
        });
    }
    mediator.setup().unwrap();
    mediator.call("square", vec![json!(2)]).unwrap();

    let start = Instant::now();
    while chained.load(Ordering::SeqCst) < 2 {
        assert!(start.elapsed() < Duration::from_secs(5), "chain never completed");
        mediator.tick();
        std::thread::sleep(Duration::from_millis(10));
    }
    mediator.teardown();
}

#[test]
fn listener_receives_the_bound_shutdown_flag() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    mediator.on_return(move |_, stop| stop.request());

    // Simulate installation on a controller.
    let daemon_flag = crate::shutdown::ShutdownHandle::new();
    {
        let mut supervised: Box<dyn crate::mediator::Supervised> = Box::new(mediator.clone());
        supervised.bind_shutdown(daemon_flag.clone());
    }
    mediator.setup().unwrap();
    mediator.call("square", vec![json!(4)]).unwrap();
    tick_until(
        &mediator,
        || daemon_flag.is_requested(),
        Duration::from_secs(5),
    );
    mediator.teardown();
}

#[test]
fn snapshot_reflects_pool_and_calls() {
    let mediator = WorkerMediator::new("calc", Calc::free);
    mediator.workers(2).unwrap();
    mediator.setup().unwrap();
    let snapshot = mediator.snapshot();
    assert_eq!(snapshot.name, "calc");
    assert_eq!(snapshot.pool, 2);
    assert_eq!(snapshot.active_calls, 0);
    mediator.teardown();
}
