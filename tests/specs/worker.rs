// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker mediator specs driven through the lifecycle controller.

use drover::{
    App, AppCtx, Call, CallStatus, Clock, Daemon, DaemonConfig, DaemonError, Outcome, Worker,
    WorkerError, WorkerMediator,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct MathWorker;

impl Worker for MathWorker {
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
            other => Err(WorkerError::UnknownMethod(other.to_string())),
        }
    }
}

/// Issues one call; the registered listener stops the daemon via the
/// shutdown handle it receives. The app only enforces a safety deadline.
struct OneCallApp {
    mediator: WorkerMediator<MathWorker>,
    method: &'static str,
    args: Vec<Value>,
    called: bool,
    deadline: Duration,
}

impl<C: Clock> App<C> for OneCallApp {
    fn execute(&mut self, ctx: &mut AppCtx<'_, C>) -> Result<(), DaemonError> {
        if !self.called {
            self.called = true;
            self.mediator
                .call(self.method, self.args.clone())
                .map_err(|e| DaemonError::app(e.to_string()))?;
        } else if ctx.runtime() > self.deadline {
            ctx.request_shutdown();
        }
        Ok(())
    }
}

#[tokio::test]
async fn worker_round_trip_through_the_loop() {
    let mediator = WorkerMediator::new("math", || MathWorker);
    mediator.workers(2).unwrap();

    let returns: Arc<Mutex<Vec<Call>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let returns = Arc::clone(&returns);
        // The listener stops the daemon through the handle it receives.
        mediator.on_return(move |call, stop| {
            returns.lock().unwrap().push(call.clone());
            stop.request();
        });
    }

    let app = OneCallApp {
        mediator: mediator.clone(),
        method: "square",
        args: vec![json!(7)],
        called: false,
        deadline: Duration::from_secs(5),
    };
    let cfg = DaemonConfig::default()
        .name("worker-spec")
        .loop_interval(Duration::from_millis(10));
    let mut daemon = Daemon::new(app, cfg).unwrap();
    daemon.add_worker(mediator.clone());
    assert_eq!(daemon.run().await, Outcome::Clean);

    let returns = returns.lock().unwrap();
    assert_eq!(returns.len(), 1, "on_return must fire exactly once");
    assert_eq!(returns[0].status, CallStatus::Returned);
    assert_eq!(returns[0].return_value, Some(json!(49)));
}

#[tokio::test]
async fn worker_timeout_fires_and_pool_survives() {
    let mediator = WorkerMediator::new("math", || MathWorker);
    mediator.timeout("sleepy", Duration::from_millis(100));

    let timeouts: Arc<Mutex<Vec<Call>>> = Arc::new(Mutex::new(Vec::new()));
    let fired_after: Arc<Mutex<Option<Duration>>> = Arc::new(Mutex::new(None));
    let test_start = Instant::now();
    {
        let timeouts = Arc::clone(&timeouts);
        let fired_after = Arc::clone(&fired_after);
        mediator.on_timeout(move |call, stop| {
            timeouts.lock().unwrap().push(call.clone());
            fired_after.lock().unwrap().get_or_insert(test_start.elapsed());
            stop.request();
        });
    }
    let app = OneCallApp {
        mediator: mediator.clone(),
        method: "sleepy",
        args: vec![json!(1_000u64)],
        called: false,
        deadline: Duration::from_secs(5),
    };
    let cfg = DaemonConfig::default()
        .name("timeout-spec")
        .loop_interval(Duration::from_millis(10));
    let mut daemon = Daemon::new(app, cfg).unwrap();
    daemon.add_worker(mediator.clone());
    assert_eq!(daemon.run().await, Outcome::Clean);

    let timeouts = timeouts.lock().unwrap();
    assert_eq!(timeouts.len(), 1, "on_timeout must fire exactly once");
    assert_eq!(timeouts[0].status, CallStatus::Timeout);
    let fired_after = fired_after.lock().unwrap().unwrap();
    assert!(
        fired_after < Duration::from_millis(900),
        "timeout fired after {fired_after:?}, must beat the 1s worker sleep"
    );
    // The pool keeps its executor; teardown happened via the controller.
    let snapshot = mediator.snapshot();
    assert_eq!(snapshot.active_calls, 0);
}

#[tokio::test]
async fn inline_bypass_works_without_the_loop() {
    let mediator = WorkerMediator::new("math", || MathWorker);
    let value = mediator.inline(|w| w.dispatch("square", &[json!(9)]));
    assert_eq!(value.unwrap(), json!(81));
}
