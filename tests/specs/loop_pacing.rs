// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Loop pacing specs: iteration spacing, overrun accounting, throttling.

use drover::{App, AppCtx, Clock, Daemon, DaemonConfig, DaemonError, EventKind, Outcome};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Sleeps a fixed amount each iteration and records when each one began.
struct PacedApp {
    work: Duration,
    limit: usize,
    starts: Arc<Mutex<Vec<Instant>>>,
}

impl<C: Clock> App<C> for PacedApp {
    fn execute(&mut self, ctx: &mut AppCtx<'_, C>) -> Result<(), DaemonError> {
        self.starts.lock().unwrap().push(Instant::now());
        std::thread::sleep(self.work);
        if self.starts.lock().unwrap().len() >= self.limit {
            ctx.request_shutdown();
        }
        Ok(())
    }
}

#[tokio::test]
async fn paced_loop_spaces_iterations_by_interval() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let app = PacedApp {
        work: Duration::from_millis(25),
        limit: 12,
        starts: Arc::clone(&starts),
    };
    let cfg = DaemonConfig::default()
        .name("pacing")
        .loop_interval(Duration::from_millis(100));
    let mut daemon = Daemon::new(app, cfg).unwrap();
    assert_eq!(daemon.run().await, Outcome::Clean);

    // No overruns: 25ms of work fits comfortably in a 100ms interval.
    assert_eq!(daemon.overruns(), 0);

    // Consecutive iteration starts are spaced by roughly the interval
    // (work + idle sleep), i.e. duration + idle ~= loop_interval.
    let starts = starts.lock().unwrap();
    let gaps: Vec<Duration> = starts.windows(2).map(|w| w[1] - w[0]).collect();
    let mean_gap = gaps.iter().sum::<Duration>() / gaps.len() as u32;
    assert!(
        mean_gap > Duration::from_millis(80) && mean_gap < Duration::from_millis(150),
        "mean gap {mean_gap:?} should approximate the 100ms interval"
    );
}

#[tokio::test]
async fn overrunning_loop_counts_every_iteration() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let app = PacedApp {
        work: Duration::from_millis(60),
        limit: 5,
        starts: Arc::clone(&starts),
    };
    let cfg = DaemonConfig::default()
        .name("overrun")
        .loop_interval(Duration::from_millis(20));
    let mut daemon = Daemon::new(app, cfg).unwrap();
    assert_eq!(daemon.run().await, Outcome::Clean);

    // Every iteration blew the 20ms budget.
    assert_eq!(daemon.overruns(), 5);
}

/// Throttle law over real time: ten dispatches inside a 2s window land
/// exactly once.
struct ThrottledApp {
    dispatches: usize,
    invoked: Arc<AtomicUsize>,
    registered: bool,
}

impl<C: Clock> App<C> for ThrottledApp {
    fn execute(&mut self, ctx: &mut AppCtx<'_, C>) -> Result<(), DaemonError> {
        if !self.registered {
            self.registered = true;
            let invoked = Arc::clone(&self.invoked);
            let kind = EventKind::custom("poll").map_err(|e| DaemonError::app(e.to_string()))?;
            ctx.bus.on_throttled(kind, Duration::from_secs(2), move |_, _| {
                invoked.fetch_add(1, Ordering::SeqCst);
            });
        }
        self.dispatches -= 1;
        ctx.bus.dispatch(&drover::Event::Custom {
            tag: "poll".to_string(),
            data: serde_json::Value::Null,
        });
        if self.dispatches == 0 {
            ctx.request_shutdown();
        }
        Ok(())
    }
}

#[tokio::test]
async fn throttled_callback_fires_once_per_window() {
    let invoked = Arc::new(AtomicUsize::new(0));
    let app = ThrottledApp {
        dispatches: 10,
        invoked: Arc::clone(&invoked),
        registered: false,
    };
    let cfg = DaemonConfig::default()
        .name("throttle")
        .loop_interval(Duration::from_millis(10));
    let mut daemon = Daemon::new(app, cfg).unwrap();
    assert_eq!(daemon.run().await, Outcome::Clean);

    // Ten dispatches over ~100ms against a 2s throttle.
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}
