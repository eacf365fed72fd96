// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Singleton lock specs: exclusion while running, handover after exit.

use drover::{
    App, AppCtx, Clock, Daemon, DaemonConfig, DaemonError, FileLock, Outcome, Sig, SignalHub,
};
use std::ffi::OsString;
use std::time::Duration;

/// Runs until told to stop (or a generous safety limit).
struct HoldApp;

impl<C: Clock> App<C> for HoldApp {
    fn execute(&mut self, ctx: &mut AppCtx<'_, C>) -> Result<(), DaemonError> {
        if ctx.runtime() > Duration::from_secs(10) {
            ctx.request_shutdown();
        }
        Ok(())
    }
}

/// Runs exactly one iteration.
struct OneShotApp;

impl<C: Clock> App<C> for OneShotApp {
    fn execute(&mut self, ctx: &mut AppCtx<'_, C>) -> Result<(), DaemonError> {
        ctx.request_shutdown();
        Ok(())
    }
}

fn config(name: &str) -> DaemonConfig {
    DaemonConfig::default()
        .name(name)
        .loop_interval(Duration::from_millis(10))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_instance_is_excluded_until_the_first_exits() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("drover.lock");

    // First instance acquires and holds the lock.
    let (stop_first, hub) = SignalHub::channel();
    let mut first = Daemon::new(HoldApp, config("first")).unwrap();
    first.add_lock(FileLock::new(&lock_path).pid(100));
    first.with_signals(hub);
    let first_task = tokio::spawn(async move { first.run().await });

    // Let the first instance get through init.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // A challenger with a different identity cannot start.
    let mut second = Daemon::new(OneShotApp, config("second")).unwrap();
    second.add_lock(FileLock::new(&lock_path).pid(200));
    assert_eq!(second.run().await, Outcome::Fatal);

    // Stop the holder; its teardown releases the lease.
    stop_first.send(Sig::Term).unwrap();
    assert_eq!(first_task.await.unwrap(), Outcome::Clean);

    // Now the path is free and a new instance starts cleanly.
    let mut third = Daemon::new(OneShotApp, config("third")).unwrap();
    third.add_lock(FileLock::new(&lock_path).pid(300));
    assert_eq!(third.run().await, Outcome::Clean);
}

#[tokio::test]
async fn pid_file_tracks_the_owning_instance() {
    let dir = tempfile::tempdir().unwrap();
    let pid_path = dir.path().join("drover.pid");
    let lock_path = dir.path().join("drover.lock");

    let cfg = config("pids").pid_file(pid_path.clone());
    let mut daemon = Daemon::new(OneShotApp, cfg).unwrap();
    daemon.add_lock(FileLock::new(&lock_path).pid(100));
    assert_eq!(daemon.run().await, Outcome::Clean);

    // Removed at shutdown because the contents still matched.
    assert!(!pid_path.exists());
    // The lock lease was released too.
    assert!(!lock_path.exists());
}

#[tokio::test]
async fn restart_spawns_successor_and_exits_zero() {
    let (signals, hub) = SignalHub::channel();
    let cfg = config("restarter").command_line(vec![OsString::from("true")]);
    let mut daemon = Daemon::new(HoldApp, cfg).unwrap();
    daemon.with_signals(hub);
    signals.send(Sig::Hup).unwrap();
    let outcome = daemon.run().await;
    assert_eq!(outcome, Outcome::Restarted);
    assert_eq!(outcome.exit_code(), 0);
}
