// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle controller: init, the event loop, shutdown, restart.
//!
//! The controller owns the bus, the timer, the task runner, the lock
//! providers, and any worker mediators. One iteration is:
//! begin timer → auto-restart check → ON_PREEXECUTE (lock refresh) →
//! app `execute` → ON_POSTEXECUTE → mediator ticks → task reaping →
//! finish timer (ON_IDLE, sleep).

mod signal;

pub use signal::{Sig, SignalHub};

use crate::bus::EventBus;
use crate::env;
use crate::lock::{LockError, LockProvider};
use crate::mediator::{MediatorError, Supervised};
use crate::pidfile::PidFile;
use crate::shutdown::ShutdownHandle;
use crate::task::{TaskError, TaskId, TaskRunner};
use crate::timer::{LoopTimer, TickOutcome};
use drover_core::stats::STATS_CAP;
use drover_core::{Clock, Event, SystemClock};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Minimum uptime before any restart path is taken.
pub const MIN_RESTART_SECS: u64 = 10;

/// Controller states, forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    New,
    Initializing,
    Running,
    ShuttingDown,
    Restarting,
    Exited,
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Clean shutdown.
    Clean,
    /// A successor process was spawned; this one should exit 0.
    Restarted,
    /// Fatal error without a restart; exit 1.
    Fatal,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Clean | Outcome::Restarted => 0,
            Outcome::Fatal => 1,
        }
    }
}

/// Controller errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("environment check failed: {}", .0.join("; "))]
    Environment(Vec<String>),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("worker error: {0}")]
    Mediator(#[from] MediatorError),

    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    App(String),
}

impl DaemonError {
    pub fn app(message: impl Into<String>) -> Self {
        DaemonError::App(message.into())
    }
}

/// Static configuration for one daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Application identity; keys the lock and names the logs.
    pub name: String,
    /// Zero means free-run (no timer).
    pub loop_interval: Duration,
    /// Chance of ON_IDLE per iteration when free-running.
    pub idle_probability: f64,
    /// Re-exec after this much uptime when daemonized.
    pub auto_restart: Option<Duration>,
    /// Write the parent pid here.
    pub pid_file: Option<PathBuf>,
    /// Running detached; enables restart-on-fatal and auto-restart.
    pub daemonized: bool,
    /// Override of the command line re-spawned by `restart` (tests).
    pub command_line: Option<Vec<OsString>>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            name: "drover".to_string(),
            loop_interval: Duration::from_secs(1),
            idle_probability: 0.5,
            auto_restart: None,
            pid_file: None,
            daemonized: false,
            command_line: None,
        }
    }
}

impl DaemonConfig {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn loop_interval(mut self, interval: Duration) -> Self {
        self.loop_interval = interval;
        self
    }

    pub fn idle_probability(mut self, probability: f64) -> Self {
        self.idle_probability = probability;
        self
    }

    pub fn auto_restart(mut self, after: Duration) -> Self {
        self.auto_restart = Some(after);
        self
    }

    pub fn pid_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pid_file = Some(path.into());
        self
    }

    pub fn daemonized(mut self, daemonized: bool) -> Self {
        self.daemonized = daemonized;
        self
    }

    pub fn command_line(mut self, argv: Vec<OsString>) -> Self {
        self.command_line = Some(argv);
        self
    }

    /// Fold parsed CLI options in.
    pub fn with_opts(mut self, opts: &crate::opts::Opts) -> Self {
        if let Some(path) = &opts.pid_file {
            self.pid_file = Some(path.clone());
        }
        if opts.daemonize || env::is_daemonized_respawn() {
            self.daemonized = true;
        }
        self
    }

    fn validate(&self) -> Result<(), DaemonError> {
        if let Some(after) = self.auto_restart {
            if after.as_secs() < MIN_RESTART_SECS {
                return Err(DaemonError::Config(format!(
                    "auto_restart must be at least {MIN_RESTART_SECS}s, got {}s",
                    after.as_secs()
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.idle_probability) {
            return Err(DaemonError::Config(format!(
                "idle_probability must be within 0..=1, got {}",
                self.idle_probability
            )));
        }
        Ok(())
    }
}

/// What the app sees during `setup` and `execute`.
pub struct AppCtx<'a, C: Clock = SystemClock> {
    pub bus: &'a mut EventBus<C>,
    tasks: &'a mut TaskRunner,
    clock: &'a C,
    shutdown: &'a ShutdownHandle,
    runtime: Duration,
}

impl<C: Clock> AppCtx<'_, C> {
    /// Spawn a one-shot background task; dispatches ON_FORK.
    pub fn task(
        &mut self,
        name: impl Into<String>,
        routine: impl FnOnce() -> Result<(), TaskError> + Send + 'static,
    ) -> Result<TaskId, TaskError> {
        let name = name.into();
        let id = self.tasks.spawn(name.clone(), routine)?;
        self.bus.dispatch(&Event::Fork { child: id, name });
        Ok(id)
    }

    /// Spawn an object task (`setup` then `run`); dispatches ON_FORK.
    pub fn task_object(
        &mut self,
        name: impl Into<String>,
        task: impl crate::task::Task,
    ) -> Result<TaskId, TaskError> {
        let name = name.into();
        let id = self.tasks.spawn_object(name.clone(), task)?;
        self.bus.dispatch(&Event::Fork { child: id, name });
        Ok(id)
    }

    /// Ask the loop to exit after the current iteration. Idempotent.
    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    /// Clone of the daemon's shutdown flag, for callbacks and tasks that
    /// outlive this context.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Uptime of the controller.
    pub fn runtime(&self) -> Duration {
        self.runtime
    }

    pub fn clock(&self) -> &C {
        self.clock
    }
}

/// The user-supplied work routine.
pub trait App<C: Clock = SystemClock>: Send + 'static {
    /// Runs once after ON_INIT and lock acquisition.
    fn setup(&mut self, _ctx: &mut AppCtx<'_, C>) -> Result<(), DaemonError> {
        Ok(())
    }

    /// Runs every iteration. Long work here stalls the loop and is
    /// surfaced as an overrun; push it to tasks or a worker mediator.
    fn execute(&mut self, ctx: &mut AppCtx<'_, C>) -> Result<(), DaemonError>;

    /// Runs once during shutdown, after the pools stopped.
    fn teardown(&mut self) {}

    /// Startup problems; aggregated with every plugin's check.
    fn check_environment(&self) -> Vec<String> {
        Vec::new()
    }
}

/// The lifecycle controller.
pub struct Daemon<A, C: Clock = SystemClock>
where
    A: App<C>,
{
    app: A,
    cfg: DaemonConfig,
    clock: C,
    bus: EventBus<C>,
    timer: LoopTimer<C>,
    tasks: TaskRunner,
    locks: Vec<Box<dyn LockProvider>>,
    supervised: Vec<Box<dyn Supervised>>,
    signals: Option<SignalHub>,
    pid_file: Option<PidFile>,
    state: RunState,
    started: Instant,
    shutdown: ShutdownHandle,
    restart_requested: bool,
}

impl<A: App<SystemClock>> Daemon<A, SystemClock> {
    pub fn new(app: A, cfg: DaemonConfig) -> Result<Self, DaemonError> {
        Self::with_clock(SystemClock, app, cfg)
    }
}

impl<A, C: Clock> Daemon<A, C>
where
    A: App<C>,
{
    pub fn with_clock(clock: C, app: A, cfg: DaemonConfig) -> Result<Self, DaemonError> {
        cfg.validate()?;
        let shutdown = ShutdownHandle::new();
        let bus = EventBus::with_clock_and_shutdown(clock.clone(), shutdown.clone());
        let timer = LoopTimer::with_clock(clock.clone(), cfg.loop_interval, cfg.idle_probability);
        Ok(Self {
            app,
            cfg,
            clock: clock.clone(),
            bus,
            timer,
            tasks: TaskRunner::new(),
            locks: Vec::new(),
            supervised: Vec::new(),
            signals: None,
            pid_file: None,
            state: RunState::New,
            started: clock.now(),
            shutdown,
            restart_requested: false,
        })
    }

    /// Install a lock provider. Checked and acquired during init, before
    /// the app's setup.
    pub fn add_lock(&mut self, lock: impl LockProvider + 'static) -> &mut Self {
        self.locks.push(Box::new(lock));
        self
    }

    /// Install a worker mediator (or anything else [`Supervised`]).
    ///
    /// The component adopts this daemon's shutdown flag, so its listeners
    /// can request termination.
    pub fn add_worker(&mut self, worker: impl Supervised + 'static) -> &mut Self {
        let mut worker = worker;
        worker.bind_shutdown(self.shutdown.clone());
        self.supervised.push(Box::new(worker));
        self
    }

    /// Inject a signal source. Without this, `run` installs the process
    /// signal listeners itself.
    pub fn with_signals(&mut self, hub: SignalHub) -> &mut Self {
        self.signals = Some(hub);
        self
    }

    /// Callback registration before (or between) runs.
    pub fn bus_mut(&mut self) -> &mut EventBus<C> {
        &mut self.bus
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Request loop exit after the current iteration. Idempotent; works
    /// from any thread holding a controller reference.
    pub fn shutdown(&self) {
        self.shutdown.request();
    }

    /// Clone of the shutdown flag shared with the bus, the mediators, and
    /// every dispatched callback.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn overruns(&self) -> u64 {
        self.timer.overruns()
    }

    pub fn stats(&self) -> std::sync::Arc<parking_lot::Mutex<drover_core::LoopStats>> {
        self.timer.stats()
    }

    fn runtime(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.started)
    }

    /// Initialize and run until shutdown, restart, or fatal error.
    pub async fn run(&mut self) -> Outcome {
        if let Err(e) = self.init() {
            // Startup failures never restart: report and exit.
            error!(daemon = %self.cfg.name, error = %e, "startup failed");
            self.bus.dispatch(&Event::Error {
                message: e.to_string(),
            });
            self.finish(Outcome::Fatal);
            return Outcome::Fatal;
        }
        let outcome = self.run_loop().await;
        self.finish(outcome);
        outcome
    }

    fn init(&mut self) -> Result<(), DaemonError> {
        self.state = RunState::Initializing;
        self.started = self.clock.now();

        if self.signals.is_none() {
            self.signals = Some(SignalHub::install()?);
        }

        // Commit the loop interval.
        self.timer.apply_priority();

        // Aggregate every environment check before any expensive setup.
        let mut problems = self.app.check_environment();
        for lock in &self.locks {
            problems.extend(lock.check_environment());
        }
        for worker in &self.supervised {
            problems.extend(worker.check_environment());
        }
        if !problems.is_empty() {
            return Err(DaemonError::Environment(problems));
        }

        // Singleton locks come before app setup, which may be expensive.
        for lock in &mut self.locks {
            lock.setup()?;
            lock.set()?;
        }

        self.bus.dispatch(&Event::Init);
        if env::is_daemonized_respawn() {
            self.bus.dispatch(&Event::PidChange {
                pid: std::process::id(),
            });
        }

        // Periodic stats trim, throttled to roughly every 50 iterations.
        let trim_every = if self.cfg.loop_interval.is_zero() {
            Duration::from_secs(60)
        } else {
            self.cfg.loop_interval * 50
        };
        let stats = self.timer.stats();
        self.bus.on_throttled(drover_core::EventKind::Idle, trim_every, move |_, _| {
            stats.lock().trim(STATS_CAP);
        });

        for worker in &mut self.supervised {
            worker.setup()?;
        }

        {
            let Daemon {
                app,
                bus,
                tasks,
                clock,
                shutdown,
                ..
            } = self;
            let mut ctx = AppCtx {
                bus,
                tasks,
                clock,
                shutdown,
                runtime: Duration::ZERO,
            };
            app.setup(&mut ctx)?;
        }

        if let Some(path) = &self.cfg.pid_file {
            self.pid_file = Some(PidFile::write(path)?);
        }

        info!(
            daemon = %self.cfg.name,
            pid = std::process::id(),
            interval_ms = self.cfg.loop_interval.as_millis() as u64,
            daemonized = self.cfg.daemonized,
            "daemon started"
        );
        self.state = RunState::Running;
        Ok(())
    }

    async fn run_loop(&mut self) -> Outcome {
        while !self.shutdown.is_requested() {
            self.drain_signals();
            if self.shutdown.is_requested() {
                break;
            }

            self.timer.begin();

            if self.restart_requested || self.should_auto_restart() {
                return self.restart();
            }

            self.bus.dispatch(&Event::PreExecute);
            if let Err(e) = self.refresh_locks() {
                return self.fatal(e).await;
            }

            if let Err(e) = self.execute_app() {
                return self.fatal(e).await;
            }
            self.bus.dispatch(&Event::PostExecute);

            for worker in &mut self.supervised {
                worker.tick();
            }
            self.reap_tasks();

            if let Some(outcome) = self.timer.finish() {
                if outcome.fire_idle {
                    self.bus.dispatch(&Event::Idle {
                        deadline: outcome.deadline,
                    });
                }
                self.sleep(outcome).await;
            }
        }
        Outcome::Clean
    }

    fn execute_app(&mut self) -> Result<(), DaemonError> {
        let runtime = self.runtime();
        let Daemon {
            app,
            bus,
            tasks,
            clock,
            shutdown,
            ..
        } = self;
        let mut ctx = AppCtx {
            bus,
            tasks,
            clock,
            shutdown,
            runtime,
        };
        app.execute(&mut ctx)
    }

    fn drain_signals(&mut self) {
        while let Some(sig) = self.signals.as_mut().and_then(|hub| hub.try_next()) {
            self.handle_signal(sig);
        }
    }

    fn handle_signal(&mut self, sig: Sig) {
        self.bus.dispatch(&Event::Signal {
            signum: sig.signum(),
        });
        match sig {
            Sig::Term | Sig::Int => {
                info!(signal = sig.signum(), "shutdown requested");
                self.shutdown.request();
            }
            Sig::Hup => {
                info!("restart requested");
                self.restart_requested = true;
            }
            Sig::Usr1 => self.dump_stats(),
            Sig::Other(_) => {}
        }
    }

    fn should_auto_restart(&self) -> bool {
        if !self.cfg.daemonized {
            return false;
        }
        match self.cfg.auto_restart {
            Some(after) => self.runtime() >= after,
            None => false,
        }
    }

    /// Refresh every lock lease. A foreign holder means we lost the
    /// singleton claim; that is fatal.
    fn refresh_locks(&mut self) -> Result<(), DaemonError> {
        for lock in &mut self.locks {
            match lock.set() {
                Ok(()) => {}
                Err(e @ LockError::Held { .. }) => return Err(e.into()),
                Err(e) => {
                    warn!(error = %e, "lock refresh failed");
                    self.bus.dispatch(&Event::Error {
                        message: format!("lock refresh failed: {e}"),
                    });
                }
            }
        }
        Ok(())
    }

    fn reap_tasks(&mut self) {
        for exit in self.tasks.reap() {
            if let Err(e) = exit.result {
                error!(task = %exit.name, id = exit.id, error = %e, "task failed");
                self.bus.dispatch(&Event::Error {
                    message: format!("task '{}' failed: {e}", exit.name),
                });
            }
        }
    }

    async fn sleep(&mut self, outcome: TickOutcome) {
        if outcome.sleep_for.is_zero() {
            return;
        }
        enum Wake {
            Timer,
            Signal(Sig),
            Closed,
        }
        let wake = match self.signals.as_mut() {
            Some(hub) => {
                tokio::select! {
                    _ = tokio::time::sleep(outcome.sleep_for) => Wake::Timer,
                    sig = hub.recv() => sig.map(Wake::Signal).unwrap_or(Wake::Closed),
                }
            }
            None => {
                tokio::time::sleep(outcome.sleep_for).await;
                Wake::Timer
            }
        };
        match wake {
            Wake::Timer => {}
            Wake::Signal(sig) => self.handle_signal(sig),
            Wake::Closed => {
                // Every sender is gone; stop selecting on the hub so the
                // loop keeps its pacing.
                self.signals = None;
                tokio::time::sleep(outcome.sleep_for).await;
            }
        }
    }

    fn dump_stats(&mut self) {
        let mean = self.timer.stats().lock().mean(100);
        let (mean_duration_ms, mean_idle_ms, samples) = match mean {
            Some(m) => (
                m.duration.as_millis() as u64,
                m.idle.as_millis() as u64,
                m.samples,
            ),
            None => (0, 0, 0),
        };
        info!(
            daemon = %self.cfg.name,
            runtime_secs = self.runtime().as_secs(),
            overruns = self.timer.overruns(),
            mean_duration_ms,
            mean_idle_ms,
            samples,
            tasks_active = self.tasks.active(),
            "runtime statistics"
        );
        for worker in &self.supervised {
            info!(worker = %worker.name(), status = %worker.status_line(), "worker status");
        }
    }

    async fn fatal(&mut self, e: DaemonError) -> Outcome {
        error!(daemon = %self.cfg.name, error = %e, "fatal error");
        self.bus.dispatch(&Event::Error {
            message: e.to_string(),
        });
        let runtime = self.runtime();
        if self.cfg.daemonized && runtime.as_secs() + 2 > MIN_RESTART_SECS {
            // Give the log a moment to land, then hand over.
            tokio::time::sleep(Duration::from_secs(2)).await;
            return self.restart();
        }
        Outcome::Fatal
    }

    /// Spawn a successor running the original command line and wind down.
    ///
    /// Callbacks are cleared first so nothing fires re-entrantly during
    /// the handover; the successor must win the lock before serving.
    fn restart(&mut self) -> Outcome {
        self.state = RunState::Restarting;
        self.shutdown.request();
        self.restart_requested = false;
        self.bus.clear();

        let argv: Vec<OsString> = self
            .cfg
            .command_line
            .clone()
            .unwrap_or_else(|| std::env::args_os().collect());
        let Some((program, rest)) = argv.split_first() else {
            error!("restart impossible: empty command line");
            return Outcome::Fatal;
        };
        match Command::new(program)
            .args(rest)
            .env(env::DAEMONIZED_MARKER, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                info!(
                    daemon = %self.cfg.name,
                    successor = child.id(),
                    "restarting: successor spawned"
                );
                Outcome::Restarted
            }
            Err(e) => {
                error!(error = %e, "restart failed to spawn successor");
                Outcome::Fatal
            }
        }
    }

    /// Tear everything down in reverse init order.
    fn finish(&mut self, outcome: Outcome) {
        if self.state != RunState::Restarting {
            self.state = RunState::ShuttingDown;
            self.bus.dispatch(&Event::Shutdown);
        }

        for worker in &mut self.supervised {
            worker.teardown();
        }
        for exit in self.tasks.join_all() {
            if let Err(e) = exit.result {
                warn!(task = %exit.name, error = %e, "task failed during shutdown");
            }
        }
        for lock in &mut self.locks {
            if let Err(e) = lock.teardown() {
                warn!(error = %e, "lock teardown failed");
            }
        }
        self.app.teardown();
        if let Some(pid_file) = &self.pid_file {
            pid_file.remove_if_owned();
        }
        info!(daemon = %self.cfg.name, outcome = ?outcome, "daemon exited");
        self.state = RunState::Exited;
    }
}

/// Handle `-d`: re-spawn self detached with stdio on the null device.
///
/// Returns true when this (launcher) process should exit 0; the detached
/// child sees the marker and runs normally.
pub fn daemonize_if_requested(opts: &crate::opts::Opts) -> std::io::Result<bool> {
    if !opts.daemonize || env::is_daemonized_respawn() {
        return Ok(false);
    }
    let argv: Vec<OsString> = std::env::args_os().skip(1).collect();
    let exe = std::env::current_exe()?;
    Command::new(exe)
        .args(argv)
        .env(env::DAEMONIZED_MARKER, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(true)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
