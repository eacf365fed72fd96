// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker mediator: call/return over a typed queue served by a pool.
//!
//! The mediator turns method invocations on a worker object into
//! asynchronous jobs. The parent side owns the call table and the pool;
//! executors own private worker instances built from a factory, so no
//! state is shared across the call boundary except the transport.

mod calls;
mod executor;

use crate::shutdown::ShutdownHandle;
use calls::CallTable;
use drover_core::{Call, CallId, CallStatus, Clock, SystemClock};
use drover_via::{backoff, ChannelVia, Envelope, EnvelopeKind, ViaError, ViaState};
use executor::{run_executor, ExecutorArgs};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Builds one private worker instance per executor.
pub type WorkerFactory<W> = Arc<dyn Fn() -> W + Send + Sync>;

/// A stateful worker whose methods are invoked by name.
pub trait Worker: Send + 'static {
    fn dispatch(&mut self, method: &str, args: &[Value]) -> Result<Value, WorkerError>;
}

/// Errors a worker method can surface.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("{0}")]
    Failed(String),
}

impl WorkerError {
    pub fn failed(message: impl Into<String>) -> Self {
        WorkerError::Failed(message.into())
    }
}

/// Mediator-level errors.
#[derive(Debug, Error)]
pub enum MediatorError {
    /// Backpressure: the queue is past its high-water mark. Retry once it
    /// drains below the low-water mark.
    #[error("worker queue saturated; retry after it drains")]
    Saturated,

    #[error("pool is already running")]
    AlreadyRunning,

    #[error("pool is not running")]
    NotRunning,

    #[error("failed to spawn executor: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(#[from] ViaError),
}

/// Tuning knobs for one mediator.
#[derive(Debug, Clone)]
pub struct MediatorConfig {
    /// Pool size.
    pub workers: usize,
    /// Transport re-send attempts before a call is cancelled.
    pub retries: u32,
    /// Fallback per-call bound when no per-method timeout is set.
    pub default_timeout: Option<Duration>,
    /// How long terminal calls linger for listeners before GC.
    pub grace: Duration,
    /// Per-lane transport capacity.
    pub capacity: usize,
    /// Queue depth that turns backpressure on.
    pub high_water: usize,
    /// Queue depth that turns backpressure back off.
    pub low_water: usize,
    /// Calls served before an executor recycles itself; 0 disables.
    pub recycle_after: u64,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            retries: 3,
            default_timeout: None,
            grace: Duration::from_secs(60),
            capacity: drover_via::DEFAULT_CAPACITY,
            high_water: drover_via::DEFAULT_CAPACITY * 3 / 4,
            low_water: drover_via::DEFAULT_CAPACITY / 4,
            recycle_after: 0,
        }
    }
}

impl MediatorConfig {
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn default_timeout(mut self, bound: Duration) -> Self {
        self.default_timeout = Some(bound);
        self
    }

    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn high_water(mut self, high_water: usize) -> Self {
        self.high_water = high_water;
        self
    }

    pub fn low_water(mut self, low_water: usize) -> Self {
        self.low_water = low_water;
        self
    }

    pub fn recycle_after(mut self, calls: u64) -> Self {
        self.recycle_after = calls;
        self
    }
}

/// Anything the lifecycle controller sets up, ticks, and tears down.
pub trait Supervised: Send {
    fn name(&self) -> String;
    fn setup(&mut self) -> Result<(), MediatorError>;
    fn tick(&mut self);
    fn teardown(&mut self);
    fn check_environment(&self) -> Vec<String> {
        Vec::new()
    }

    /// Adopt the controller's shutdown flag so listeners dispatched by
    /// this component can stop the daemon. Called from `add_worker`.
    fn bind_shutdown(&mut self, _shutdown: ShutdownHandle) {}

    /// One-line status for runtime statistics dumps.
    fn status_line(&self) -> String {
        self.name()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PoolState {
    New,
    Running,
    Stopped,
}

struct PoolSlot {
    exec_id: u32,
    spawned_at: Instant,
    handle: JoinHandle<()>,
}

type CallListener = Box<dyn FnMut(&Call, &ShutdownHandle) + Send>;

struct Inner<W: Worker, C: Clock> {
    name: String,
    clock: C,
    cfg: MediatorConfig,
    factory: WorkerFactory<W>,
    via: ChannelVia,
    table: CallTable,
    timeouts: HashMap<String, Duration>,
    on_return: Vec<CallListener>,
    on_timeout: Vec<CallListener>,
    pool: Vec<PoolSlot>,
    /// Executor id → the call it acknowledged and has not returned.
    running_calls: HashMap<u32, CallId>,
    next_exec_id: u32,
    saturated: bool,
    state: PoolState,
    stop: Arc<AtomicBool>,
    /// Passed to every call-lifecycle listener; rebound to the daemon's
    /// flag when the mediator is installed on a controller.
    shutdown: ShutdownHandle,
    inline: Option<W>,
}

/// Observability snapshot for SIGUSR1 dumps and tests.
#[derive(Debug, Clone)]
pub struct MediatorSnapshot {
    pub name: String,
    pub pool: usize,
    pub active_calls: usize,
    pub terminal_calls: usize,
    pub queue: ViaState,
    pub saturated: bool,
}

/// Parent-side handle to a worker pool. Cheap to clone; the app keeps one
/// for `call` while the controller ticks another.
pub struct WorkerMediator<W: Worker, C: Clock = SystemClock> {
    inner: Arc<Mutex<Inner<W, C>>>,
}

impl<W: Worker, C: Clock> Clone for WorkerMediator<W, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Worker> WorkerMediator<W, SystemClock> {
    pub fn new(name: impl Into<String>, factory: impl Fn() -> W + Send + Sync + 'static) -> Self {
        Self::with_clock(SystemClock, name, factory)
    }
}

impl<W: Worker, C: Clock> WorkerMediator<W, C> {
    pub fn with_clock(
        clock: C,
        name: impl Into<String>,
        factory: impl Fn() -> W + Send + Sync + 'static,
    ) -> Self {
        Self::with_clock_and_config(clock, name, factory, MediatorConfig::default())
    }

    pub fn with_clock_and_config(
        clock: C,
        name: impl Into<String>,
        factory: impl Fn() -> W + Send + Sync + 'static,
        cfg: MediatorConfig,
    ) -> Self {
        let via = ChannelVia::bounded(cfg.capacity);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                name: name.into(),
                clock,
                cfg,
                factory: Arc::new(factory),
                via,
                table: CallTable::new(),
                timeouts: HashMap::new(),
                on_return: Vec::new(),
                on_timeout: Vec::new(),
                pool: Vec::new(),
                running_calls: HashMap::new(),
                next_exec_id: 1,
                saturated: false,
                state: PoolState::New,
                stop: Arc::new(AtomicBool::new(false)),
                shutdown: ShutdownHandle::new(),
                inline: None,
            })),
        }
    }

    /// Set the pool size. Must happen before `setup`.
    pub fn workers(&self, count: usize) -> Result<(), MediatorError> {
        let mut inner = self.inner.lock();
        if inner.state != PoolState::New {
            return Err(MediatorError::AlreadyRunning);
        }
        inner.cfg.workers = count.max(1);
        Ok(())
    }

    /// Maximum transport retry attempts per call.
    pub fn retries(&self, attempts: u32) {
        self.inner.lock().cfg.retries = attempts;
    }

    /// Per-method upper bound between enqueue/pick-up and return.
    pub fn timeout(&self, method: impl Into<String>, bound: Duration) {
        self.inner.lock().timeouts.insert(method.into(), bound);
    }

    /// Register a listener invoked exactly once per returned call
    /// (including Uncaught results; inspect `call.status`). The second
    /// argument is the shutdown flag, so a listener can stop the daemon.
    pub fn on_return(&self, listener: impl FnMut(&Call, &ShutdownHandle) + Send + 'static) {
        self.inner.lock().on_return.push(Box::new(listener));
    }

    /// Register a listener for timeout-class terminations (per-method
    /// timeouts and executor deaths mid-call). Receives the shutdown flag
    /// like [`on_return`](Self::on_return).
    pub fn on_timeout(&self, listener: impl FnMut(&Call, &ShutdownHandle) + Send + 'static) {
        self.inner.lock().on_timeout.push(Box::new(listener));
    }

    /// The flag handed to listeners; the daemon's own once installed.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.inner.lock().shutdown.clone()
    }

    /// Fork the pool; each executor enters its loop.
    pub fn setup(&self) -> Result<(), MediatorError> {
        let mut inner = self.inner.lock();
        if inner.state == PoolState::Running {
            return Err(MediatorError::AlreadyRunning);
        }
        inner.state = PoolState::Running;
        inner.stop.store(false, Ordering::Release);
        let want = inner.cfg.workers;
        for _ in 0..want {
            spawn_executor(&mut inner)?;
        }
        info!(worker = %inner.name, pool = want, "worker pool started");
        Ok(())
    }

    /// Enqueue a method invocation; returns its call id.
    ///
    /// Under backpressure this refuses with [`MediatorError::Saturated`]
    /// without creating a call.
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<CallId, MediatorError> {
        let (via, max_attempts, id, mut envelope) = {
            let mut inner = self.inner.lock();
            match inner.state {
                PoolState::Running => {}
                PoolState::New => return Err(MediatorError::NotRunning),
                PoolState::Stopped => return Err(MediatorError::NotRunning),
            }
            if inner.saturated {
                // Re-check between ticks so a drained queue unblocks
                // callers promptly.
                if inner.via.state().messages <= inner.cfg.low_water {
                    inner.saturated = false;
                } else {
                    return Err(MediatorError::Saturated);
                }
            }
            let id = inner.table.create(method, args.clone());
            let envelope = Envelope::Call {
                id,
                method: method.to_string(),
                args,
                retries: 0,
                queued_at: inner.clock.epoch_ms(),
            };
            (inner.via.clone(), inner.cfg.retries.max(1), id, envelope)
        };

        let mut attempt: u32 = 0;
        loop {
            match via.put(envelope.clone()) {
                Ok(()) => break,
                Err(ViaError::Full(_)) if attempt + 1 < max_attempts => {
                    std::thread::sleep(backoff(attempt));
                    attempt += 1;
                    if let Envelope::Call { retries, .. } = &mut envelope {
                        *retries = attempt;
                    }
                }
                Err(e) => {
                    let mut inner = self.inner.lock();
                    let now = inner.clock.epoch_ms();
                    let grace = inner.cfg.grace;
                    inner.table.mark_cancelled(id, attempt, now, grace);
                    if matches!(e, ViaError::Full(_)) {
                        inner.saturated = true;
                    }
                    warn!(worker = %inner.name, call = id, error = %e, "call refused by transport");
                    return Err(MediatorError::Transport(e));
                }
            }
        }

        let mut inner = self.inner.lock();
        let now = inner.clock.epoch_ms();
        inner.table.mark_called(id, attempt, now);
        Ok(id)
    }

    /// One parent-loop tick: supervise the pool, drain acknowledgements
    /// and results, sweep timeouts and garbage, refresh backpressure.
    pub fn tick(&self) {
        let mut fired_return: Vec<Call> = Vec::new();
        let mut fired_timeout: Vec<Call> = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != PoolState::Running {
                return;
            }
            let now = inner.clock.epoch_ms();
            let grace = inner.cfg.grace;

            // 1. RUNNING acknowledgements.
            while let Ok(Some(envelope)) = inner.via.get(EnvelopeKind::Running, false) {
                let Envelope::Running { id, pid, .. } = envelope else {
                    continue;
                };
                if inner.table.mark_running(id, now) {
                    inner.running_calls.insert(pid, id);
                }
            }

            // 2. RETURN results.
            while let Ok(Some(envelope)) = inner.via.get(EnvelopeKind::Return, false) {
                let Envelope::Return {
                    id,
                    status,
                    return_value,
                    ..
                } = envelope
                else {
                    continue;
                };
                inner.running_calls.retain(|_, call_id| *call_id != id);
                if let Some(call) = inner.table.complete(id, status, return_value, now, grace) {
                    fired_return.push(call);
                }
            }

            // 3. Supervision, after the drains so a recycled executor's
            // final RETURN is credited before its slot is reaped.
            supervise(&mut inner, now, &mut fired_timeout);

            // 4. Timeout sweep.
            let timeouts = inner.timeouts.clone();
            let default_timeout = inner.cfg.default_timeout;
            let timed_out = inner.table.sweep_timeouts(now, grace, |method| {
                timeouts.get(method).copied().or(default_timeout)
            });
            for call in &timed_out {
                inner.via.drop_call(call.id);
                inner.running_calls.retain(|_, call_id| *call_id != call.id);
                warn!(worker = %inner.name, call = call.id, method = %call.method, "call timed out");
            }
            fired_timeout.extend(timed_out);

            // 5. GC.
            let reaped = inner.table.sweep_gc(now);
            if reaped > 0 {
                debug!(worker = %inner.name, reaped, "garbage-collected terminal calls");
            }

            // 6. Backpressure hysteresis.
            let depth = inner.via.state().messages;
            if depth >= inner.cfg.high_water {
                if !inner.saturated {
                    warn!(worker = %inner.name, depth, "queue past high-water; refusing new calls");
                }
                inner.saturated = true;
            } else if depth <= inner.cfg.low_water {
                inner.saturated = false;
            }
        }
        self.dispatch_listeners(fired_return, fired_timeout);
    }

    /// Stop the pool, reap executors, fail what was in flight.
    pub fn teardown(&self) {
        let slots = {
            let mut inner = self.inner.lock();
            if inner.state != PoolState::Running {
                return;
            }
            inner.state = PoolState::Stopped;
            inner.stop.store(true, Ordering::Release);
            inner.via.release();
            inner.pool.drain(..).collect::<Vec<_>>()
        };
        for slot in slots {
            let _ = slot.handle.join();
        }

        let fired_timeout = {
            let mut inner = self.inner.lock();
            let now = inner.clock.epoch_ms();
            let grace = inner.cfg.grace;
            let in_flight = inner.table.in_flight();
            let fired: Vec<Call> = in_flight
                .into_iter()
                .filter_map(|id| {
                    inner
                        .table
                        .force_uncaught(id, "mediator shut down", now, grace)
                })
                .collect();
            inner.running_calls.clear();
            inner.via.purge();
            info!(worker = %inner.name, abandoned = fired.len(), "worker pool stopped");
            fired
        };
        self.dispatch_listeners(Vec::new(), fired_timeout);
    }

    /// Direct synchronous access to a private worker instance, bypassing
    /// the queue. No timeouts apply; intended for cheap helpers.
    pub fn inline<R>(&self, f: impl FnOnce(&mut W) -> R) -> R {
        let mut inner = self.inner.lock();
        let factory = Arc::clone(&inner.factory);
        let worker = inner.inline.get_or_insert_with(move || factory());
        f(worker)
    }

    pub fn queue_state(&self) -> ViaState {
        self.inner.lock().via.state()
    }

    pub fn snapshot(&self) -> MediatorSnapshot {
        let inner = self.inner.lock();
        MediatorSnapshot {
            name: inner.name.clone(),
            pool: inner.pool.len(),
            active_calls: inner.table.active_count(),
            terminal_calls: inner.table.terminal_count(),
            queue: inner.via.state(),
            saturated: inner.saturated,
        }
    }

    /// Status of a tracked call, while it has not been garbage collected.
    pub fn call_status(&self, id: CallId) -> Option<CallStatus> {
        self.inner.lock().table.get(id).map(|c| c.status)
    }

    /// Invoke listeners outside the inner lock so they can issue follow-up
    /// calls on this mediator without deadlocking.
    fn dispatch_listeners(&self, returns: Vec<Call>, timeouts: Vec<Call>) {
        if returns.is_empty() && timeouts.is_empty() {
            return;
        }
        let (mut on_return, mut on_timeout, shutdown) = {
            let mut inner = self.inner.lock();
            (
                std::mem::take(&mut inner.on_return),
                std::mem::take(&mut inner.on_timeout),
                inner.shutdown.clone(),
            )
        };
        for call in &returns {
            for listener in on_return.iter_mut() {
                listener(call, &shutdown);
            }
        }
        for call in &timeouts {
            for listener in on_timeout.iter_mut() {
                listener(call, &shutdown);
            }
        }
        let mut inner = self.inner.lock();
        // Listeners registered during dispatch land after the originals.
        on_return.append(&mut inner.on_return);
        on_timeout.append(&mut inner.on_timeout);
        inner.on_return = on_return;
        inner.on_timeout = on_timeout;
    }
}

fn spawn_executor<W: Worker, C: Clock>(inner: &mut Inner<W, C>) -> Result<(), MediatorError> {
    let exec_id = inner.next_exec_id;
    inner.next_exec_id += 1;
    let args = ExecutorArgs {
        exec_id,
        via: inner.via.clone(),
        factory: Arc::clone(&inner.factory),
        stop: Arc::clone(&inner.stop),
        recycle_after: inner.cfg.recycle_after,
    };
    let handle = std::thread::Builder::new()
        .name(format!("{}-exec-{exec_id}", inner.name))
        .spawn(move || run_executor(args))?;
    inner.pool.push(PoolSlot {
        exec_id,
        spawned_at: inner.clock.now(),
        handle,
    });
    debug!(worker = %inner.name, executor = exec_id, "executor spawned");
    Ok(())
}

/// Reap dead executors; fail their in-flight calls as timeout-class and
/// respawn unless the pool is stopping.
fn supervise<W: Worker, C: Clock>(
    inner: &mut Inner<W, C>,
    now_ms: u64,
    fired_timeout: &mut Vec<Call>,
) {
    let mut alive = Vec::with_capacity(inner.pool.len());
    let mut respawn = 0usize;
    let grace = inner.cfg.grace;
    for slot in inner.pool.drain(..) {
        if !slot.handle.is_finished() {
            alive.push(slot);
            continue;
        }
        let _ = slot.handle.join();
        warn!(
            worker = %inner.name,
            executor = slot.exec_id,
            lifetime_ms = slot.spawned_at.elapsed().as_millis() as u64,
            "executor exited"
        );
        if let Some(call_id) = inner.running_calls.remove(&slot.exec_id) {
            if let Some(call) =
                inner
                    .table
                    .force_uncaught(call_id, "executor died mid-call", now_ms, grace)
            {
                fired_timeout.push(call);
            }
        }
        respawn += 1;
    }
    inner.pool = alive;
    if !inner.stop.load(Ordering::Acquire) {
        for _ in 0..respawn {
            if let Err(e) = spawn_executor(inner) {
                warn!(worker = %inner.name, error = %e, "failed to respawn executor");
            }
        }
    }
}

impl<W: Worker, C: Clock> Supervised for WorkerMediator<W, C> {
    fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    fn setup(&mut self) -> Result<(), MediatorError> {
        WorkerMediator::setup(self)
    }

    fn tick(&mut self) {
        WorkerMediator::tick(self)
    }

    fn teardown(&mut self) {
        WorkerMediator::teardown(self)
    }

    fn bind_shutdown(&mut self, shutdown: ShutdownHandle) {
        self.inner.lock().shutdown = shutdown;
    }

    fn status_line(&self) -> String {
        let s = self.snapshot();
        format!(
            "pool={} active={} terminal={} queued={} saturated={}",
            s.pool, s.active_calls, s.terminal_calls, s.queue.messages, s.saturated
        )
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
