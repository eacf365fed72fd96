// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! drover: a framework for long-running background services.
//!
//! A drover daemon runs a user [`App`] on a periodic schedule, dispatches
//! lifecycle events through a throttled [`EventBus`], runs one-shot
//! background tasks, and mediates asynchronous method calls against a pool
//! of isolated worker executors over a typed queue.
//!
//! The parent loop is a single cooperative tokio task; parallelism comes
//! from spawned executor children that share nothing with the parent but
//! the transport.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bus;
pub mod env;
pub mod lifecycle;
pub mod lock;
pub mod logfmt;
pub mod mediator;
pub mod opts;
pub mod pidfile;
pub mod shutdown;
pub mod task;
pub mod timer;

pub use bus::{CallbackHandle, EventBus};
pub use lifecycle::{
    daemonize_if_requested, App, AppCtx, Daemon, DaemonConfig, DaemonError, Outcome, RunState,
    Sig, SignalHub, MIN_RESTART_SECS,
};
pub use lock::{FileLock, KvLock, KvStore, Lease, LockError, LockProvider, MemoryKv, NullLock};
pub use mediator::{
    MediatorConfig, MediatorError, Supervised, Worker, WorkerError, WorkerMediator,
};
pub use opts::Opts;
pub use pidfile::PidFile;
pub use shutdown::ShutdownHandle;
pub use task::{Task, TaskError, TaskExit, TaskId, TaskRunner};
pub use timer::{LoopTimer, TickOutcome};

pub use drover_core::{Call, CallId, CallStatus, Clock, Event, EventKind, FakeClock, SystemClock};
