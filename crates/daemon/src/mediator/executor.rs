// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pool executor loop.
//!
//! Each executor is a spawned child that owns a private worker instance.
//! It blocks on the CALL lane, acknowledges pick-up, dispatches the method,
//! and publishes the result. A failed call never kills the executor; it
//! exits only on teardown or after its recycle budget, and the parent
//! respawns it.

use super::{Worker, WorkerFactory};
use drover_core::{CallStatus, Clock, SystemClock};
use drover_via::{backoff, ChannelVia, Envelope, EnvelopeKind, ViaError};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Transport attempts for executor-side puts.
const PUT_ATTEMPTS: u32 = 5;

pub(crate) struct ExecutorArgs<W: Worker> {
    pub exec_id: u32,
    pub via: ChannelVia,
    pub factory: WorkerFactory<W>,
    pub stop: Arc<AtomicBool>,
    /// Calls served before the executor recycles itself; 0 disables.
    pub recycle_after: u64,
}

pub(crate) fn run_executor<W: Worker>(args: ExecutorArgs<W>) {
    let ExecutorArgs {
        exec_id,
        via,
        factory,
        stop,
        recycle_after,
    } = args;
    let clock = SystemClock;
    let mut worker = factory();
    let mut served: u64 = 0;

    while !stop.load(Ordering::Acquire) {
        let envelope = match via.get(EnvelopeKind::Call, true) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break,
            Err(e) => {
                warn!(executor = exec_id, error = %e, "executor get failed");
                break;
            }
        };
        let Envelope::Call { id, method, args, .. } = envelope else {
            continue;
        };

        let ack = Envelope::Running {
            id,
            pid: exec_id,
            started_at: clock.epoch_ms(),
        };
        if put_with_retry(&via, ack).is_err() {
            break;
        }

        // A panicking worker is replaced; the call still reports Uncaught.
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| worker.dispatch(&method, &args)));
        let (status, value) = match outcome {
            Ok(Ok(value)) => (CallStatus::Returned, value),
            Ok(Err(e)) => (CallStatus::Uncaught, Value::String(e.to_string())),
            Err(_) => {
                warn!(executor = exec_id, method = %method, "worker panicked; rebuilding");
                worker = factory();
                (CallStatus::Uncaught, Value::String("worker panicked".to_string()))
            }
        };

        let reply = Envelope::Return {
            id,
            status,
            return_value: value,
            returned_at: clock.epoch_ms(),
        };
        if put_with_retry(&via, reply).is_err() {
            break;
        }

        served += 1;
        if recycle_after > 0 && served >= recycle_after {
            debug!(executor = exec_id, served, "executor recycling after budget");
            break;
        }
    }
    debug!(executor = exec_id, served, "executor exited");
}

/// Put with exponential backoff; gives up when the transport is released.
fn put_with_retry(via: &ChannelVia, envelope: Envelope) -> Result<(), ViaError> {
    let mut attempt = 0;
    loop {
        match via.put(envelope.clone()) {
            Ok(()) => return Ok(()),
            Err(ViaError::Full(kind)) if attempt + 1 < PUT_ATTEMPTS => {
                debug!(%kind, attempt, "lane full, backing off");
                std::thread::sleep(backoff(attempt));
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
