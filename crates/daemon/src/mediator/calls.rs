// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parent-side call table.
//!
//! Owns every in-flight and recently-terminal [`Call`]. All transitions go
//! through here so de-duplication (late or repeated RUNNING/RETURN
//! messages) and exactly-once terminal dispatch hold by construction.

use drover_core::{Call, CallId, CallStatus};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub(crate) struct CallTable {
    next_id: CallId,
    calls: HashMap<CallId, Call>,
}

impl CallTable {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            calls: HashMap::new(),
        }
    }

    /// Create a new call in `Uncalled`.
    pub(crate) fn create(&mut self, method: &str, args: Vec<Value>) -> CallId {
        let id = self.next_id;
        self.next_id += 1;
        self.calls.insert(id, Call::new(id, method, args));
        id
    }

    pub(crate) fn get(&self, id: CallId) -> Option<&Call> {
        self.calls.get(&id)
    }

    /// The transport accepted the CALL message: `Uncalled → Called`.
    pub(crate) fn mark_called(&mut self, id: CallId, retries: u32, now_ms: u64) {
        if let Some(call) = self.calls.get_mut(&id) {
            call.retries = retries;
            let _ = call.advance(CallStatus::Called, now_ms);
        }
    }

    /// The transport refused the CALL after retries: terminal `Cancelled`.
    pub(crate) fn mark_cancelled(
        &mut self,
        id: CallId,
        retries: u32,
        now_ms: u64,
        grace: Duration,
    ) {
        if let Some(call) = self.calls.get_mut(&id) {
            call.retries = retries;
            call.errors += 1;
            if call.advance(CallStatus::Cancelled, now_ms).is_ok() {
                call.gc_at = Some(now_ms + grace.as_millis() as u64);
            }
        }
    }

    /// An executor acknowledged pick-up. Late acks (the call already timed
    /// out or returned) are dropped.
    pub(crate) fn mark_running(&mut self, id: CallId, now_ms: u64) -> bool {
        let Some(call) = self.calls.get_mut(&id) else {
            debug!(call = id, "RUNNING for unknown call dropped");
            return false;
        };
        match call.advance(CallStatus::Running, now_ms) {
            Ok(()) => true,
            Err(violation) => {
                debug!(call = id, %violation, "late RUNNING dropped");
                false
            }
        }
    }

    /// An executor published a result. Returns a clone of the terminal call
    /// for listener dispatch; `None` when the message is a duplicate or
    /// arrives after the call already went terminal.
    pub(crate) fn complete(
        &mut self,
        id: CallId,
        status: CallStatus,
        value: Value,
        now_ms: u64,
        grace: Duration,
    ) -> Option<Call> {
        let call = self.calls.get_mut(&id)?;
        match call.advance(status, now_ms) {
            Ok(()) => {
                if status == CallStatus::Uncaught {
                    call.errors += 1;
                }
                call.return_value = Some(value);
                call.gc_at = Some(now_ms + grace.as_millis() as u64);
                Some(call.clone())
            }
            Err(violation) => {
                debug!(call = id, %violation, "late RETURN dropped");
                None
            }
        }
    }

    /// Transition every over-budget Called/Running call to `Timeout`.
    ///
    /// Elapsed time runs from pick-up when the executor acknowledged,
    /// otherwise from enqueue.
    pub(crate) fn sweep_timeouts(
        &mut self,
        now_ms: u64,
        grace: Duration,
        timeout_for: impl Fn(&str) -> Option<Duration>,
    ) -> Vec<Call> {
        let mut timed_out = Vec::new();
        for call in self.calls.values_mut() {
            if !matches!(call.status, CallStatus::Called | CallStatus::Running) {
                continue;
            }
            let Some(bound) = timeout_for(&call.method) else {
                continue;
            };
            let over = call
                .elapsed_ms(now_ms)
                .map(|elapsed| elapsed > bound.as_millis() as u64)
                .unwrap_or(false);
            if over && call.advance(CallStatus::Timeout, now_ms).is_ok() {
                call.gc_at = Some(now_ms + grace.as_millis() as u64);
                timed_out.push(call.clone());
            }
        }
        timed_out
    }

    /// Remove terminal calls past their grace period.
    pub(crate) fn sweep_gc(&mut self, now_ms: u64) -> usize {
        let before = self.calls.len();
        self.calls
            .retain(|_, call| !(call.is_terminal() && call.gc_at.is_some_and(|gc| gc <= now_ms)));
        before - self.calls.len()
    }

    /// Force-fail a non-terminal call (dead executor, shutdown).
    pub(crate) fn force_uncaught(
        &mut self,
        id: CallId,
        reason: &str,
        now_ms: u64,
        grace: Duration,
    ) -> Option<Call> {
        self.complete(id, CallStatus::Uncaught, Value::String(reason.to_string()), now_ms, grace)
    }

    /// Non-terminal call ids, for shutdown sweeps.
    pub(crate) fn in_flight(&self) -> Vec<CallId> {
        self.calls
            .values()
            .filter(|c| !c.is_terminal())
            .map(|c| c.id)
            .collect()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.calls.values().filter(|c| !c.is_terminal()).count()
    }

    pub(crate) fn terminal_count(&self) -> usize {
        self.calls.values().filter(|c| c.is_terminal()).count()
    }
}

#[cfg(test)]
#[path = "calls_tests.rs"]
mod tests;
