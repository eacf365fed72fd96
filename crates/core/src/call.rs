// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker `Call` record.
//!
//! A `Call` is the unit of work flowing through a worker mediator: created
//! by the parent, executed by exactly one pool executor, and tracked until
//! garbage collection. Status moves monotonically forward and reaches a
//! terminal state exactly once.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Monotonically increasing call identifier, scoped to one mediator.
pub type CallId = u64;

/// Lifecycle of a call.
///
/// `Uncalled → Called → Running → {Returned, Cancelled, Timeout, Uncaught}`.
/// A call may also go terminal straight from `Called` (e.g. a timeout before
/// any executor picked it up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Uncalled,
    Called,
    Running,
    Returned,
    Cancelled,
    Timeout,
    Uncaught,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CallStatus::Uncalled => "uncalled",
            CallStatus::Called => "called",
            CallStatus::Running => "running",
            CallStatus::Returned => "returned",
            CallStatus::Cancelled => "cancelled",
            CallStatus::Timeout => "timeout",
            CallStatus::Uncaught => "uncaught",
        })
    }
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Returned
                | CallStatus::Cancelled
                | CallStatus::Timeout
                | CallStatus::Uncaught
        )
    }

    /// Position in the forward-only lifecycle. Terminal states share a rank.
    fn rank(self) -> u8 {
        match self {
            CallStatus::Uncalled => 0,
            CallStatus::Called => 1,
            CallStatus::Running => 2,
            _ => 3,
        }
    }
}

/// A status transition would move backwards or leave a terminal state.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("call {id} cannot move {from} -> {to}")]
pub struct StatusViolation {
    pub id: CallId,
    pub from: CallStatus,
    pub to: CallStatus,
}

/// A parent-issued invocation of a worker method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: CallId,
    pub method: String,
    pub args: Vec<Value>,
    /// Transport re-send attempts.
    pub retries: u32,
    /// Errors surfaced while executing or shipping this call.
    pub errors: u32,
    /// Approximate payload size in bytes.
    pub size: usize,
    pub status: CallStatus,
    /// Epoch-ms stamps for each lifecycle edge.
    pub queued_at: Option<u64>,
    pub started_at: Option<u64>,
    pub returned_at: Option<u64>,
    /// When this call becomes eligible for garbage collection.
    pub gc_at: Option<u64>,
    pub return_value: Option<Value>,
}

impl Call {
    pub fn new(id: CallId, method: impl Into<String>, args: Vec<Value>) -> Self {
        let method = method.into();
        let size = method.len()
            + args
                .iter()
                .map(|a| serde_json::to_vec(a).map(|v| v.len()).unwrap_or(0))
                .sum::<usize>();
        Self {
            id,
            method,
            args,
            retries: 0,
            errors: 0,
            size,
            status: CallStatus::Uncalled,
            queued_at: None,
            started_at: None,
            returned_at: None,
            gc_at: None,
            return_value: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Advance to `to`, stamping the matching timestamp.
    ///
    /// Transitions must move strictly forward; a second terminal transition
    /// is refused so terminal dispatch stays exactly-once.
    pub fn advance(&mut self, to: CallStatus, now_ms: u64) -> Result<(), StatusViolation> {
        if to.rank() <= self.status.rank() {
            return Err(StatusViolation {
                id: self.id,
                from: self.status,
                to,
            });
        }
        match to {
            CallStatus::Called => self.queued_at = Some(now_ms),
            CallStatus::Running => self.started_at = Some(now_ms),
            _ => self.returned_at = Some(now_ms),
        }
        self.status = to;
        Ok(())
    }

    /// Milliseconds the call has been in flight relative to `now_ms`,
    /// measured from pick-up when known, otherwise from enqueue.
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        let anchor = self.started_at.or(self.queued_at)?;
        Some(now_ms.saturating_sub(anchor))
    }
}

#[cfg(test)]
#[path = "call_tests.rs"]
mod tests;
