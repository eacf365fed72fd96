// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process typed queue.
//!
//! One lane per envelope kind. CALL is multi-consumer (exactly one
//! executor pops each message); RUNNING and RETURN flow back to the single
//! parent. Delivery is FIFO per lane; nothing is promised across lanes.

use parking_lot::{Condvar, Mutex};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeKind};
use drover_core::CallId;

/// Default per-lane capacity.
pub const DEFAULT_CAPACITY: usize = 512;

/// Backoff ceiling for transport retries.
const BACKOFF_CAP_MS: u64 = 5_000;

/// Transport errors.
#[derive(Debug, Error)]
pub enum ViaError {
    #[error("queue lane '{0}' is full")]
    Full(EnvelopeKind),

    #[error("transport has been released")]
    Released,

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the length prefix")]
    FrameTooLarge(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Queue observability snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViaState {
    /// Messages currently queued across all lanes.
    pub messages: usize,
    /// Approximate bytes held by queued messages.
    pub memory_allocation: usize,
    /// Errors recorded since creation.
    pub error_count: u64,
}

struct Lane {
    queue: Mutex<VecDeque<(Envelope, usize)>>,
    ready: Condvar,
}

impl Lane {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }
}

struct Shared {
    capacity: usize,
    lanes: [Lane; 3],
    released: AtomicBool,
    bytes: AtomicUsize,
    errors: AtomicU64,
}

impl Shared {
    fn lane(&self, kind: EnvelopeKind) -> &Lane {
        match kind {
            EnvelopeKind::Call => &self.lanes[0],
            EnvelopeKind::Running => &self.lanes[1],
            EnvelopeKind::Return => &self.lanes[2],
        }
    }
}

/// Typed multi-producer / multi-consumer queue between a mediator parent
/// and its pool executors.
#[derive(Clone)]
pub struct ChannelVia {
    shared: Arc<Shared>,
}

impl Default for ChannelVia {
    fn default() -> Self {
        Self::bounded(DEFAULT_CAPACITY)
    }
}

impl ChannelVia {
    /// Create a transport with the given per-lane capacity.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity,
                lanes: [Lane::new(), Lane::new(), Lane::new()],
                released: AtomicBool::new(false),
                bytes: AtomicUsize::new(0),
                errors: AtomicU64::new(0),
            }),
        }
    }

    /// Enqueue an envelope on its lane.
    pub fn put(&self, envelope: Envelope) -> Result<(), ViaError> {
        if self.shared.released.load(Ordering::Acquire) {
            self.shared.errors.fetch_add(1, Ordering::Relaxed);
            return Err(ViaError::Released);
        }
        let kind = envelope.kind();
        let size = envelope.size_hint();
        let lane = self.shared.lane(kind);
        let mut queue = lane.queue.lock();
        if queue.len() >= self.shared.capacity {
            self.shared.errors.fetch_add(1, Ordering::Relaxed);
            return Err(ViaError::Full(kind));
        }
        queue.push_back((envelope, size));
        self.shared.bytes.fetch_add(size, Ordering::Relaxed);
        lane.ready.notify_one();
        Ok(())
    }

    /// Dequeue the oldest envelope of `kind`.
    ///
    /// Blocking gets park until a message arrives or the transport is
    /// released; `Ok(None)` means released-and-drained (or, non-blocking,
    /// simply empty).
    pub fn get(&self, kind: EnvelopeKind, blocking: bool) -> Result<Option<Envelope>, ViaError> {
        let lane = self.shared.lane(kind);
        let mut queue = lane.queue.lock();
        loop {
            if let Some((envelope, size)) = queue.pop_front() {
                self.shared.bytes.fetch_sub(size, Ordering::Relaxed);
                return Ok(Some(envelope));
            }
            if !blocking || self.shared.released.load(Ordering::Acquire) {
                return Ok(None);
            }
            lane.ready.wait(&mut queue);
        }
    }

    /// Remove a still-pending CALL message, if present.
    pub fn drop_call(&self, id: CallId) -> bool {
        let lane = self.shared.lane(EnvelopeKind::Call);
        let mut queue = lane.queue.lock();
        let before = queue.len();
        queue.retain(|(envelope, size)| {
            if envelope.call_id() == id {
                self.shared.bytes.fetch_sub(*size, Ordering::Relaxed);
                false
            } else {
                true
            }
        });
        queue.len() != before
    }

    /// Discard every queued message on every lane.
    pub fn purge(&self) {
        for lane in &self.shared.lanes {
            let mut queue = lane.queue.lock();
            for (_, size) in queue.drain(..) {
                self.shared.bytes.fetch_sub(size, Ordering::Relaxed);
            }
        }
    }

    /// Close the transport and wake every blocked consumer.
    ///
    /// Further `put`s fail; blocked `get`s drain what remains and then
    /// observe `None`.
    pub fn release(&self) {
        self.shared.released.store(true, Ordering::Release);
        for lane in &self.shared.lanes {
            let _guard = lane.queue.lock();
            lane.ready.notify_all();
        }
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::Acquire)
    }

    /// Record a transport-level error observed by a caller.
    pub fn note_error(&self) {
        self.shared.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn state(&self) -> ViaState {
        let messages = self
            .shared
            .lanes
            .iter()
            .map(|lane| lane.queue.lock().len())
            .sum();
        ViaState {
            messages,
            memory_allocation: self.shared.bytes.load(Ordering::Relaxed),
            error_count: self.shared.errors.load(Ordering::Relaxed),
        }
    }
}

/// Retry delay for transport attempt `attempt` (0-based).
///
/// Exponential from 100ms, capped at 5s, with up to 25% subtractive jitter
/// so a stalled pool does not retry in lockstep.
pub fn backoff(attempt: u32) -> Duration {
    let base = 100u64.saturating_mul(1u64 << attempt.min(16));
    let capped = base.min(BACKOFF_CAP_MS);
    let jitter = rand::thread_rng().gen_range(0..=capped / 4);
    Duration::from_millis(capped - jitter)
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
