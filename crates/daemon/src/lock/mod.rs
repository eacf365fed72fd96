// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Singleton lock providers.
//!
//! A provider stores a `{pid, time}` lease under an application identity
//! and refuses acquisition while another live process holds it. Three
//! variants ship: [`NullLock`] (no-op), [`FileLock`] (single host), and
//! [`KvLock`] (pluggable key-value backend).

mod file;
mod kv;
mod null;

pub use file::FileLock;
pub use kv::{KvLock, KvStore, MemoryKv};
pub use null::NullLock;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Slack added to the TTL before a lease is considered expired, covering
/// clock skew between the holder's refresh cadence and a challenger.
pub const LOCK_TTL_PADDING: Duration = Duration::from_secs(2);

/// Default lease TTL when the daemon does not derive one from its loop
/// interval.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// A time-bounded claim on the singleton-instance lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub pid: u32,
    /// Epoch seconds when the lease was written or refreshed.
    pub time: u64,
}

impl Lease {
    /// Still within `ttl + padding` of its last refresh.
    pub fn is_live(&self, ttl: Duration, now_secs: u64) -> bool {
        self.time + ttl.as_secs() + LOCK_TTL_PADDING.as_secs() >= now_secs
    }
}

/// Lock provider errors.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock held by pid {pid} (refreshed {age_secs}s ago)")]
    Held { pid: u32, age_secs: u64 },

    #[error("lock backend error: {0}")]
    Backend(String),

    #[error("lease codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Singleton-instance lock capability.
///
/// The controller runs `check`/`set` during ON_INIT, before the app's
/// (possibly expensive) setup, and refreshes the lease each iteration.
pub trait LockProvider: Send {
    fn setup(&mut self) -> Result<(), LockError>;

    /// Release the lease iff we hold it.
    fn teardown(&mut self) -> Result<(), LockError>;

    /// A live lease held by another process, if any.
    fn check(&mut self) -> Result<Option<Lease>, LockError>;

    /// Acquire or refresh the lease. Fails with [`LockError::Held`] while
    /// another live process owns it.
    fn set(&mut self) -> Result<(), LockError>;

    /// Startup environment problems, empty when the backend is usable.
    fn check_environment(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Decide whether `lease` blocks acquisition by `self_pid` at `now_secs`.
fn blocking_lease(
    lease: Option<Lease>,
    self_pid: u32,
    ttl: Duration,
    now_secs: u64,
) -> Option<Lease> {
    lease.filter(|l| l.pid != self_pid && l.is_live(ttl, now_secs))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
