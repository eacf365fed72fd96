// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key-value lock provider.
//!
//! The distributed variant: the lease lives under the daemon's identity in
//! a pluggable [`KvStore`]. [`MemoryKv`] ships for tests and process-local
//! trees; network backends implement the same trait.

use super::{blocking_lease, Lease, LockError, LockProvider, DEFAULT_LOCK_TTL};
use drover_core::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Lease storage backend.
pub trait KvStore: Send {
    fn get(&mut self, key: &str) -> Result<Option<Lease>, LockError>;
    fn put(&mut self, key: &str, lease: Lease) -> Result<(), LockError>;
    fn delete(&mut self, key: &str) -> Result<(), LockError>;

    /// Startup problems; empty when the backend is reachable.
    fn check_environment(&self) -> Vec<String> {
        Vec::new()
    }
}

/// In-memory backend. Clones share one map, so several providers can
/// contend for the same key under test.
#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    map: Arc<Mutex<HashMap<String, Lease>>>,
}

impl KvStore for MemoryKv {
    fn get(&mut self, key: &str) -> Result<Option<Lease>, LockError> {
        Ok(self.map.lock().get(key).copied())
    }

    fn put(&mut self, key: &str, lease: Lease) -> Result<(), LockError> {
        self.map.lock().insert(key.to_string(), lease);
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), LockError> {
        self.map.lock().remove(key);
        Ok(())
    }
}

/// Lock provider over a [`KvStore`], keyed by daemon identity.
pub struct KvLock<S: KvStore, C: Clock = SystemClock> {
    store: S,
    key: String,
    ttl: Duration,
    pid: u32,
    clock: C,
}

impl<S: KvStore> KvLock<S, SystemClock> {
    pub fn new(store: S, identity: impl Into<String>) -> Self {
        Self::with_clock(SystemClock, store, identity)
    }
}

impl<S: KvStore, C: Clock> KvLock<S, C> {
    pub fn with_clock(clock: C, store: S, identity: impl Into<String>) -> Self {
        let ttl = crate::env::lock_ttl_secs()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOCK_TTL);
        Self {
            store,
            key: format!("drover:lock:{}", identity.into()),
            ttl,
            pid: std::process::id(),
            clock,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Override the lease identity (supervisors acquiring for a child).
    pub fn pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }
}

impl<S: KvStore, C: Clock> LockProvider for KvLock<S, C> {
    fn setup(&mut self) -> Result<(), LockError> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), LockError> {
        let ours = matches!(
            self.store.get(&self.key)?,
            Some(lease) if lease.pid == self.pid
        );
        if ours {
            self.store.delete(&self.key)?;
            debug!(key = %self.key, "released kv lock");
        }
        Ok(())
    }

    fn check(&mut self) -> Result<Option<Lease>, LockError> {
        let lease = self.store.get(&self.key)?;
        Ok(blocking_lease(
            lease,
            self.pid,
            self.ttl,
            self.clock.epoch_secs(),
        ))
    }

    fn set(&mut self) -> Result<(), LockError> {
        let now_secs = self.clock.epoch_secs();
        if let Some(holder) = self.check()? {
            return Err(LockError::Held {
                pid: holder.pid,
                age_secs: now_secs.saturating_sub(holder.time),
            });
        }
        self.store.put(
            &self.key,
            Lease {
                pid: self.pid,
                time: now_secs,
            },
        )
    }

    fn check_environment(&self) -> Vec<String> {
        self.store.check_environment()
    }
}

#[cfg(test)]
#[path = "kv_tests.rs"]
mod tests;
