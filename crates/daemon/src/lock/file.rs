// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed lock provider.
//!
//! The lease is a JSON `{pid, time}` document. Reads and read-modify-write
//! cycles are guarded by OS advisory locks so two daemons racing on the
//! same path serialize their acquisition attempts.

use super::{blocking_lease, Lease, LockError, LockProvider, DEFAULT_LOCK_TTL};
use drover_core::{Clock, SystemClock};
use fs2::FileExt;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Single-host lock provider storing the lease in a file.
pub struct FileLock<C: Clock = SystemClock> {
    path: PathBuf,
    ttl: Duration,
    /// Identity written into the lease. Defaults to this process; a
    /// supervisor acquiring on behalf of a child overrides it.
    pid: u32,
    clock: C,
}

impl FileLock<SystemClock> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(SystemClock, path)
    }
}

impl<C: Clock> FileLock<C> {
    pub fn with_clock(clock: C, path: impl Into<PathBuf>) -> Self {
        let ttl = crate::env::lock_ttl_secs()
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LOCK_TTL);
        Self {
            path: path.into(),
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

    fn read_lease(file: &mut std::fs::File) -> Result<Option<Lease>, LockError> {
        let mut content = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut content)?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        // A torn or foreign file is treated as no lease rather than a
        // permanent lockout.
        Ok(serde_json::from_str(&content).ok())
    }
}

impl<C: Clock> LockProvider for FileLock<C> {
    fn setup(&mut self) -> Result<(), LockError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), LockError> {
        if !self.path.exists() {
            return Ok(());
        }
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        file.lock_exclusive()?;
        let ours = matches!(
            Self::read_lease(&mut file)?,
            Some(lease) if lease.pid == self.pid
        );
        if ours {
            drop(file);
            std::fs::remove_file(&self.path)?;
            debug!(path = %self.path.display(), "released file lock");
        }
        Ok(())
    }

    fn check(&mut self) -> Result<Option<Lease>, LockError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        file.lock_shared()?;
        let lease = Self::read_lease(&mut file)?;
        Ok(blocking_lease(
            lease,
            self.pid,
            self.ttl,
            self.clock.epoch_secs(),
        ))
    }

    fn set(&mut self) -> Result<(), LockError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        file.lock_exclusive()?;

        let now_secs = self.clock.epoch_secs();
        let existing = Self::read_lease(&mut file)?;
        if let Some(holder) = blocking_lease(existing, self.pid, self.ttl, now_secs) {
            return Err(LockError::Held {
                pid: holder.pid,
                age_secs: now_secs.saturating_sub(holder.time),
            });
        }

        let lease = Lease {
            pid: self.pid,
            time: now_secs,
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&serde_json::to_vec(&lease)?)?;
        file.flush()?;
        Ok(())
    }

    fn check_environment(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                problems.push(format!(
                    "lock directory {} does not exist",
                    parent.display()
                ));
            }
        }
        problems
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
