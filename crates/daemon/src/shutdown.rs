// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cooperative shutdown flag.
//!
//! The sole cancellation channel: once requested, the loop exits after the
//! current iteration. Handles are cheap clones over one shared flag; the
//! controller passes one to every bus callback and call-lifecycle listener
//! so they can stop the daemon without a reference back to it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable request-to-stop flag shared by a daemon, its event bus, and
/// its worker mediators.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the loop to exit after the current iteration. Idempotent; the
    /// flag never resets.
    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "shutdown_tests.rs"]
mod tests;
