// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! No-op lock provider for tests and single-shot tools.

use super::{Lease, LockError, LockProvider};

/// Always acquires, never blocks anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLock;

impl LockProvider for NullLock {
    fn setup(&mut self) -> Result<(), LockError> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), LockError> {
        Ok(())
    }

    fn check(&mut self) -> Result<Option<Lease>, LockError> {
        Ok(None)
    }

    fn set(&mut self) -> Result<(), LockError> {
        Ok(())
    }
}
