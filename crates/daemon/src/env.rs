// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;

/// Marker set on a re-spawned process so `-d` does not detach twice and the
/// successor knows to announce its new pid.
pub const DAEMONIZED_MARKER: &str = "DROVER_DAEMONIZED";

/// True when this process was started as a detached re-spawn.
pub fn is_daemonized_respawn() -> bool {
    std::env::var_os(DAEMONIZED_MARKER).is_some()
}

/// Log file path override. Unset means log to stdout.
pub fn log_path() -> Option<PathBuf> {
    std::env::var_os("DROVER_LOG").map(PathBuf::from)
}

/// Lease TTL override in seconds, for lock providers.
pub fn lock_ttl_secs() -> Option<u64> {
    std::env::var("DROVER_LOCK_TTL_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
