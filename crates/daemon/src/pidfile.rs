// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pid-file handling.
//!
//! Plain text, decimal pid. Removal only happens when the file still
//! contains our own pid, so a successor that already overwrote it is left
//! alone.

use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A pid file owned by the parent process.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current pid, replacing any existing content.
    pub fn write(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pid currently recorded in the file, if parseable.
    pub fn read_pid(&self) -> Option<u32> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        content.trim().parse().ok()
    }

    /// Delete the file iff its contents still match our pid.
    pub fn remove_if_owned(&self) {
        match self.read_pid() {
            Some(pid) if pid == std::process::id() => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "failed to remove pid file");
                }
            }
            Some(_) => {
                // A successor already owns the path.
            }
            None => {}
        }
    }
}

#[cfg(test)]
#[path = "pidfile_tests.rs"]
mod tests;
