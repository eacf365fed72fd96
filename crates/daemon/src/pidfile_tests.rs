// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn write_records_decimal_pid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("d.pid");
    let pid_file = PidFile::write(&path).unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content, std::process::id().to_string());
    assert_eq!(pid_file.read_pid(), Some(std::process::id()));
}

#[test]
fn write_replaces_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("d.pid");
    std::fs::write(&path, "99999\n").unwrap();
    let pid_file = PidFile::write(&path).unwrap();
    assert_eq!(pid_file.read_pid(), Some(std::process::id()));
}

#[test]
fn remove_if_owned_deletes_own_pid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("d.pid");
    let pid_file = PidFile::write(&path).unwrap();
    pid_file.remove_if_owned();
    assert!(!path.exists());
}

#[test]
fn remove_if_owned_spares_foreign_pid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("d.pid");
    let pid_file = PidFile::write(&path).unwrap();
    // A successor took over the file.
    std::fs::write(&path, "1").unwrap();
    pid_file.remove_if_owned();
    assert!(path.exists());
}

#[test]
fn remove_if_owned_tolerates_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("d.pid");
    let pid_file = PidFile::write(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    pid_file.remove_if_owned();
}
