// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::lock::LockError;
use drover_core::FakeClock;
use tempfile::tempdir;

fn provider(clock: &FakeClock, path: &std::path::Path, pid: u32) -> FileLock<FakeClock> {
    FileLock::with_clock(clock.clone(), path)
        .ttl(Duration::from_secs(30))
        .pid(pid)
}

#[test]
fn set_then_check_sees_no_blocker_for_self() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let mut lock = provider(&clock, &dir.path().join("d.lock"), 100);
    lock.setup().unwrap();
    lock.set().unwrap();
    assert!(lock.check().unwrap().is_none());
}

#[test]
fn second_instance_is_refused_while_lease_is_live() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("d.lock");
    let clock = FakeClock::new();
    let mut first = provider(&clock, &path, 100);
    let mut second = provider(&clock, &path, 200);

    first.set().unwrap();
    let holder = second.check().unwrap().unwrap();
    assert_eq!(holder.pid, 100);
    assert!(matches!(
        second.set().unwrap_err(),
        LockError::Held { pid: 100, .. }
    ));
}

#[test]
fn expired_lease_can_be_taken_over() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("d.lock");
    let clock = FakeClock::new();
    let mut first = provider(&clock, &path, 100);
    let mut second = provider(&clock, &path, 200);

    first.set().unwrap();
    // Past ttl + padding the stale lease no longer blocks.
    clock.advance(Duration::from_secs(60));
    assert!(second.check().unwrap().is_none());
    second.set().unwrap();
    // Roles flip: the old holder is now the challenger.
    assert!(matches!(
        first.set().unwrap_err(),
        LockError::Held { pid: 200, .. }
    ));
}

#[test]
fn refresh_extends_own_lease() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("d.lock");
    let clock = FakeClock::new();
    let mut holder = provider(&clock, &path, 100);
    let mut challenger = provider(&clock, &path, 200);

    holder.set().unwrap();
    for _ in 0..4 {
        clock.advance(Duration::from_secs(20));
        holder.set().unwrap();
    }
    // 80s after acquisition the lease is still live because it was
    // refreshed 20s ago.
    assert!(challenger.set().is_err());
}

#[test]
fn teardown_releases_only_own_lease() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("d.lock");
    let clock = FakeClock::new();
    let mut holder = provider(&clock, &path, 100);
    let mut other = provider(&clock, &path, 200);

    holder.set().unwrap();
    other.teardown().unwrap();
    assert!(path.exists(), "foreign teardown must not release the lease");
    holder.teardown().unwrap();
    assert!(!path.exists());
}

#[test]
fn corrupt_lease_file_does_not_lock_out() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("d.lock");
    std::fs::write(&path, "not json").unwrap();
    let clock = FakeClock::new();
    let mut lock = provider(&clock, &path, 100);
    assert!(lock.check().unwrap().is_none());
    lock.set().unwrap();
}

#[test]
fn check_environment_flags_missing_directory() {
    let clock = FakeClock::new();
    let lock = provider(&clock, std::path::Path::new("/nonexistent/dir/d.lock"), 1);
    let problems = lock.check_environment();
    assert_eq!(problems.len(), 1);
    assert!(problems[0].contains("/nonexistent/dir"));
}

#[test]
fn setup_creates_parent_directory() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested/deeper/d.lock");
    let clock = FakeClock::new();
    let mut lock = provider(&clock, &path, 1);
    lock.setup().unwrap();
    assert!(path.parent().unwrap().exists());
}
