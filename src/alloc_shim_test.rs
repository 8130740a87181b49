// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

use super::*;

#[test]
fn reserve_and_release_track_bytes_in_use() {
    let mut shim = AllocShim::new(None);
    assert!(shim.reserve(100));
    assert_eq!(shim.bytes_in_use(), 100);
    shim.release(40);
    assert_eq!(shim.bytes_in_use(), 60);
}

#[test]
fn reserve_past_cap_sets_sticky_memory_failure() {
    let mut shim = AllocShim::new(Some(50));
    assert!(shim.reserve(30));
    assert!(!shim.memory_failure());
    assert!(!shim.reserve(40));
    assert!(shim.memory_failure());
    // sticky: stays set even after a release.
    shim.release(40);
    assert!(shim.memory_failure());
    shim.clear_memory_failure();
    assert!(!shim.memory_failure());
}

#[test]
fn over_threshold_compares_current_usage() {
    let mut shim = AllocShim::new(None);
    shim.reserve(100);
    assert!(shim.over_threshold(50));
    assert!(!shim.over_threshold(100));
    assert!(!shim.over_threshold(150));
}

#[test]
fn release_never_underflows() {
    let mut shim = AllocShim::new(None);
    shim.reserve(10);
    shim.release(100);
    assert_eq!(shim.bytes_in_use(), 0);
}
