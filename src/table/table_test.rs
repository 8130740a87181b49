// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! Tests for the open-addressed hash table engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

fn hash_i64(n: i64) -> u64 {
    crate::strings::fnv1a(&n.to_le_bytes())
}

fn strict_eq(a: &Value, b: &Value) -> bool {
    a.strict_eq(b)
}

#[test]
fn set_then_get_round_trips() {
    let mut t = Table::new();
    let h = hash_i64(1);
    assert_eq!(t.set(Value::I64(1), Value::I64(100), h, strict_eq), SetOutcome::Inserted);
    assert_eq!(t.get(&Value::I64(1), h, strict_eq), Some(Value::I64(100)));
    assert_eq!(t.live_count(), 1);
}

#[test]
fn set_on_existing_key_updates_rather_than_duplicates() {
    let mut t = Table::new();
    let h = hash_i64(1);
    t.set(Value::I64(1), Value::I64(1), h, strict_eq);
    let outcome = t.set(Value::I64(1), Value::I64(2), h, strict_eq);
    assert_eq!(outcome, SetOutcome::Updated);
    assert_eq!(t.live_count(), 1);
    assert_eq!(t.get(&Value::I64(1), h, strict_eq), Some(Value::I64(2)));
}

#[test]
fn get_on_missing_key_is_none() {
    let t = Table::new();
    assert_eq!(t.get(&Value::I64(1), hash_i64(1), strict_eq), None);
}

#[test]
fn remove_then_get_is_none_but_slot_is_reusable() {
    let mut t = Table::new();
    let h = hash_i64(1);
    t.set(Value::I64(1), Value::I64(1), h, strict_eq);
    assert!(t.remove(&Value::I64(1), h, strict_eq));
    assert_eq!(t.get(&Value::I64(1), h, strict_eq), None);
    assert_eq!(t.live_count(), 0);
    assert!(!t.remove(&Value::I64(1), h, strict_eq));
}

#[test]
fn remove_then_reinsert_does_not_leak_tombstones_forever() {
    let mut t = Table::new();
    for i in 0..32 {
        t.set(Value::I64(i), Value::I64(i), hash_i64(i), strict_eq);
    }
    for i in 0..16 {
        t.remove(&Value::I64(i), hash_i64(i), strict_eq);
    }
    for i in 100..116 {
        t.set(Value::I64(i), Value::I64(i), hash_i64(i), strict_eq);
    }
    assert_eq!(t.live_count(), 32);
    for i in 16..32 {
        assert_eq!(t.get(&Value::I64(i), hash_i64(i), strict_eq), Some(Value::I64(i)));
    }
    for i in 100..116 {
        assert_eq!(t.get(&Value::I64(i), hash_i64(i), strict_eq), Some(Value::I64(i)));
    }
}

#[test]
fn grow_preserves_every_live_entry() {
    let mut t = Table::new();
    for i in 0..200 {
        t.set(Value::I64(i), Value::I64(i * 2), hash_i64(i), strict_eq);
    }
    assert_eq!(t.live_count(), 200);
    for i in 0..200 {
        assert_eq!(t.get(&Value::I64(i), hash_i64(i), strict_eq), Some(Value::I64(i * 2)));
    }
}

#[test]
fn iter_live_skips_tombstones() {
    let mut t = Table::new();
    t.set(Value::I64(1), Value::I64(1), hash_i64(1), strict_eq);
    t.set(Value::I64(2), Value::I64(2), hash_i64(2), strict_eq);
    t.remove(&Value::I64(1), hash_i64(1), strict_eq);
    let remaining: Vec<_> = t.iter_live().collect();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].0.strict_eq(&Value::I64(2)));
}

#[test]
fn contains_matches_get() {
    let mut t = Table::new();
    let h = hash_i64(5);
    assert!(!t.contains(&Value::I64(5), h, strict_eq));
    t.set(Value::I64(5), Value::Bool(true), h, strict_eq);
    assert!(t.contains(&Value::I64(5), h, strict_eq));
}

#[test]
fn entry_at_distinguishes_tombstone_from_past_the_end() {
    let mut t = Table::new();
    t.set(Value::I64(1), Value::I64(1), hash_i64(1), strict_eq);
    t.set(Value::I64(2), Value::I64(2), hash_i64(2), strict_eq);
    t.remove(&Value::I64(1), hash_i64(1), strict_eq);

    assert!(t.is_tombstone_at(0));
    assert_eq!(t.entry_at(0), None);
    assert!(t.entry_at(1).is_some());
    assert!(!t.is_tombstone_at(1));
    assert!(!t.is_tombstone_at(t.entry_array_len()));
    assert_eq!(t.entry_at(t.entry_array_len()), None);
}

#[test]
fn copy_entries_into_copies_every_live_pair() {
    let mut src = Table::new();
    for i in 0..10 {
        src.set(Value::I64(i), Value::I64(i), hash_i64(i), strict_eq);
    }
    src.remove(&Value::I64(3), hash_i64(3), strict_eq);

    let mut dst = Table::new();
    let ok = src.copy_entries_into(&mut dst, |v| match v {
        Value::I64(n) => hash_i64(*n),
        _ => 0,
    }, strict_eq);
    assert!(ok);
    assert_eq!(dst.live_count(), 9);
    assert_eq!(dst.get(&Value::I64(3), hash_i64(3), strict_eq), None);
    assert_eq!(dst.get(&Value::I64(7), hash_i64(7), strict_eq), Some(Value::I64(7)));
}
