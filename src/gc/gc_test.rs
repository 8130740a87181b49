// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

use super::*;
use crate::heap::StrObj;

fn alloc_str(gc: &mut Gc, bytes: &[u8]) -> ObjectRef {
    gc.alloc(None, ObjKind::Str(StrObj { bytes: bytes.to_vec().into_boxed_slice(), hash: 0 }))
}

#[test]
fn unreferenced_object_is_swept() {
    let mut gc = Gc::new(None);
    alloc_str(&mut gc, b"garbage");
    assert!(gc.bytes_in_use() > 0);
    gc.collect(&[], &[]);
    assert_eq!(gc.bytes_in_use(), 0);
}

#[test]
fn rooted_object_survives_collection() {
    let mut gc = Gc::new(None);
    let s = alloc_str(&mut gc, b"kept");
    gc.collect(&[], &[s]);
    assert!(gc.bytes_in_use() > 0);
    // still reachable on a second collection through the same root
    gc.collect(&[], &[s]);
    assert!(gc.bytes_in_use() > 0);
}

#[test]
fn value_root_keeps_object_alive() {
    let mut gc = Gc::new(None);
    let s = alloc_str(&mut gc, b"kept");
    gc.collect(&[Value::Obj(s)], &[]);
    assert!(gc.bytes_in_use() > 0);
}

#[test]
fn guard_disallows_collection() {
    let mut gc = Gc::new(None);
    alloc_str(&mut gc, b"temp");
    let before = gc.bytes_in_use();
    {
        let _guard = gc.disallow();
        gc.collect(&[], &[]);
        assert_eq!(gc.bytes_in_use(), before);
    }
    gc.collect(&[], &[]);
    assert_eq!(gc.bytes_in_use(), 0);
}

#[test]
fn should_collect_respects_stress_mode() {
    let mut gc = Gc::new(None);
    assert!(!gc.should_collect());
    gc.set_stress_mode(true);
    assert!(gc.should_collect());
}

#[test]
fn weak_sweep_runs_before_final_sweep() {
    let mut gc = Gc::new(None);
    let s = alloc_str(&mut gc, b"weakly-held");
    let mut observed_marked = false;
    gc.collect_with_weak_sweep(&[], &[], || {
        observed_marked = s.get().marked.get();
    });
    // not rooted, so the weak callback should see it unmarked, and it
    // should be gone after the sweep that follows.
    assert!(!observed_marked);
    assert_eq!(gc.bytes_in_use(), 0);
}
