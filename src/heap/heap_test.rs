// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

use super::*;
use crate::gc::Gc;
use crate::table::Table;

#[test]
fn object_ref_equality_is_pointer_identity() {
    let mut gc = Gc::new(None);
    let a = gc.alloc(None, ObjKind::Buf(BufObj::default()));
    let b = gc.alloc(None, ObjKind::Buf(BufObj::default()));
    assert_eq!(a, a);
    assert_ne!(a, b);
    assert!(a.same_object(&a));
    assert!(!a.same_object(&b));
}

#[test]
fn kind_name_matches_object_kind() {
    let mut gc = Gc::new(None);
    let v = gc.alloc(None, ObjKind::Vec(VecObj::default()));
    assert_eq!(v.kind_name(), "vec");
    let m = gc.alloc(None, ObjKind::Map(MapObj { table: Table::new(), is_set: true, is_weak: false }));
    assert_eq!(m.kind_name(), "set");
}

#[test]
fn blacken_tuple_pushes_its_values() {
    let mut gc = Gc::new(None);
    let elem = gc.alloc(None, ObjKind::Buf(BufObj::default()));
    let tup = gc.alloc(None, ObjKind::Tup(TupObj { values: vec![Value::Obj(elem)].into_boxed_slice() }));
    let mut grey = Vec::new();
    let mut values = Vec::new();
    tup.get().kind.blacken(&mut grey, &mut values);
    assert_eq!(values, vec![Value::Obj(elem)]);
    assert!(grey.is_empty());
}

#[test]
fn blacken_weak_map_yields_nothing() {
    let mut gc = Gc::new(None);
    let key = gc.alloc(None, ObjKind::Buf(BufObj::default()));
    let mut table = Table::new();
    table.set(Value::Obj(key), Value::Obj(key), 0, |a, b| a.strict_eq(b));
    let map = gc.alloc(None, ObjKind::Map(MapObj { table, is_set: false, is_weak: true }));
    let mut grey = Vec::new();
    let mut values = Vec::new();
    map.get().kind.blacken(&mut grey, &mut values);
    assert!(grey.is_empty());
    assert!(values.is_empty());
}

#[test]
fn blacken_non_weak_map_yields_keys_and_values() {
    let mut gc = Gc::new(None);
    let key = gc.alloc(None, ObjKind::Buf(BufObj::default()));
    let val = gc.alloc(None, ObjKind::Buf(BufObj::default()));
    let mut table = Table::new();
    table.set(Value::Obj(key), Value::Obj(val), 0, |a, b| a.strict_eq(b));
    let map = gc.alloc(None, ObjKind::Map(MapObj { table, is_set: false, is_weak: false }));
    let mut grey = Vec::new();
    let mut values = Vec::new();
    map.get().kind.blacken(&mut grey, &mut values);
    assert_eq!(values.len(), 2);
}
