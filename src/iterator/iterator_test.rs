// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::heap::ObjKind;
use crate::vm::VmOptions;

fn new_vm() -> Vm {
    Vm::new(VmOptions::new())
}

fn alloc_iter(vm: &mut Vm, kind: IterKind) -> ObjectRef {
    vm.alloc_iter(kind)
}

#[test]
fn range_counts_up_and_exhausts() {
    let mut vm = new_vm();
    let iter = alloc_iter(&mut vm, IterKind::Range { next: 0, stop: 3, step: 1 });
    let mut seen = Vec::new();
    loop {
        let v = next(&mut vm, iter).unwrap();
        if vm.is_error_sentinel(v) {
            break;
        }
        seen.push(v);
    }
    assert_eq!(seen, vec![Value::I64(0), Value::I64(1), Value::I64(2)]);
}

#[test]
fn range_counts_down_with_negative_step() {
    let mut vm = new_vm();
    let iter = alloc_iter(&mut vm, IterKind::Range { next: 3, stop: 0, step: -1 });
    let mut seen = Vec::new();
    loop {
        let v = next(&mut vm, iter).unwrap();
        if vm.is_error_sentinel(v) {
            break;
        }
        seen.push(v);
    }
    assert_eq!(seen, vec![Value::I64(3), Value::I64(2), Value::I64(1)]);
}

#[test]
fn empty_iterator_is_always_exhausted() {
    let mut vm = new_vm();
    let iter = alloc_iter(&mut vm, IterKind::Empty);
    let v = next(&mut vm, iter).unwrap();
    assert!(vm.is_error_sentinel(v));
}

#[test]
fn vec_iterator_yields_each_element_once() {
    let mut vm = new_vm();
    let elems = vec![Value::I64(10), Value::I64(20)];
    let vec_val = vm.alloc_vec(elems);
    let Value::Obj(vec_ref) = vec_val else { unreachable!() };
    let iter = alloc_iter(&mut vm, IterKind::Vec(vec_ref, 0));
    assert!(matches!(next(&mut vm, iter).unwrap(), Value::I64(10)));
    assert!(matches!(next(&mut vm, iter).unwrap(), Value::I64(20)));
    assert!(vm.is_error_sentinel(next(&mut vm, iter).unwrap()));
}

#[test]
fn join_concatenates_with_separator() {
    let mut vm = new_vm();
    let elems = vec![Value::I64(1), Value::I64(2), Value::I64(3)];
    let vec_val = vm.alloc_vec(elems);
    let Value::Obj(vec_ref) = vec_val else { unreachable!() };
    let iter = alloc_iter(&mut vm, IterKind::Vec(vec_ref, 0));
    let joined = join(&mut vm, iter, ", ").unwrap();
    assert_eq!(vm.as_str_bytes(joined).as_deref(), Some(&b"1, 2, 3"[..]));
}

fn hash_i64(n: i64) -> u64 {
    crate::strings::fnv1a(&n.to_le_bytes())
}

#[test]
fn map_keys_iterator_skips_a_removed_entry_instead_of_stopping_at_it() {
    let mut vm = new_vm();
    let map_val = vm.alloc_map(false);
    let Value::Obj(map_ref) = map_val else { unreachable!() };
    {
        let ObjKind::Map(m) = &mut map_ref.get_mut().kind else { unreachable!() };
        let eq = |a: &Value, b: &Value| a.strict_eq(b);
        m.table.set(Value::I64(1), Value::I64(10), hash_i64(1), eq);
        m.table.set(Value::I64(2), Value::I64(20), hash_i64(2), eq);
        m.table.set(Value::I64(3), Value::I64(30), hash_i64(3), eq);
        m.table.remove(&Value::I64(2), hash_i64(2), eq);
    }

    let iter = alloc_iter(&mut vm, IterKind::MapKeys(map_ref, 0));
    let mut seen = Vec::new();
    loop {
        let v = next(&mut vm, iter).unwrap();
        if vm.is_error_sentinel(v) {
            break;
        }
        seen.push(v);
    }
    assert_eq!(seen, vec![Value::I64(1), Value::I64(3)]);
}

#[test]
fn enumerate_pairs_index_with_value() {
    let mut vm = new_vm();
    let elems = vec![Value::I64(9)];
    let vec_val = vm.alloc_vec(elems);
    let Value::Obj(vec_ref) = vec_val else { unreachable!() };
    let src = alloc_iter(&mut vm, IterKind::Vec(vec_ref, 0));
    let iter = alloc_iter(&mut vm, IterKind::Enumerate(src, 0));
    let first = next(&mut vm, iter).unwrap();
    let Value::Obj(tup_ref) = first else { unreachable!() };
    let ObjKind::Tup(t) = &tup_ref.get().kind else { unreachable!() };
    assert!(matches!(t.values[0], Value::I64(0)));
    assert!(matches!(t.values[1], Value::I64(9)));
}
