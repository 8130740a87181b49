// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::vm::VmOptions;

fn new_vm() -> Vm {
    Vm::new(VmOptions::new())
}

#[test]
fn add_mixes_int_and_float() {
    let mut vm = new_vm();
    let r = add(&mut vm, Value::I64(2), Value::F64(1.5)).unwrap();
    assert!(matches!(r, Value::F64(f) if (f - 3.5).abs() < f64::EPSILON));
}

#[test]
fn string_concatenation_via_add() {
    let mut vm = new_vm();
    let a = vm.intern_copy(b"foo");
    let b = vm.intern_copy(b"bar");
    let r = add(&mut vm, a, b).unwrap();
    assert_eq!(vm.as_str_bytes(r).as_deref(), Some(&b"foobar"[..]));
}

#[test]
fn divide_by_zero_int_panics() {
    let mut vm = new_vm();
    let err = div(&mut vm, Value::I64(1), Value::I64(0)).unwrap_err();
    assert!(matches!(err, RuntimeError::Panic(_)));
}

#[test]
fn floor_div_truncates_toward_negative_infinity() {
    let mut vm = new_vm();
    let r = floor_div(&mut vm, Value::I64(-7), Value::I64(2)).unwrap();
    assert!(matches!(r, Value::I64(-4)));
}

#[test]
fn less_than_precise_past_two_pow_53() {
    let mut vm = new_vm();
    // 2^53 + 1 cannot be represented exactly as f64; the naive cast would
    // have rounded it down to 2^53 and called the two values equal.
    let big = (1i64 << 53) + 1;
    let r = less(&mut vm, Value::F64((1u64 << 53) as f64), Value::I64(big)).unwrap();
    assert!(matches!(r, Value::Bool(true)));
}

#[test]
fn nan_is_never_equal_even_to_itself() {
    let mut vm = new_vm();
    let r = equal(&mut vm, Value::F64(f64::NAN), Value::F64(f64::NAN)).unwrap();
    assert!(matches!(r, Value::Bool(false)));
}

#[test]
fn cross_type_numeric_equality() {
    let mut vm = new_vm();
    let r = equal(&mut vm, Value::I64(7), Value::F64(7.0)).unwrap();
    assert!(matches!(r, Value::Bool(true)));
    let r = equal(&mut vm, Value::Char(7), Value::I64(7)).unwrap();
    assert!(matches!(r, Value::Bool(true)));
}

#[test]
fn neg_negates_numbers() {
    let mut vm = new_vm();
    assert!(matches!(neg(&mut vm, Value::I64(5)).unwrap(), Value::I64(-5)));
    assert!(matches!(neg(&mut vm, Value::F64(5.0)).unwrap(), Value::F64(f) if f == -5.0));
}

#[test]
fn tuples_compare_element_wise_not_by_identity() {
    let mut vm = new_vm();
    let a = vm.alloc_tuple(&[Value::I64(1), Value::I64(2)]).unwrap();
    let b = vm.alloc_tuple(&[Value::I64(1), Value::I64(2)]).unwrap();
    let c = vm.alloc_tuple(&[Value::I64(1), Value::I64(3)]).unwrap();
    assert!(!a.strict_eq(&b), "sanity: distinct allocations aren't identical");
    assert!(matches!(equal(&mut vm, a, b).unwrap(), Value::Bool(true)));
    assert!(matches!(equal(&mut vm, a, c).unwrap(), Value::Bool(false)));
}

#[test]
fn tuples_of_different_length_are_unequal() {
    let mut vm = new_vm();
    let a = vm.alloc_tuple(&[Value::I64(1)]).unwrap();
    let b = vm.alloc_tuple(&[Value::I64(1), Value::I64(2)]).unwrap();
    assert!(matches!(equal(&mut vm, a, b).unwrap(), Value::Bool(false)));
}

#[test]
fn mismatched_operand_types_panic() {
    let mut vm = new_vm();
    let s = vm.intern_copy(b"hi");
    let err = sub(&mut vm, s, Value::I64(1)).unwrap_err();
    assert!(matches!(err, RuntimeError::Panic(_)));
}
