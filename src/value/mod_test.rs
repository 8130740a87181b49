// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! Tests for the tagged value type.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;

#[test]
fn falsey_is_exactly_false_and_null() {
    assert!(Value::Bool(false).is_falsey());
    assert!(Value::Null.is_falsey());
    assert!(!Value::Bool(true).is_falsey());
    assert!(!Value::I64(0).is_falsey());
    assert!(!Value::Tombstone.is_falsey());
}

#[test]
fn truthy_is_negation_of_falsey() {
    assert!(Value::I64(0).is_truthy());
    assert!(Value::Char(0).is_truthy());
    assert!(!Value::Null.is_truthy());
}

#[test]
fn scalar_kinda_falsey_covers_zero_but_not_other_values() {
    assert!(Value::Bool(false).is_scalar_kinda_falsey());
    assert!(Value::Null.is_scalar_kinda_falsey());
    assert!(Value::I64(0).is_scalar_kinda_falsey());
    assert!(Value::F64(0.0).is_scalar_kinda_falsey());
    assert!(!Value::F64(0.1).is_scalar_kinda_falsey());
    assert!(!Value::I64(1).is_scalar_kinda_falsey());
    assert!(!Value::Char(0).is_scalar_kinda_falsey());
}

#[test]
fn type_name_matches_scalar_variants() {
    assert_eq!(Value::Bool(true).type_name(), "bool");
    assert_eq!(Value::I64(1).type_name(), "i64");
    assert_eq!(Value::F64(1.0).type_name(), "f64");
    assert_eq!(Value::Char(65).type_name(), "char");
    assert_eq!(Value::Null.type_name(), "null");
    assert_eq!(Value::Tombstone.type_name(), "tombstone");
}

#[test]
fn strict_eq_distinguishes_int_and_float_bit_patterns() {
    assert!(Value::I64(1).strict_eq(&Value::I64(1)));
    assert!(!Value::I64(1).strict_eq(&Value::F64(1.0)));
    assert!(Value::F64(f64::NAN).strict_eq(&Value::F64(f64::NAN)));
    assert!(!Value::F64(0.0).strict_eq(&Value::F64(-0.0)));
}

#[test]
fn strict_eq_null_and_tombstone_are_each_their_own_singleton() {
    assert!(Value::Null.strict_eq(&Value::Null));
    assert!(Value::Tombstone.strict_eq(&Value::Tombstone));
    assert!(!Value::Null.strict_eq(&Value::Tombstone));
}

#[test]
fn default_value_is_null() {
    assert!(Value::default().is_null());
}

#[test]
fn as_obj_only_returns_something_for_obj_variant() {
    assert!(Value::I64(1).as_obj().is_none());
    assert!(Value::Null.as_obj().is_none());
}

#[test]
fn is_numeric_covers_int_float_and_char_only() {
    assert!(Value::I64(1).is_numeric());
    assert!(Value::F64(1.0).is_numeric());
    assert!(Value::Char(1).is_numeric());
    assert!(!Value::Bool(true).is_numeric());
    assert!(!Value::Null.is_numeric());
}
