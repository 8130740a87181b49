// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! Operator dispatch (spec §4.7).
//!
//! Every binary/unary operator first tries its built-in numeric or string
//! rule, then falls back to looking up a `$op_binary_*`/`$op_unary_*` method
//! on the left operand's class. A method miss on both paths is a panic.

#[cfg(test)]
mod ops_test;

use crate::value::Value;
use crate::vm::{RuntimeError, Vm};

/// Names of the fallback methods, matching the operator they back.
pub const OP_BINARY_PLUS: &str = "$op_binary_plus";
pub const OP_BINARY_MINUS: &str = "$op_binary_minus";
pub const OP_BINARY_STAR: &str = "$op_binary_star";
pub const OP_BINARY_SLASH: &str = "$op_binary_slash";
pub const OP_BINARY_SLASH_SLASH: &str = "$op_binary_slash_slash";
pub const OP_BINARY_PERCENT: &str = "$op_binary_percent";
pub const OP_BINARY_LESS: &str = "$op_binary_less";
pub const OP_BINARY_LESS_EQUAL: &str = "$op_binary_less_equal";
pub const OP_BINARY_GREATER: &str = "$op_binary_greater";
pub const OP_BINARY_GREATER_EQUAL: &str = "$op_binary_greater_equal";
pub const OP_BINARY_EQUAL_EQUAL: &str = "$op_binary_equal_equal";
pub const OP_UNARY_MINUS: &str = "$op_unary_minus";
pub const OP_UNARY_PLUS: &str = "$op_unary_plus";

fn type_error(vm: &mut Vm, op: &str, a: Value, b: Value) -> RuntimeError {
    vm.panic(format!(
        "invalid operand types for '{op}': '{}' and '{}'",
        a.type_name(),
        b.type_name()
    ))
}

/// Dispatch an arithmetic/comparison binary operator named `method` with
/// built-in `numeric` and `strings` rule closures tried first.
fn dispatch_binary(
    vm: &mut Vm,
    symbol: &str,
    method: &str,
    a: Value,
    b: Value,
    numeric: impl FnOnce(&mut Vm, Value, Value) -> Option<Result<Value, RuntimeError>>,
) -> Result<Value, RuntimeError> {
    if let Some(result) = numeric(vm, a, b) {
        return result;
    }
    if let Some(callable) = vm.lookup_instance_method(a, method) {
        return vm.call_value(callable, &[a, b]);
    }
    Err(type_error(vm, symbol, a, b))
}

/// `a + b`: numeric addition, codepoint/string concatenation, then
/// `$op_binary_plus` fallback.
pub fn add(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    if let Some(r) = numeric_plus(a, b) {
        return Ok(r);
    }
    if let (Value::Char(x), Value::Char(y)) = (a, b) {
        return Ok(vm.concat_codepoints(x, y));
    }
    if let Value::Char(x) = a {
        if let Some(bytes) = vm.as_str_bytes(b) {
            return Ok(vm.prepend_codepoint(x, &bytes));
        }
    }
    if let Some(abytes) = vm.as_str_bytes(a) {
        if let Some(bbytes) = vm.as_str_bytes(b) {
            return Ok(vm.concat_strings(&abytes, &bbytes));
        }
        if let Value::Char(y) = b {
            return Ok(vm.append_codepoint(&abytes, y));
        }
    }
    if let Some(callable) = vm.lookup_instance_method(a, OP_BINARY_PLUS) {
        return vm.call_value(callable, &[a, b]);
    }
    Err(type_error(vm, "+", a, b))
}

fn numeric_plus(a: Value, b: Value) -> Option<Value> {
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => Some(Value::I64(x.wrapping_add(y))),
        (Value::I64(x), Value::F64(y)) => Some(Value::F64(x as f64 + y)),
        (Value::F64(x), Value::I64(y)) => Some(Value::F64(x + y as f64)),
        (Value::F64(x), Value::F64(y)) => Some(Value::F64(x + y)),
        _ => None,
    }
}

pub fn sub(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    dispatch_binary(vm, "-", OP_BINARY_MINUS, a, b, |_, a, b| match (a, b) {
        (Value::I64(x), Value::I64(y)) => Some(Ok(Value::I64(x.wrapping_sub(y)))),
        (Value::I64(x), Value::F64(y)) => Some(Ok(Value::F64(x as f64 - y))),
        (Value::F64(x), Value::I64(y)) => Some(Ok(Value::F64(x - y as f64))),
        (Value::F64(x), Value::F64(y)) => Some(Ok(Value::F64(x - y))),
        _ => None,
    })
}

/// `a * b`: numeric multiplication, `str * i64` repetition, then fallback.
pub fn mul(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => return Ok(Value::I64(x.wrapping_mul(y))),
        (Value::I64(x), Value::F64(y)) => return Ok(Value::F64(x as f64 * y)),
        (Value::F64(x), Value::I64(y)) => return Ok(Value::F64(x * y as f64)),
        (Value::F64(x), Value::F64(y)) => return Ok(Value::F64(x * y)),
        _ => {}
    }
    if let Some(bytes) = vm.as_str_bytes(a) {
        if let Value::I64(n) = b {
            if n >= 0 {
                return Ok(vm.repeat_string(&bytes, n as usize));
            }
        }
        return Err(type_error(vm, "*", a, b));
    }
    if let Some(callable) = vm.lookup_instance_method(a, OP_BINARY_STAR) {
        return vm.call_value(callable, &[a, b]);
    }
    Err(type_error(vm, "*", a, b))
}

/// `a / b`: always produces an `f64` for numeric operands (true division).
pub fn div(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    dispatch_binary(vm, "/", OP_BINARY_SLASH, a, b, |vm, a, b| match (a, b) {
        (Value::I64(x), Value::I64(y)) => {
            if y == 0 {
                Some(Err(vm.panic("division by zero")))
            } else {
                Some(Ok(Value::F64(x as f64 / y as f64)))
            }
        }
        (Value::I64(x), Value::F64(y)) => Some(Ok(Value::F64(x as f64 / y))),
        (Value::F64(x), Value::I64(y)) => Some(Ok(Value::F64(x / y as f64))),
        (Value::F64(x), Value::F64(y)) => Some(Ok(Value::F64(x / y))),
        _ => None,
    })
}

/// `a // b`: floor division, integer-preserving for two `i64` operands.
pub fn floor_div(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    dispatch_binary(vm, "//", OP_BINARY_SLASH_SLASH, a, b, |vm, a, b| match (a, b) {
        (Value::I64(x), Value::I64(y)) => {
            if y == 0 {
                Some(Err(vm.panic("division by zero")))
            } else {
                Some(Ok(Value::I64(x.div_euclid(y))))
            }
        }
        (Value::I64(x), Value::F64(y)) => Some(Ok(Value::F64((x as f64 / y).floor()))),
        (Value::F64(x), Value::I64(y)) => Some(Ok(Value::F64((x / y as f64).floor()))),
        (Value::F64(x), Value::F64(y)) => Some(Ok(Value::F64((x / y).floor()))),
        _ => None,
    })
}

/// `a % b`: remainder, integer-preserving for two `i64` operands.
pub fn rem(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    dispatch_binary(vm, "%", OP_BINARY_PERCENT, a, b, |vm, a, b| match (a, b) {
        (Value::I64(x), Value::I64(y)) => {
            if y == 0 {
                Some(Err(vm.panic("division by zero")))
            } else {
                Some(Ok(Value::I64(x.rem_euclid(y))))
            }
        }
        (Value::I64(x), Value::F64(y)) => Some(Ok(Value::F64((x as f64).rem_euclid(y)))),
        (Value::F64(x), Value::I64(y)) => Some(Ok(Value::F64(x.rem_euclid(y as f64)))),
        (Value::F64(x), Value::F64(y)) => Some(Ok(Value::F64(x.rem_euclid(y)))),
        _ => None,
    })
}

/// Float just past the largest magnitude an `i64` can represent exactly
/// (`2^63`).
const I64_RANGE_HIGH: f64 = 9_223_372_036_854_775_808.0;
const I64_RANGE_LOW: f64 = i64::MIN as f64;

/// Compare an `i64` against an `f64` without ever casting the `i64` to
/// `f64` (which silently loses precision past 2^53, per spec §4.7/§8):
/// resolve values outside `i64`'s range by sign, otherwise split the float
/// into its truncated integer part and fractional remainder, compare the
/// integer parts exactly, and use the remainder's sign to break a tie.
/// Returns `None` for `NaN`, matching the spec's "NaN comparisons return
/// false" rule (the caller treats `None` as "not ordered").
fn cmp_i64_f64(i: i64, f: f64) -> Option<core::cmp::Ordering> {
    use core::cmp::Ordering;
    if f.is_nan() {
        return None;
    }
    if f < I64_RANGE_LOW {
        return Some(Ordering::Greater);
    }
    if f >= I64_RANGE_HIGH {
        return Some(Ordering::Less);
    }
    let trunc = f.trunc();
    let frac = f - trunc;
    let trunc_i = trunc as i64;
    Some(match i.cmp(&trunc_i) {
        Ordering::Equal if frac > 0.0 => Ordering::Less,
        Ordering::Equal if frac < 0.0 => Ordering::Greater,
        other => other,
    })
}

/// Numeric comparison that preserves integer precision: when both operands
/// are `i64`, compares as integers; when one side is `f64`, uses
/// [`cmp_i64_f64`] rather than lossily converting through `f64` (relevant
/// past 2^53, per spec §8).
fn numeric_cmp(a: Value, b: Value) -> Option<core::cmp::Ordering> {
    match (a, b) {
        (Value::I64(x), Value::I64(y)) => Some(x.cmp(&y)),
        (Value::I64(x), Value::F64(y)) => cmp_i64_f64(x, y),
        (Value::F64(x), Value::I64(y)) => cmp_i64_f64(y, x).map(core::cmp::Ordering::reverse),
        (Value::F64(x), Value::F64(y)) => x.partial_cmp(&y),
        (Value::Char(x), Value::Char(y)) => Some(x.cmp(&y)),
        _ => None,
    }
}

fn str_cmp(vm: &mut Vm, a: Value, b: Value) -> Option<core::cmp::Ordering> {
    let abytes = vm.as_str_bytes(a)?;
    let bbytes = vm.as_str_bytes(b)?;
    Some(abytes.cmp(&bbytes))
}

pub fn less(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    compare(vm, "<", OP_BINARY_LESS, a, b, core::cmp::Ordering::is_lt)
}
pub fn less_equal(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    compare(vm, "<=", OP_BINARY_LESS_EQUAL, a, b, core::cmp::Ordering::is_le)
}
pub fn greater(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    compare(vm, ">", OP_BINARY_GREATER, a, b, core::cmp::Ordering::is_gt)
}
pub fn greater_equal(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    compare(vm, ">=", OP_BINARY_GREATER_EQUAL, a, b, core::cmp::Ordering::is_ge)
}

fn compare(
    vm: &mut Vm,
    symbol: &str,
    method: &str,
    a: Value,
    b: Value,
    accept: impl Fn(core::cmp::Ordering) -> bool,
) -> Result<Value, RuntimeError> {
    if let Some(ord) = numeric_cmp(a, b) {
        return Ok(Value::Bool(accept(ord)));
    }
    if let Some(ord) = str_cmp(vm, a, b) {
        return Ok(Value::Bool(accept(ord)));
    }
    if let Some(callable) = vm.lookup_instance_method(a, method) {
        return vm.call_value(callable, &[a, b]);
    }
    Err(type_error(vm, symbol, a, b))
}

/// Semantic equality (`==`): numeric coercion across `i64`/`f64`/`char`,
/// byte-equality for strings, `$op_binary_equal_equal` for instances,
/// reference equality for every other heap kind.
pub fn equal(vm: &mut Vm, a: Value, b: Value) -> Result<Value, RuntimeError> {
    if a.is_numeric() && b.is_numeric() {
        // `numeric_cmp` returns `None` for a NaN operand; that must mean
        // "not equal", not "fall through to reference equality".
        return Ok(Value::Bool(numeric_cmp(a, b).is_some_and(core::cmp::Ordering::is_eq)));
    }
    if let Some(abytes) = vm.as_str_bytes(a) {
        if let Some(bbytes) = vm.as_str_bytes(b) {
            return Ok(Value::Bool(abytes == bbytes));
        }
        return Ok(Value::Bool(false));
    }
    if let (Some(avals), Some(bvals)) = (vm.as_tuple_values(a), vm.as_tuple_values(b)) {
        if avals.len() != bvals.len() {
            return Ok(Value::Bool(false));
        }
        for (x, y) in avals.iter().zip(bvals.iter()) {
            if !equal(vm, *x, *y)?.is_truthy() {
                return Ok(Value::Bool(false));
            }
        }
        return Ok(Value::Bool(true));
    }
    if vm.is_instance(a) {
        if let Some(callable) = vm.lookup_instance_method(a, OP_BINARY_EQUAL_EQUAL) {
            return vm.call_value(callable, &[a, b]);
        }
    }
    Ok(Value::Bool(a.strict_eq(&b)))
}

/// Unary negation: numeric negation, then `$op_unary_minus` fallback.
pub fn neg(vm: &mut Vm, a: Value) -> Result<Value, RuntimeError> {
    match a {
        Value::I64(x) => Ok(Value::I64(x.wrapping_neg())),
        Value::F64(x) => Ok(Value::F64(-x)),
        _ => {
            if let Some(callable) = vm.lookup_instance_method(a, OP_UNARY_MINUS) {
                vm.call_value(callable, &[a])
            } else {
                Err(vm.panic(format!("invalid operand type for unary '-': '{}'", a.type_name())))
            }
        }
    }
}

/// `key in container`: dispatches on the container's kind (map/set
/// membership, substring search, `$contains` fallback for instances).
pub fn contains(vm: &mut Vm, container: Value, key: Value) -> Result<Value, RuntimeError> {
    vm.contains(container, key)
}
