// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! The iterator protocol (spec §4.8).
//!
//! Every iterable is accessed by first obtaining an `Iter` object (either
//! itself, or the result of calling its `$iter` method). An `Iter` exposes
//! `next`, returning either the next value or the sentinel `ERROR` value.

#[cfg(test)]
mod iterator_test;

use crate::heap::{IterObj, ObjectRef};
use crate::value::Value;
use crate::vm::{RuntimeError, Vm};

/// Concrete iterator kinds, carrying exactly the state each needs.
pub enum IterKind {
    /// Always exhausted.
    Empty,
    Vec(ObjectRef, usize),
    Tup(ObjectRef, usize),
    /// Byte-index walk yielding one-byte strings (the default `str` iterator).
    Str(ObjectRef, usize),
    StrBytes(ObjectRef, usize),
    /// UTF-8 decoding, yielding `Char` values.
    StrChars(ObjectRef, usize),
    /// Splits on `\n` and `\r\n`.
    StrLines(ObjectRef, usize),
    MapKeys(ObjectRef, usize),
    MapValues(ObjectRef, usize),
    MapEntries(ObjectRef, usize),
    /// Linked-list walk over queue nodes; `None` once exhausted.
    Queue(Option<ObjectRef>),
    /// Ascending if `step > 0`, descending if `step < 0`, half-open upper bound.
    Range { next: i64, stop: i64, step: i64 },
    Map(ObjectRef, Value),
    Filter(ObjectRef, Value),
    Enumerate(ObjectRef, i64),
    /// Yields `Str` lines until EOF, then empties the source pointer.
    FileLines(Option<ObjectRef>),
    /// Delegates to the user object's `$next` method.
    Generic(Value),
}

impl IterKind {
    pub(crate) fn blacken(&self, grey: &mut Vec<ObjectRef>, values: &mut Vec<Value>) {
        match self {
            Self::Empty | Self::Range { .. } => {}
            Self::Vec(o, _)
            | Self::Tup(o, _)
            | Self::Str(o, _)
            | Self::StrBytes(o, _)
            | Self::StrChars(o, _)
            | Self::StrLines(o, _)
            | Self::MapKeys(o, _)
            | Self::MapValues(o, _)
            | Self::MapEntries(o, _) => grey.push(*o),
            Self::Queue(n) | Self::FileLines(n) => {
                if let Some(o) = n {
                    grey.push(*o);
                }
            }
            Self::Map(o, cb) | Self::Filter(o, cb) => {
                grey.push(*o);
                values.push(*cb);
            }
            Self::Enumerate(o, _) => grey.push(*o),
            Self::Generic(v) => values.push(*v),
        }
    }
}

/// The canned sentinel returned by an exhausted iterator, by `get` on a map
/// for a missing key, and anywhere "not found" needs signalling without a
/// panic. Resolved lazily through the VM's builtin `Err` class so a single
/// object identity can be shared.
pub fn error_sentinel(vm: &mut Vm) -> Value {
    vm.error_sentinel()
}

/// Advance an `Iter` object, dispatching on its concrete kind.
///
/// # Errors
/// Propagates any `RuntimeError` raised by a nested user `$next`/`$iter`
/// call (map/filter/generic sources).
pub fn next(vm: &mut Vm, iter_ref: ObjectRef) -> Result<Value, RuntimeError> {
    // Take a shallow copy of the state we need to advance, then write back,
    // so we never hold a borrow of `iter_ref` across a call back into the VM
    // (map/filter/generic iterators call user code).
    let snapshot = clone_state(iter_ref);
    let (result, new_state) = step(vm, snapshot)?;
    write_back(iter_ref, new_state);
    Ok(result)
}

// The helpers below exist purely to avoid holding a live borrow of the
// `ObjKind::Iter` payload across a re-entrant VM call (needed by the `Map`,
// `Filter`, and `Generic` kinds). They clone the small amount of scalar
// state, compute the next value, and write the updated state back.
fn clone_state(iter_ref: ObjectRef) -> IterKind {
    match &iter_ref.get().kind {
        crate::heap::ObjKind::Iter(IterObj { kind }) => match kind {
            IterKind::Empty => IterKind::Empty,
            IterKind::Vec(o, i) => IterKind::Vec(*o, *i),
            IterKind::Tup(o, i) => IterKind::Tup(*o, *i),
            IterKind::Str(o, i) => IterKind::Str(*o, *i),
            IterKind::StrBytes(o, i) => IterKind::StrBytes(*o, *i),
            IterKind::StrChars(o, i) => IterKind::StrChars(*o, *i),
            IterKind::StrLines(o, i) => IterKind::StrLines(*o, *i),
            IterKind::MapKeys(o, i) => IterKind::MapKeys(*o, *i),
            IterKind::MapValues(o, i) => IterKind::MapValues(*o, *i),
            IterKind::MapEntries(o, i) => IterKind::MapEntries(*o, *i),
            IterKind::Queue(n) => IterKind::Queue(*n),
            IterKind::Range { next, stop, step } => IterKind::Range {
                next: *next,
                stop: *stop,
                step: *step,
            },
            IterKind::Map(o, cb) => IterKind::Map(*o, *cb),
            IterKind::Filter(o, cb) => IterKind::Filter(*o, *cb),
            IterKind::Enumerate(o, n) => IterKind::Enumerate(*o, *n),
            IterKind::FileLines(f) => IterKind::FileLines(*f),
            IterKind::Generic(v) => IterKind::Generic(*v),
        },
        _ => IterKind::Empty,
    }
}

fn write_back(iter_ref: ObjectRef, state: IterKind) {
    if let crate::heap::ObjKind::Iter(obj) = &mut iter_ref.get_mut().kind {
        obj.kind = state;
    }
}

fn step(vm: &mut Vm, state: IterKind) -> Result<(Value, IterKind), RuntimeError> {
    match state {
        IterKind::Empty => Ok((error_sentinel(vm), IterKind::Empty)),
        IterKind::Range { next, stop, step } => {
            let done = if step >= 0 { next >= stop } else { next <= stop };
            if done {
                Ok((error_sentinel(vm), IterKind::Range { next, stop, step }))
            } else {
                Ok((
                    Value::I64(next),
                    IterKind::Range {
                        next: next + step,
                        stop,
                        step,
                    },
                ))
            }
        }
        IterKind::Vec(o, i) => {
            let vals = vm.read_vec_values(o);
            if i < vals.len() {
                Ok((vals[i], IterKind::Vec(o, i + 1)))
            } else {
                Ok((error_sentinel(vm), IterKind::Vec(o, i)))
            }
        }
        IterKind::Tup(o, i) => {
            let vals = vm.read_tup_values(o);
            if i < vals.len() {
                Ok((vals[i], IterKind::Tup(o, i + 1)))
            } else {
                Ok((error_sentinel(vm), IterKind::Tup(o, i)))
            }
        }
        IterKind::Str(o, i) => {
            let bytes = vm.read_str_bytes(o);
            if i < bytes.len() {
                let s = vm.intern_copy(&bytes[i..=i]);
                Ok((s, IterKind::Str(o, i + 1)))
            } else {
                Ok((error_sentinel(vm), IterKind::Str(o, i)))
            }
        }
        IterKind::StrBytes(o, i) => {
            let bytes = vm.read_str_bytes(o);
            if i < bytes.len() {
                Ok((Value::I64(i64::from(bytes[i])), IterKind::StrBytes(o, i + 1)))
            } else {
                Ok((error_sentinel(vm), IterKind::StrBytes(o, i)))
            }
        }
        IterKind::StrChars(o, i) => {
            let bytes = vm.read_str_bytes(o);
            if i >= bytes.len() {
                return Ok((error_sentinel(vm), IterKind::StrChars(o, i)));
            }
            let s = core::str::from_utf8(&bytes[i..]).unwrap_or("");
            if let Some(c) = s.chars().next() {
                Ok((
                    Value::Char(c as u32),
                    IterKind::StrChars(o, i + c.len_utf8()),
                ))
            } else {
                Ok((error_sentinel(vm), IterKind::StrChars(o, bytes.len())))
            }
        }
        IterKind::StrLines(o, i) => {
            let bytes = vm.read_str_bytes(o);
            if i >= bytes.len() {
                return Ok((error_sentinel(vm), IterKind::StrLines(o, i)));
            }
            let mut end = i;
            while end < bytes.len() && bytes[end] != b'\n' {
                end += 1;
            }
            let mut line_end = end;
            if line_end > i && bytes[line_end - 1] == b'\r' {
                line_end -= 1;
            }
            let s = vm.intern_copy(&bytes[i..line_end]);
            let next_i = if end < bytes.len() { end + 1 } else { end };
            Ok((s, IterKind::StrLines(o, next_i)))
        }
        IterKind::MapKeys(o, i) => map_step(vm, o, i, MapPart::Key).map(|(v, n)| (v, IterKind::MapKeys(o, n))),
        IterKind::MapValues(o, i) => {
            map_step(vm, o, i, MapPart::Value).map(|(v, n)| (v, IterKind::MapValues(o, n)))
        }
        IterKind::MapEntries(o, i) => {
            map_step(vm, o, i, MapPart::Entry).map(|(v, n)| (v, IterKind::MapEntries(o, n)))
        }
        IterKind::Queue(node) => {
            let Some(n) = node else {
                return Ok((error_sentinel(vm), IterKind::Queue(None)));
            };
            let (value, next) = vm.read_queue_node(n);
            Ok((value, IterKind::Queue(next)))
        }
        IterKind::FileLines(file) => {
            let Some(f) = file else {
                return Ok((error_sentinel(vm), IterKind::FileLines(None)));
            };
            match vm.read_file_line(f)? {
                Some(line) => Ok((line, IterKind::FileLines(Some(f)))),
                None => Ok((error_sentinel(vm), IterKind::FileLines(None))),
            }
        }
        IterKind::Map(src, callback) => {
            let v = next(vm, src)?;
            if is_error_sentinel(vm, v) {
                Ok((v, IterKind::Map(src, callback)))
            } else {
                let mapped = vm.call_value(callback, &[v])?;
                Ok((mapped, IterKind::Map(src, callback)))
            }
        }
        IterKind::Filter(src, predicate) => {
            loop {
                let v = next(vm, src)?;
                if is_error_sentinel(vm, v) {
                    return Ok((v, IterKind::Filter(src, predicate)));
                }
                let keep = vm.call_value(predicate, &[v])?;
                if keep.is_truthy() {
                    return Ok((v, IterKind::Filter(src, predicate)));
                }
            }
        }
        IterKind::Enumerate(src, n) => {
            let v = next(vm, src)?;
            if is_error_sentinel(vm, v) {
                Ok((v, IterKind::Enumerate(src, n)))
            } else {
                let tup = vm.alloc_tuple(&[Value::I64(n), v])?;
                Ok((tup, IterKind::Enumerate(src, n + 1)))
            }
        }
        IterKind::Generic(obj) => {
            let v = vm.call_method(obj, "$next", &[])?;
            Ok((v, IterKind::Generic(obj)))
        }
    }
}

#[derive(Clone, Copy)]
enum MapPart {
    Key,
    Value,
    Entry,
}

fn map_step(
    vm: &mut Vm,
    map_ref: ObjectRef,
    mut slot: usize,
    part: MapPart,
) -> Result<(Value, usize), RuntimeError> {
    loop {
        if slot >= vm.map_entry_array_len(map_ref) {
            return Ok((error_sentinel(vm), slot));
        }
        if vm.map_slot_is_tombstone(map_ref, slot) {
            slot += 1;
            continue;
        }
        let Some((k, v)) = vm.map_entry_at(map_ref, slot) else {
            return Ok((error_sentinel(vm), slot));
        };
        slot += 1;
        let out = match part {
            MapPart::Key => k,
            MapPart::Value => v,
            MapPart::Entry => vm.alloc_tuple(&[k, v])?,
        };
        return Ok((out, slot));
    }
}

fn is_error_sentinel(vm: &mut Vm, v: Value) -> bool {
    vm.is_error_sentinel(v)
}

/// Join every remaining value from `iter_ref` into a string, separated by
/// `sep` (spec: `Iter.join(sep)`).
///
/// # Errors
/// Propagates errors from `next` or from stringifying an element.
pub fn join(vm: &mut Vm, iter_ref: ObjectRef, sep: &str) -> Result<Value, RuntimeError> {
    let mut out = String::new();
    let mut first = true;
    loop {
        let v = next(vm, iter_ref)?;
        if vm.is_error_sentinel(v) {
            break;
        }
        if !first {
            out.push_str(sep);
        }
        first = false;
        out.push_str(&vm.stringify(v)?);
    }
    Ok(vm.intern_copy(out.as_bytes()))
}
