// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! String construction and interning (spec §4.5).
//!
//! Every `Str` object is immutable, null-terminator-free, and carries a
//! precomputed FNV-1a hash. Construction always goes through the intern
//! pool: a `Map` object flagged `is_weak`, so the GC never blackens its
//! entries, letting a string fall out of the pool the moment nothing else
//! references it.

#[cfg(test)]
mod strings_test;

use crate::gc::Gc;
use crate::heap::{MapObj, ObjKind, ObjectRef, StrObj};
use crate::value::Value;

/// FNV-1a, matching the hash the table engine expects callers to supply.
#[must_use]
pub fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Owns the intern pool. Lives on the VM; threaded through every string
/// construction path so nothing ever allocates a `Str` outside this pool.
pub struct Strings {
    pool: ObjectRef,
}

fn strict_str_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Obj(x), Value::Obj(y)) => match (&x.get().kind, &y.get().kind) {
            (ObjKind::Str(sx), ObjKind::Str(sy)) => sx.bytes == sy.bytes,
            _ => false,
        },
        _ => false,
    }
}

impl Strings {
    #[must_use]
    pub fn new(gc: &mut Gc) -> Self {
        let pool = gc.alloc(
            None,
            ObjKind::Map(MapObj {
                table: crate::table::Table::new(),
                is_set: false,
                is_weak: true,
            }),
        );
        Self { pool }
    }

    #[must_use]
    pub fn pool_object(&self) -> ObjectRef {
        self.pool
    }

    fn pool_mut(&self) -> &mut MapObj {
        match &mut self.pool.get_mut().kind {
            ObjKind::Map(m) => m,
            _ => unreachable!("intern pool is always a Map"),
        }
    }

    fn lookup(&self, bytes: &[u8], hash: u64) -> Option<ObjectRef> {
        let m = match &self.pool.get().kind {
            ObjKind::Map(m) => m,
            _ => unreachable!(),
        };
        // The probe key is never compared by identity; `keys_eq` below
        // ignores it and compares the table's stored key's bytes against
        // `bytes` directly, so we don't need an allocated `StrObj` just to
        // perform the lookup.
        let probe_key = Value::Null;
        let found = m.table.get(&probe_key, hash, |entry_key, _| match entry_key {
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Str(s) => s.hash == hash && *s.bytes == *bytes,
                _ => false,
            },
            _ => false,
        });
        found.map(|v| v.as_obj().expect("intern pool values are Str refs"))
    }

    /// Intern a freshly-owned byte buffer without copying it again. Use when
    /// the caller already has a uniquely-owned `Box<[u8]>` (for example, the
    /// result of a `Buf.to_str()` conversion).
    pub fn take(&mut self, gc: &mut Gc, bytes: Box<[u8]>) -> Value {
        let hash = fnv1a(&bytes);
        if let Some(existing) = self.lookup(&bytes, hash) {
            return Value::Obj(existing);
        }
        let obj = gc.alloc(None, ObjKind::Str(StrObj { bytes, hash }));
        let v = Value::Obj(obj);
        self.pool_mut().table.set(v, v, hash, strict_str_eq);
        v
    }

    /// Intern a copy of `bytes`.
    pub fn copy(&mut self, gc: &mut Gc, bytes: &[u8]) -> Value {
        let hash = fnv1a(bytes);
        if let Some(existing) = self.lookup(bytes, hash) {
            return Value::Obj(existing);
        }
        self.take(gc, bytes.to_vec().into_boxed_slice())
    }

    /// Concatenate two strings and intern the result.
    pub fn concat(&mut self, gc: &mut Gc, a: &[u8], b: &[u8]) -> Value {
        let mut buf = Vec::with_capacity(a.len() + b.len());
        buf.extend_from_slice(a);
        buf.extend_from_slice(b);
        self.take(gc, buf.into_boxed_slice())
    }

    /// Drop every pool entry whose `Str` object did not survive the mark
    /// phase just completed (its mark bit is still `false`). Must be called
    /// from within [`crate::gc::Gc::collect_with_weak_sweep`]'s callback,
    /// after marking and before sweep actually frees anything, so the mark
    /// bits still reflect "reachable from roots other than this pool".
    pub fn sweep_unreachable(&mut self) {
        let dead: Vec<Value> = {
            let m = match &self.pool.get().kind {
                ObjKind::Map(m) => m,
                _ => unreachable!(),
            };
            m.table
                .iter_live()
                .filter(|(k, _)| match k {
                    Value::Obj(o) => !o.get().marked.get(),
                    _ => false,
                })
                .map(|(k, _)| k)
                .collect()
        };
        for k in dead {
            let hash = match &k {
                Value::Obj(o) => match &o.get().kind {
                    ObjKind::Str(s) => s.hash,
                    _ => continue,
                },
                _ => continue,
            };
            self.pool_mut().table.remove(&k, hash, strict_str_eq);
        }
    }
}

/// Process backslash escape sequences in a source-literal byte string, per
/// the compiler contract's string-literal grammar (spec §6.1): `\n`, `\r`,
/// `\t`, `\\`, `\"`, `\'`, `\0`, and `\xHH`.
///
/// # Errors
/// Returns `Err` with a human-readable message if an escape sequence is
/// malformed (trailing backslash, unknown escape letter, non-hex digits).
pub fn unescape(input: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] != b'\\' {
            out.push(input[i]);
            i += 1;
            continue;
        }
        let Some(&marker) = input.get(i + 1) else {
            return Err("trailing backslash in string literal".into());
        };
        match marker {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'\\' => out.push(b'\\'),
            b'"' => out.push(b'"'),
            b'\'' => out.push(b'\''),
            b'0' => out.push(0),
            b'x' => {
                let hex = input
                    .get(i + 2..i + 4)
                    .ok_or_else(|| "truncated \\x escape".to_string())?;
                let s = core::str::from_utf8(hex).map_err(|_| "invalid \\x escape".to_string())?;
                let byte = u8::from_str_radix(s, 16).map_err(|_| "invalid \\x escape".to_string())?;
                out.push(byte);
                i += 2;
            }
            b'u' => {
                push_unicode_escape(input, i + 2, 4, &mut out)?;
                i += 4;
            }
            b'U' => {
                push_unicode_escape(input, i + 2, 8, &mut out)?;
                i += 8;
            }
            other => return Err(format!("unknown escape sequence '\\{}'", other as char)),
        }
        i += 2;
    }
    Ok(out)
}

/// Decode `digits` hex characters starting at `start` as a Unicode scalar
/// value and append its UTF-8 encoding to `out` (`\uHHHH` / `\UHHHHHHHH`).
fn push_unicode_escape(input: &[u8], start: usize, digits: usize, out: &mut Vec<u8>) -> Result<(), String> {
    let hex = input
        .get(start..start + digits)
        .ok_or_else(|| "truncated unicode escape".to_string())?;
    let s = core::str::from_utf8(hex).map_err(|_| "invalid unicode escape".to_string())?;
    let code_point = u32::from_str_radix(s, 16).map_err(|_| "invalid unicode escape".to_string())?;
    let ch = char::from_u32(code_point).ok_or_else(|| "invalid unicode escape (not a scalar value)".to_string())?;
    let mut buf = [0u8; 4];
    out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
    Ok(())
}
