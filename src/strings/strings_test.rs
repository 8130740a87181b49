// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! Tests for string interning and escape-sequence decoding.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::gc::Gc;

#[test]
fn fnv1a_is_deterministic_and_sensitive_to_every_byte() {
    assert_eq!(fnv1a(b"hello"), fnv1a(b"hello"));
    assert_ne!(fnv1a(b"hello"), fnv1a(b"hellp"));
    assert_ne!(fnv1a(b""), fnv1a(b"\0"));
}

#[test]
fn copy_interns_equal_bytes_to_the_same_object() {
    let mut gc = Gc::new(None);
    let mut strings = Strings::new(&mut gc);
    let a = strings.copy(&mut gc, b"hello");
    let b = strings.copy(&mut gc, b"hello");
    assert!(a.strict_eq(&b));
}

#[test]
fn copy_of_different_bytes_is_a_different_object() {
    let mut gc = Gc::new(None);
    let mut strings = Strings::new(&mut gc);
    let a = strings.copy(&mut gc, b"hello");
    let b = strings.copy(&mut gc, b"world");
    assert!(!a.strict_eq(&b));
}

#[test]
fn take_of_owned_bytes_dedups_against_existing_pool_entry() {
    let mut gc = Gc::new(None);
    let mut strings = Strings::new(&mut gc);
    let a = strings.copy(&mut gc, b"shared");
    let b = strings.take(&mut gc, b"shared".to_vec().into_boxed_slice());
    assert!(a.strict_eq(&b));
}

#[test]
fn concat_interns_the_combined_bytes() {
    let mut gc = Gc::new(None);
    let mut strings = Strings::new(&mut gc);
    let joined = strings.concat(&mut gc, b"foo", b"bar");
    let expected = strings.copy(&mut gc, b"foobar");
    assert!(joined.strict_eq(&expected));
}

#[test]
fn unescape_handles_every_simple_escape() {
    assert_eq!(unescape(b"\\n\\r\\t\\\\\\\"\\'\\0").unwrap(), b"\n\r\t\\\"\'\0");
}

#[test]
fn unescape_handles_hex_byte_escape() {
    assert_eq!(unescape(b"\\x41\\x42").unwrap(), b"AB");
}

#[test]
fn unescape_handles_short_and_long_unicode_escapes() {
    assert_eq!(unescape(b"A").unwrap(), b"A");
    assert_eq!(unescape(b"\\U0001F600").unwrap(), "\u{1F600}".as_bytes());
}

#[test]
fn unescape_passes_through_plain_bytes() {
    assert_eq!(unescape(b"plain text").unwrap(), b"plain text");
}

#[test]
fn unescape_rejects_trailing_backslash() {
    assert!(unescape(b"abc\\").is_err());
}

#[test]
fn unescape_rejects_unknown_escape_letter() {
    assert!(unescape(br"\q").is_err());
}

#[test]
fn unescape_rejects_truncated_hex_escape() {
    assert!(unescape(br"\x4").is_err());
    assert!(unescape(br"\u123").is_err());
}

#[test]
fn unescape_rejects_surrogate_code_point() {
    assert!(unescape(br"\uD800").is_err());
}
