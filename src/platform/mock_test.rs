// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

use super::*;

#[test]
fn add_file_then_read_it_back() {
    let mut fs = MockFilesystem::new();
    fs.add_file("a/b.crucible", b"fn main() {}".to_vec());
    assert!(fs.is_file("a/b.crucible"));
    assert_eq!(fs.read_file("a/b.crucible").unwrap(), b"fn main() {}");
}

#[test]
fn missing_file_is_not_a_file() {
    let fs = MockFilesystem::new();
    assert!(!fs.is_file("nope.crucible"));
    assert!(fs.read_file("nope.crucible").is_err());
}

#[test]
fn directory_is_implied_by_a_nested_file() {
    let mut fs = MockFilesystem::new();
    fs.add_file("pkg/mod.crucible", b"".to_vec());
    assert!(fs.is_dir("pkg"));
    assert!(!fs.is_dir("pkg/mod.crucible"));
}

#[test]
fn join_handles_empty_base() {
    let fs = MockFilesystem::new();
    assert_eq!(fs.join("", "a.crucible"), "a.crucible");
    assert_eq!(fs.join("root", "a.crucible"), "root/a.crucible");
}

#[test]
fn empty_stdlib_source_never_resolves() {
    let src = EmptyStdlibSource;
    assert!(src.source_for("std.math").is_none());
}
