// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::bytecode::{FunctionBuilder, OpCode};
use crate::platform::MockFilesystem;
use crate::vm::VmOptions;

#[derive(Default)]
struct ConstCompiler;

impl crate::vm::Compiler for ConstCompiler {
    fn compile(
        &self,
        source: &[u8],
        _path: &str,
        interner: &mut dyn crate::vm::StringInterner,
    ) -> Result<crate::bytecode::Function, String> {
        // The mock compiler ignores the actual module source text as
        // source code and instead parses it as a tiny control language,
        // standing in for what a real front end would emit:
        //   "panic"           -> a body that divides by zero
        //   "import:<path>"   -> a body that imports <path> and discards it
        //   "import:<path>:get:<name>" -> imports <path>, then reads member
        //                                 <name> off it (panics if absent)
        //   anything else     -> an empty (no-op) body
        let text = String::from_utf8_lossy(source);
        let mut b = FunctionBuilder::new(1);
        if let Some(rest) = text.strip_prefix("import:") {
            let (path, member) = match rest.split_once(":get:") {
                Some((p, m)) => (p, Some(m)),
                None => (rest, None),
            };
            let path_const = b.add_constant(interner.intern(path.as_bytes()));
            b.emit_op(OpCode::ImportModule);
            b.emit_u16(path_const);
            if let Some(name) = member {
                let name_const = b.add_constant(interner.intern(name.as_bytes()));
                b.emit_op(OpCode::GetMember);
                b.emit_u16(name_const);
            }
            b.emit_op(OpCode::Pop);
            b.emit_op(OpCode::LoadNull);
            b.emit_op(OpCode::Return);
        } else if source.windows(5).any(|w| w == b"panic") {
            b.emit_op(OpCode::LoadI);
            b.emit_u8(1);
            b.emit_op(OpCode::LoadI);
            b.emit_u8(0);
            b.emit_op(OpCode::BinarySlashSlash);
            b.emit_op(OpCode::Return);
        } else {
            b.emit_op(OpCode::LoadNull);
            b.emit_op(OpCode::Return);
        }
        Ok(b.finish())
    }
}

fn new_vm(fs: MockFilesystem) -> crate::vm::Vm {
    crate::vm::Vm::new(
        VmOptions::new()
            .with_filesystem(fs)
            .with_compiler(ConstCompiler)
            .with_search_path(""),
    )
}

#[test]
fn split_path_drops_empty_segments() {
    assert_eq!(split_path("a.b.c"), vec!["a", "b", "c"]);
    assert_eq!(split_path(""), Vec::<&str>::new());
    assert_eq!(split_path("a..b"), vec!["a", "b"]);
}

#[test]
fn import_caches_each_segment_once() {
    let mut fs = MockFilesystem::new();
    fs.add_file("a.crucible", b"".to_vec());
    fs.add_file("a/b.crucible", b"".to_vec());
    let mut vm = new_vm(fs);

    let first = import(&mut vm, "a.b").unwrap();
    let second = import(&mut vm, "a.b").unwrap();
    assert_eq!(first, second);

    let a_again = import(&mut vm, "a").unwrap();
    assert_ne!(a_again, first);
}

#[test]
fn failed_body_is_unregistered_from_its_parent() {
    let mut fs = MockFilesystem::new();
    fs.add_file("a.crucible", b"".to_vec());
    fs.add_file("a/bad.crucible", b"panic here".to_vec());
    let mut vm = new_vm(fs);

    assert!(import(&mut vm, "a.bad").is_err());
    assert!(lookup_submodule(None, vm.root_modules(), "a").is_some());
    let a = root_submodule(vm.root_modules(), "a").unwrap();
    assert!(submodule_of(
        match &a.get().kind {
            crate::heap::ObjKind::Module(m) => m,
            _ => unreachable!(),
        },
        "bad"
    )
    .is_none());
}

#[test]
fn import_cycle_terminates_with_a_missing_member_panic() {
    // cyca imports cycb; cycb imports cyca back and reads a member cyca
    // never defines. Since `import` installs a module at its path before
    // running its body (spec §4.11 step 2), cycb's re-import of cyca finds
    // the already-registered (still empty) module instead of recursing, and
    // the subsequent member read panics instead of looping forever.
    let mut fs = MockFilesystem::new();
    fs.add_file("cyca.crucible", b"import:cycb".to_vec());
    fs.add_file("cycb.crucible", b"import:cyca:get:missing".to_vec());
    let mut vm = new_vm(fs);

    let err = import(&mut vm, "cyca").unwrap_err();
    let crate::vm::RuntimeError::Panic(msg) = err else {
        panic!("expected a panic, got {err:?}");
    };
    assert!(msg.contains("missing"), "panic message should mention the missing member: {msg}");
}

#[test]
fn missing_source_panics() {
    let fs = MockFilesystem::new();
    let mut vm = new_vm(fs);
    assert!(import(&mut vm, "nowhere").is_err());
}

#[test]
fn empty_path_panics() {
    let fs = MockFilesystem::new();
    let mut vm = new_vm(fs);
    assert!(import(&mut vm, "").is_err());
}
