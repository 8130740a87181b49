// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! # Crucible
//!
//! Runtime core for a bytecode-interpreted dynamic language: a stack-based
//! virtual machine, a tagged-value object model, a tri-color mark-and-sweep
//! garbage collector, an open-addressed hash-map engine, string interning,
//! closures with upvalues, single-inheritance classes, a module loader, and
//! cooperative operator overloading.
//!
//! This crate is the CORE of the runtime. It does not contain a lexer, a
//! parser, or a bytecode compiler — those are external collaborators that
//! must satisfy the `Function` contract in [`bytecode`]. It also does not
//! contain a command-line front end, OS wrappers, or the standard library's
//! built-in methods; those live behind the [`platform::Filesystem`] and
//! [`platform::StdlibSource`] traits and the host embedding this crate.
//!
//! See `SPEC_FULL.md` at the repository root for the full requirements this
//! crate implements, and `DESIGN.md` for the grounding ledger.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod alloc_shim;
pub mod bytecode;
pub mod call;
pub mod diagnostics;
pub mod gc;
pub mod heap;
pub mod iterator;
pub mod module;
pub mod ops;
pub mod platform;
pub mod strings;
pub mod table;
pub mod value;
pub mod vm;

pub use value::Value;
pub use vm::{Vm, VmOptions};
