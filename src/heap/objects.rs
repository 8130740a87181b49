// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! Payload structs for every heap object kind (spec §3.2).

use super::ObjectRef;
use crate::table::Table;
use crate::value::Value;
use crate::vm::{RuntimeError, Vm};
use core::cell::Cell;

/// An immutable, interned byte string with a precomputed hash.
pub struct StrObj {
    pub bytes: Box<[u8]>,
    pub hash: u64,
}

impl StrObj {
    #[must_use]
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes).unwrap_or("")
    }
}

/// A growable, mutable byte builder.
#[derive(Default)]
pub struct BufObj {
    pub data: Vec<u8>,
}

/// A fixed-size, immutable array of values.
pub struct TupObj {
    pub values: Box<[Value]>,
}

/// A growable array of values; also used as a Stack.
#[derive(Default)]
pub struct VecObj {
    pub values: Vec<Value>,
}

/// An open-addressed hash map; also used as a Set and as the WeakRef intern
/// pool (`is_weak`, not scanned by the GC).
#[derive(Default)]
pub struct MapObj {
    pub table: Table,
    pub is_set: bool,
    pub is_weak: bool,
}

/// A native function pointer: `(vm, args) -> Result<Value, RuntimeError>`.
pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

pub struct NativeFnObj {
    pub func: NativeFn,
    pub name: ObjectRef,
    /// Declared arity; `-1` means variadic.
    pub arity: i32,
}

/// Wraps the compiler-contract [`crate::bytecode::Function`] (spec §6.1)
/// with the heap-side identity the VM needs: an interned name and source
/// module id, rather than the contract's borrowed `Box<str>`.
pub struct FunctionObj {
    pub function: crate::bytecode::Function,
    pub name: Option<ObjectRef>,
    pub source_id: Option<ObjectRef>,
}

impl FunctionObj {
    #[must_use]
    pub fn arity(&self) -> u8 {
        self.function.arity
    }

    #[must_use]
    pub fn is_variadic(&self) -> bool {
        self.function.is_variadic
    }

    #[must_use]
    pub fn line_for_ip(&self, ip: usize) -> u32 {
        self.function.line_for_ip(ip)
    }
}

/// A function closed over captured upvalues, bound to the module it was
/// defined in.
pub struct ClosureObj {
    pub function: ObjectRef,
    pub module: ObjectRef,
    pub defaults: Vec<Value>,
    pub upvalues: Vec<ObjectRef>,
}

/// A receiver bound to a callable (closure, compiled function, or native fn).
pub struct BoundMethodObj {
    pub receiver: Value,
    pub callable: ObjectRef,
}

/// A one-slot method-lookup cache: the last name looked up and its result,
/// invalidated implicitly by any lookup under a different name.
pub type MethodCache = Cell<Option<(ObjectRef, Value)>>;

/// A class: name, optional superclass, instance/static method and field
/// tables, and a cached init method plus one-slot lookup cache.
pub struct ClassObj {
    pub name: ObjectRef,
    pub superclass: Option<ObjectRef>,
    pub all_instance_methods: Table,
    pub pub_instance_methods: Table,
    pub all_field_indexes: Table,
    pub pub_field_indexes: Table,
    pub default_field_values: Vec<Value>,
    pub static_methods: Table,
    pub static_fields: Table,
    pub init_method: Option<Value>,
    pub method_cache: MethodCache,
}

impl ClassObj {
    #[must_use]
    pub fn new(name: ObjectRef) -> Self {
        Self {
            name,
            superclass: None,
            all_instance_methods: Table::new(),
            pub_instance_methods: Table::new(),
            all_field_indexes: Table::new(),
            pub_field_indexes: Table::new(),
            default_field_values: Vec::new(),
            static_methods: Table::new(),
            static_fields: Table::new(),
            init_method: None,
            method_cache: Cell::new(None),
        }
    }
}

/// An instance: a flexible trailing array of field values, one per entry in
/// the class's `default_field_values`.
pub struct InstanceObj {
    pub fields: Vec<Value>,
}

/// A module: submodule cache, member slots, and two name-to-index tables
/// (all members, public members only).
#[derive(Default)]
pub struct ModuleObj {
    pub submodules: Table,
    pub members: Vec<Value>,
    pub all_member_indexes: Table,
    pub pub_member_indexes: Table,
}

/// The discriminated iterator state (spec §4.8). See [`crate::iterator`].
pub struct IterObj {
    pub kind: crate::iterator::IterKind,
}

/// A singly-linked queue node.
pub struct QueueNodeObj {
    pub value: Value,
    pub next: Option<ObjectRef>,
}

/// A FIFO queue: head/tail pointers into a chain of [`QueueNodeObj`]s.
#[derive(Default)]
pub struct QueueObj {
    pub head: Option<ObjectRef>,
    pub tail: Option<ObjectRef>,
    pub count: usize,
}

/// An upvalue: either open (still pointing at a live stack slot) or closed
/// (holding its own copied value).
#[derive(Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

pub struct UpvalueObj {
    pub state: UpvalueState,
}

/// An owned OS file stream with an optional source path.
pub struct FileObj {
    #[cfg(feature = "std")]
    pub stream: Option<std::fs::File>,
    pub path: Option<ObjectRef>,
}

/// A catchable error value: a message plus a details map (minimally `source`
/// and `line`, per §4.12/§7).
pub struct ErrObj {
    pub message: ObjectRef,
    pub details: Table,
}

/// An opaque host resource with an on-free callback, used by native
/// extensions that need deterministic cleanup at sweep time.
pub struct ResourcePointerObj {
    pub ptr: usize,
    pub on_free: Option<fn(usize)>,
}
