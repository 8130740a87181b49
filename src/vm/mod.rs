// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! The interpreter: call frames, the dispatch loop, and the public `Vm`
//! handle (spec §4.1, §4.6, §6.2).

#[cfg(test)]
mod vm_test;

use crate::bytecode::{self, decode_opcode, OpCode};
use crate::gc::Gc;
use crate::heap::{
    BoundMethodObj, ClassObj, ClosureObj, ErrObj, FunctionObj, InstanceObj, IterObj, MapObj,
    ModuleObj, NativeFn, ObjKind, ObjectRef, QueueNodeObj, QueueObj, TupObj, UpvalueObj,
    UpvalueState, VecObj,
};
use crate::platform::{EmptyStdlibSource, Filesystem, StdFilesystem, StdlibSource};
use crate::strings::Strings;
use crate::table::Table;
use crate::value::Value;
use log::{trace, warn};
use std::fmt;

/// What a [`Compiler`] uses to turn a string literal, field name, or import
/// path it lexed out of source text into a constant-pool [`Value`].
///
/// A `Function`'s `constants` pool can only hold a `Value::Obj` string by
/// pointing at a heap-allocated, interned [`crate::heap::ObjKind::Str`] —
/// there's no separate "unboxed literal" representation (spec §4.4: every
/// `Str` is heap-allocated and interned). The compiler has no `Gc`/`Strings`
/// of its own, so the VM lends it one through this narrow seam instead of
/// handing over full access to its heap, mirroring the teacher's own
/// `compile(expr, heap: &Heap, mem: &M)` signature.
pub trait StringInterner {
    /// Intern a copy of `bytes`, returning the (possibly already-existing)
    /// string object as a `Value::Obj`.
    fn intern(&mut self, bytes: &[u8]) -> Value;
}

struct VmInterner<'a> {
    gc: &'a mut Gc,
    strings: &'a mut Strings,
}

impl StringInterner for VmInterner<'_> {
    fn intern(&mut self, bytes: &[u8]) -> Value {
        self.strings.copy(self.gc, bytes)
    }
}

/// Compiles module source text into a [`bytecode::Function`]. The lexer and
/// parser are an external collaborator; this is the boundary contract
/// (spec §6.1) an embedder's compiler crate satisfies.
pub trait Compiler {
    /// # Errors
    /// Returns a human-readable message on a syntax error.
    fn compile(
        &self,
        source: &[u8],
        module_name: &str,
        interner: &mut dyn StringInterner,
    ) -> Result<bytecode::Function, String>;
}

/// A [`Compiler`] that always fails, for embedders with no front end wired
/// up yet (running only pre-built [`bytecode::Function`]s via
/// [`Vm::call_function`]).
#[derive(Default)]
pub struct NoCompiler;

impl Compiler for NoCompiler {
    fn compile(&self, _source: &[u8], module_name: &str, _interner: &mut dyn StringInterner) -> Result<bytecode::Function, String> {
        Err(format!("no compiler configured; cannot compile module '{module_name}'"))
    }
}

/// Every runtime failure: the panic/exit halt protocol, plus internal
/// invariant violations that indicate a malformed [`bytecode::Function`]
/// rather than a user-level error.
#[derive(Debug)]
pub enum RuntimeError {
    /// A user-level panic with a message; unwinds to the nearest `try` or
    /// to the top level.
    Panic(String),
    /// A clean, non-error shutdown request with a process exit code.
    Exit(i32),
    InvalidOpcode(u8),
    IpOutOfBounds,
    ConstantOutOfBounds(u16),
    StackUnderflow,
    StackOverflow,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic(msg) => write!(f, "panic: {msg}"),
            Self::Exit(code) => write!(f, "exit({code})"),
            Self::InvalidOpcode(b) => write!(f, "invalid opcode byte: {b}"),
            Self::IpOutOfBounds => write!(f, "instruction pointer out of bounds"),
            Self::ConstantOutOfBounds(i) => write!(f, "constant pool index out of bounds: {i}"),
            Self::StackUnderflow => write!(f, "value stack underflow"),
            Self::StackOverflow => write!(f, "call stack overflow"),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// A single call frame: which closure is executing, where its instruction
/// pointer is, and where its local slot 0 lives on the value stack.
struct CallFrame {
    closure: ObjectRef,
    ip: usize,
    fp: usize,
    with_stack_len_on_entry: usize,
}

/// A `with` block's saved restore point, active for the duration of the
/// block's body (spec: `$end_with` callback invoked on both normal exit and
/// unwind).
struct WithEntry {
    value: Value,
}

/// Commonly-used interned strings, resolved once at bootstrap. A named
/// struct (not an array indexed by a magic constant) so every use site
/// reads as `vm.canned.init` rather than `vm.canned[3]`.
pub struct CannedStrings {
    pub init: Value,
    pub call: Value,
    pub next: Value,
    pub iter: Value,
    pub str: Value,
    pub main: Value,
}

impl CannedStrings {
    fn new(gc: &mut Gc, strings: &mut Strings) -> Self {
        Self {
            init: strings.copy(gc, b"$init"),
            call: strings.copy(gc, b"$call"),
            next: strings.copy(gc, b"$next"),
            iter: strings.copy(gc, b"$iter"),
            str: strings.copy(gc, b"$str"),
            main: strings.copy(gc, b"main"),
        }
    }
}

/// Builder-style construction options for [`Vm::new`].
pub struct VmOptions {
    byte_cap: Option<usize>,
    stress_gc: bool,
    search_paths: Vec<String>,
    filesystem: Box<dyn Filesystem>,
    stdlib: Box<dyn StdlibSource>,
    compiler: Box<dyn Compiler>,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            byte_cap: None,
            stress_gc: false,
            search_paths: Vec::new(),
            filesystem: Box::new(StdFilesystem),
            stdlib: Box::new(EmptyStdlibSource),
            compiler: Box::new(NoCompiler),
        }
    }
}

impl VmOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_byte_cap(mut self, cap: usize) -> Self {
        self.byte_cap = Some(cap);
        self
    }

    #[must_use]
    pub fn with_stress_gc(mut self, enabled: bool) -> Self {
        self.stress_gc = enabled;
        self
    }

    #[must_use]
    pub fn with_search_path(mut self, path: impl Into<String>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    #[must_use]
    pub fn with_filesystem(mut self, fs: impl Filesystem + 'static) -> Self {
        self.filesystem = Box::new(fs);
        self
    }

    #[must_use]
    pub fn with_stdlib_source(mut self, src: impl StdlibSource + 'static) -> Self {
        self.stdlib = Box::new(src);
        self
    }

    #[must_use]
    pub fn with_compiler(mut self, compiler: impl Compiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }
}

/// Hash constant for every finite integer-valued hash (shared by `I64`,
/// integer-valued `F64`, and `Char`), and the fixed sentinels for the
/// non-finite `F64` cases the spec calls out by name.
fn hash_integer(n: i64) -> u64 {
    crate::strings::fnv1a(&n.to_le_bytes())
}

/// Float just past the largest magnitude an `i64` can represent exactly
/// (`2^63`); used as the boundary for routing a whole-valued `F64` through
/// [`hash_integer`] instead of hashing its bit pattern.
const I64_HASH_RANGE_HIGH: f64 = 9_223_372_036_854_775_808.0;
const I64_HASH_RANGE_LOW: f64 = i64::MIN as f64;
const POS_INFINITY_HASH: u64 = 0x7ff0_0000_0000_0000;
const NEG_INFINITY_HASH: u64 = 0xfff0_0000_0000_0000;

fn hash_float(f: f64) -> u64 {
    if f.is_nan() {
        return 0;
    }
    if f.is_infinite() {
        return if f > 0.0 { POS_INFINITY_HASH } else { NEG_INFINITY_HASH };
    }
    if f == f.trunc() && f >= I64_HASH_RANGE_LOW && f < I64_HASH_RANGE_HIGH {
        return hash_integer(f as i64);
    }
    crate::strings::fnv1a(&f.to_bits().to_le_bytes())
}

/// Compares a table key value against a plain `&str`, for lookups keyed by a
/// segment name the caller hasn't interned (or no longer needs interned).
fn str_key_eq(key: Value, seg: &str) -> bool {
    match key {
        Value::Obj(o) => match &o.get().kind {
            ObjKind::Str(s) => s.as_str() == seg,
            _ => false,
        },
        _ => false,
    }
}

/// The virtual machine: owns the heap, the value/frame/with stacks, module
/// globals, and every piece of injected platform/compiler policy.
pub struct Vm {
    gc: Gc,
    strings: Strings,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Open upvalues, ordered by descending stack slot (highest slot
    /// first), so `capture_upvalue`/`close_upvalues` can walk from the
    /// front and stop at the first non-matching entry.
    open_upvalues: Vec<ObjectRef>,
    with_stack: Vec<WithEntry>,
    root_modules: Table,
    filesystem: Box<dyn Filesystem>,
    stdlib: Box<dyn StdlibSource>,
    compiler: Box<dyn Compiler>,
    search_paths: Vec<String>,
    canned: CannedStrings,
    err_class: Option<ObjectRef>,
    error_sentinel: Value,
}

impl Vm {
    #[must_use]
    pub fn new(options: VmOptions) -> Self {
        let mut gc = Gc::new(options.byte_cap);
        gc.set_stress_mode(options.stress_gc);
        let mut strings = Strings::new(&mut gc);
        let canned = CannedStrings::new(&mut gc, &mut strings);

        let mut vm = Self {
            gc,
            strings,
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            with_stack: Vec::new(),
            root_modules: Table::new(),
            filesystem: options.filesystem,
            stdlib: options.stdlib,
            compiler: options.compiler,
            search_paths: options.search_paths,
            canned,
            err_class: None,
            error_sentinel: Value::Null,
        };

        let err_class = vm.bootstrap_err_class();
        vm.err_class = Some(err_class);
        let sentinel = vm.new_err(b"not found", &[]);
        vm.error_sentinel = sentinel;
        vm
    }

    fn bootstrap_err_class(&mut self) -> ObjectRef {
        let name = self.strings.copy(&mut self.gc, b"Err");
        let name_ref = name.as_obj().expect("interned string is an Obj");
        self.gc.alloc(None, ObjKind::Class(ClassObj::new(name_ref)))
    }

    /// Enable or disable the GC's every-allocation stress-collection mode.
    pub fn set_debug_gc(&mut self, enabled: bool) {
        self.gc.set_stress_mode(enabled);
    }

    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.gc.bytes_in_use()
    }

    // ---------------------------------------------------------------
    // Panics and errors
    // ---------------------------------------------------------------

    pub(crate) fn panic(&mut self, message: impl Into<String>) -> RuntimeError {
        let message = message.into();
        warn!(target: "crucible::vm", "panic: {message}");
        RuntimeError::Panic(message)
    }

    fn new_err(&mut self, message: &[u8], details: &[(Value, Value)]) -> Value {
        let message_val = self.strings.copy(&mut self.gc, message);
        let message_ref = message_val.as_obj().expect("interned string is an Obj");
        let mut table = Table::new();
        for (k, v) in details {
            let hash = self.hash_value(*k);
            table.set(*k, *v, hash, |a, b| a.strict_eq(b));
        }
        let obj = self.gc.alloc(self.err_class, ObjKind::Err(ErrObj { message: message_ref, details: table }));
        Value::Obj(obj)
    }

    pub(crate) fn error_sentinel(&mut self) -> Value {
        self.error_sentinel
    }

    pub(crate) fn is_error_sentinel(&mut self, v: Value) -> bool {
        v.strict_eq(&self.error_sentinel)
    }

    /// Hashes `v` per the spec's cross-type rule (§4.1): values that compare
    /// semantically equal must hash equal, so `I64(7)`, `F64(7.0)`, and
    /// `Char(7)` all route through [`hash_integer`]. `NaN` hashes to 0;
    /// `±∞` hash to fixed constants distinct from any finite integer hash.
    fn hash_value(&mut self, v: Value) -> u64 {
        match v {
            Value::I64(n) => hash_integer(n),
            Value::F64(f) => hash_float(f),
            Value::Char(c) => hash_integer(i64::from(c)),
            Value::Bool(b) => crate::strings::fnv1a(&[u8::from(b)]),
            Value::Null => 0,
            Value::Tombstone => 1,
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Str(s) => s.hash,
                ObjKind::Tup(t) => {
                    let values = t.values.clone();
                    values.iter().fold(0u64, |acc, elem| acc ^ self.hash_value(*elem))
                }
                ObjKind::Map(m) if m.is_set => {
                    let keys: Vec<Value> = m.table.iter_live().map(|(k, _)| k).collect();
                    keys.iter().fold(0u64, |acc, k| acc ^ self.hash_value(*k))
                }
                _ => {
                    if let Some(callable) = self.lookup_instance_method(v, "$hash") {
                        if let Ok(Value::I64(n)) = crate::call::call_value(self, callable, &[]) {
                            return hash_integer(n);
                        }
                    }
                    o.as_ptr() as u64
                }
            },
        }
    }

    // ---------------------------------------------------------------
    // Allocation helpers used by ops/call/iterator
    // ---------------------------------------------------------------

    pub(crate) fn intern_copy(&mut self, bytes: &[u8]) -> Value {
        self.maybe_collect();
        self.strings.copy(&mut self.gc, bytes)
    }

    pub(crate) fn concat_strings(&mut self, a: &[u8], b: &[u8]) -> Value {
        self.maybe_collect();
        self.strings.concat(&mut self.gc, a, b)
    }

    pub(crate) fn repeat_string(&mut self, bytes: &[u8], n: usize) -> Value {
        let mut buf = Vec::with_capacity(bytes.len() * n);
        for _ in 0..n {
            buf.extend_from_slice(bytes);
        }
        self.intern_copy(&buf)
    }

    pub(crate) fn append_codepoint(&mut self, bytes: &[u8], c: u32) -> Value {
        let mut buf = bytes.to_vec();
        if let Some(ch) = char::from_u32(c) {
            let mut tmp = [0u8; 4];
            buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
        }
        self.intern_copy(&buf)
    }

    pub(crate) fn prepend_codepoint(&mut self, c: u32, bytes: &[u8]) -> Value {
        let mut buf = Vec::with_capacity(bytes.len() + 4);
        if let Some(ch) = char::from_u32(c) {
            let mut tmp = [0u8; 4];
            buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
        }
        buf.extend_from_slice(bytes);
        self.intern_copy(&buf)
    }

    pub(crate) fn concat_codepoints(&mut self, a: u32, b: u32) -> Value {
        let mut buf = Vec::with_capacity(8);
        let mut tmp = [0u8; 4];
        if let Some(ch) = char::from_u32(a) {
            buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
        }
        if let Some(ch) = char::from_u32(b) {
            buf.extend_from_slice(ch.encode_utf8(&mut tmp).as_bytes());
        }
        self.intern_copy(&buf)
    }

    /// `Some(values)` if `v` is a `Tup`, for element-wise semantic equality
    /// (spec §4.1: "element-wise for tuples").
    pub(crate) fn as_tuple_values(&self, v: Value) -> Option<Vec<Value>> {
        match v {
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Tup(t) => Some(t.values.to_vec()),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn as_str_bytes(&self, v: Value) -> Option<Vec<u8>> {
        match v {
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Str(s) => Some(s.bytes.to_vec()),
                _ => None,
            },
            _ => None,
        }
    }

    pub(crate) fn str_bytes_of(&self, obj: ObjectRef) -> String {
        match &obj.get().kind {
            ObjKind::Str(s) => s.as_str().to_string(),
            _ => String::new(),
        }
    }

    /// Allocate a tuple from `values`.
    ///
    /// # Errors
    /// Never fails in this implementation (the byte-cap accounting always
    /// allows allocation to proceed); kept fallible per the spec's
    /// out-of-memory contract.
    pub(crate) fn alloc_tuple(&mut self, values: &[Value]) -> Result<Value, RuntimeError> {
        self.maybe_collect();
        let obj = self.gc.alloc(None, ObjKind::Tup(TupObj { values: values.to_vec().into_boxed_slice() }));
        Ok(Value::Obj(obj))
    }

    pub(crate) fn alloc_vec(&mut self, values: Vec<Value>) -> Value {
        self.maybe_collect();
        Value::Obj(self.gc.alloc(None, ObjKind::Vec(VecObj { values })))
    }

    pub(crate) fn alloc_map(&mut self, is_set: bool) -> Value {
        self.maybe_collect();
        Value::Obj(self.gc.alloc(None, ObjKind::Map(MapObj { table: Table::new(), is_set, is_weak: false })))
    }

    pub(crate) fn alloc_iter(&mut self, kind: crate::iterator::IterKind) -> ObjectRef {
        self.maybe_collect();
        self.gc.alloc(None, ObjKind::Iter(IterObj { kind }))
    }

    pub(crate) fn new_instance(&mut self, class_ref: ObjectRef) -> Result<Value, RuntimeError> {
        self.maybe_collect();
        let defaults = match &class_ref.get().kind {
            ObjKind::Class(c) => c.default_field_values.clone(),
            _ => return Err(self.panic("not a class")),
        };
        let obj = self.gc.alloc(Some(class_ref), ObjKind::Instance(InstanceObj { fields: defaults }));
        Ok(Value::Obj(obj))
    }

    // ---------------------------------------------------------------
    // Method / field resolution
    // ---------------------------------------------------------------

    pub(crate) fn is_instance(&self, v: Value) -> bool {
        matches!(v, Value::Obj(o) if matches!(o.get().kind, ObjKind::Instance(_)))
    }

    fn class_of(&self, v: Value) -> Option<ObjectRef> {
        match v {
            Value::Obj(o) => o.get().class,
            _ => None,
        }
    }

    /// Look up `name` on `class_ref`'s method-resolution order (the class
    /// itself, then its superclass chain), consulting the one-slot cache
    /// first.
    pub(crate) fn lookup_method_on_class(&mut self, class_ref: ObjectRef, name: &str) -> Option<Value> {
        let hash = crate::strings::fnv1a(name.as_bytes());
        let name_val = self.intern_copy(name.as_bytes());

        let mut cursor = Some(class_ref);
        while let Some(c) = cursor {
            let ObjKind::Class(class) = &c.get().kind else {
                return None;
            };
            if let Some((cached_name, cached_val)) = class.method_cache.get() {
                if str_matches(cached_name, name) {
                    return Some(cached_val);
                }
            }
            if let Some(found) = class.all_instance_methods.get(&name_val, hash, |k, _| key_matches(k, name)) {
                class.method_cache.set(Some((
                    name_val.as_obj().expect("interned string is an Obj"),
                    found,
                )));
                return Some(found);
            }
            cursor = class.superclass;
        }
        None
    }

    /// Look up an instance method, returning a `BoundMethod` if `receiver`
    /// is an instance, or `None` if no such method exists.
    pub(crate) fn lookup_instance_method(&mut self, receiver: Value, name: &str) -> Option<Value> {
        let class_ref = self.class_of(receiver)?;
        let method = self.lookup_method_on_class(class_ref, name)?;
        let method_obj = method.as_obj()?;
        let bound = self.gc.alloc(None, ObjKind::BoundMethod(BoundMethodObj { receiver, callable: method_obj }));
        Some(Value::Obj(bound))
    }

    /// Thin forwarding wrapper so operator dispatch (`crate::ops`) and other
    /// native-side callers can invoke a value without importing
    /// [`crate::call::call_value`] directly.
    pub(crate) fn call_value(&mut self, callee: Value, args: &[Value]) -> Result<Value, RuntimeError> {
        crate::call::call_value(self, callee, args)
    }

    /// Thin forwarding wrapper around [`crate::call::call_method`] for the
    /// same reason as [`Vm::call_value`] (used by the iterator protocol's
    /// `$next`/`$iter` fallbacks).
    pub(crate) fn call_method(&mut self, receiver: Value, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        crate::call::call_method(self, receiver, name, args)
    }

    /// `key in container` (spec §4.7): map/set membership, substring
    /// search, or `$contains` fallback.
    pub(crate) fn contains(&mut self, container: Value, key: Value) -> Result<Value, RuntimeError> {
        if let Value::Obj(o) = container {
            match &o.get().kind {
                ObjKind::Map(m) => {
                    let hash = self.hash_value(key);
                    return Ok(Value::Bool(m.table.contains(&key, hash, |a, b| a.strict_eq(b))));
                }
                ObjKind::Str(s) => {
                    if let Some(needle) = self.as_str_bytes(key) {
                        let hay = s.bytes.to_vec();
                        return Ok(Value::Bool(contains_subslice(&hay, &needle)));
                    }
                }
                ObjKind::Vec(v) => {
                    return Ok(Value::Bool(v.values.iter().any(|x| x.strict_eq(&key))));
                }
                ObjKind::Tup(t) => {
                    return Ok(Value::Bool(t.values.iter().any(|x| x.strict_eq(&key))));
                }
                _ => {}
            }
        }
        if let Some(method) = self.lookup_instance_method(container, "$contains") {
            return crate::call::call_value(self, method, &[key]);
        }
        Err(self.panic(format!("value of type '{}' does not support 'in'", container.type_name())))
    }

    pub(crate) fn map_entry_at(&mut self, map_ref: ObjectRef, slot: usize) -> Option<(Value, Value)> {
        match &map_ref.get().kind {
            ObjKind::Map(m) => m.table.entry_at(slot),
            _ => None,
        }
    }

    /// `true` if `slot` names a tombstone in `map_ref`'s table (as opposed to
    /// being past the end of the entry array). Lets `MapKeys`/`MapValues`/
    /// `MapEntries` iterators skip over removed entries instead of stopping
    /// at them.
    pub(crate) fn map_slot_is_tombstone(&mut self, map_ref: ObjectRef, slot: usize) -> bool {
        match &map_ref.get().kind {
            ObjKind::Map(m) => m.table.is_tombstone_at(slot),
            _ => false,
        }
    }

    pub(crate) fn map_entry_array_len(&mut self, map_ref: ObjectRef) -> usize {
        match &map_ref.get().kind {
            ObjKind::Map(m) => m.table.entry_array_len(),
            _ => 0,
        }
    }

    /// Render `v` to its display string, calling `$str` if defined on an
    /// instance.
    ///
    /// # Errors
    /// Propagates an error from a user `$str` method.
    pub(crate) fn stringify(&mut self, v: Value) -> Result<String, RuntimeError> {
        match v {
            Value::Bool(b) => Ok(b.to_string()),
            Value::I64(n) => Ok(n.to_string()),
            Value::F64(n) => Ok(format!("{n}")),
            Value::Char(c) => Ok(char::from_u32(c).map(String::from).unwrap_or_default()),
            Value::Null => Ok("null".to_string()),
            Value::Tombstone => Ok(String::new()),
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Str(s) => Ok(s.as_str().to_string()),
                _ => {
                    if let Some(method) = self.lookup_instance_method(v, "$str") {
                        let result = crate::call::call_value(self, method, &[])?;
                        return self.stringify(result);
                    }
                    Ok(format!("<{}>", o.kind_name()))
                }
            },
        }
    }

    // ---------------------------------------------------------------
    // Modules
    // ---------------------------------------------------------------

    pub(crate) fn root_modules(&self) -> &Table {
        &self.root_modules
    }

    pub(crate) fn register_root_module(&mut self, seg: &str, module: ObjectRef) {
        let key = self.intern_copy(seg.as_bytes());
        let hash = crate::strings::fnv1a(seg.as_bytes());
        self.root_modules.set(key, Value::Obj(module), hash, |a, b| a.strict_eq(b));
    }

    pub(crate) fn register_submodule(&mut self, parent: ObjectRef, seg: &str, module: ObjectRef) {
        let key = self.intern_copy(seg.as_bytes());
        let hash = crate::strings::fnv1a(seg.as_bytes());
        let ObjKind::Module(m) = &mut parent.get_mut().kind else {
            return;
        };
        m.submodules.set(key, Value::Obj(module), hash, |a, b| a.strict_eq(b));
    }

    /// Remove a submodule previously installed with [`Self::register_root_module`],
    /// undoing the optimistic pre-execution registration (spec §4.11 step 5)
    /// after its body failed to load.
    pub(crate) fn unregister_root_module(&mut self, seg: &str) {
        let hash = crate::strings::fnv1a(seg.as_bytes());
        self.root_modules.remove(&Value::Null, hash, |k, _| str_key_eq(*k, seg));
    }

    /// As [`Self::unregister_root_module`], for a submodule of `parent`.
    pub(crate) fn unregister_submodule(&mut self, parent: ObjectRef, seg: &str) {
        let hash = crate::strings::fnv1a(seg.as_bytes());
        let ObjKind::Module(m) = &mut parent.get_mut().kind else {
            return;
        };
        m.submodules.remove(&Value::Null, hash, |k, _| str_key_eq(*k, seg));
    }

    /// Allocate a fresh, empty module, not yet installed anywhere.
    pub(crate) fn alloc_empty_module(&mut self) -> ObjectRef {
        self.gc.alloc(None, ObjKind::Module(ModuleObj::default()))
    }

    /// Resolve, compile, and execute a module's top-level body *into an
    /// already-installed* module object (spec §4.11 step 2: the module is
    /// installed at its prefix before its body runs, which is what lets a
    /// reentrant/cyclic import resolve to the in-progress module instead of
    /// recursing).
    pub(crate) fn run_module_body_into(&mut self, path: &str, module: ObjectRef) -> Result<(), RuntimeError> {
        let source = crate::module::resolve_source(path, self.filesystem.as_ref(), self.stdlib.as_ref(), &self.search_paths)
            .map_err(|e| self.panic(e))?;
        let mut interner = VmInterner { gc: &mut self.gc, strings: &mut self.strings };
        let function = self
            .compiler
            .compile(&source, path, &mut interner)
            .map_err(|e| self.panic(format!("failed to compile module '{path}': {e}")))?;
        let function_ref = self.gc.alloc(None, ObjKind::Function(FunctionObj {
            function,
            name: None,
            source_id: None,
        }));
        let closure = self.gc.alloc(None, ObjKind::Closure(ClosureObj {
            function: function_ref,
            module,
            defaults: Vec::new(),
            upvalues: Vec::new(),
        }));
        self.invoke_closure(closure, Value::Null, &[])?;
        Ok(())
    }

    /// Compile and run a standalone function body directly (bypassing the
    /// module loader), for embedders that already have source text or a
    /// pre-compiled [`bytecode::Function`] (spec §6.2's public entry point).
    ///
    /// # Errors
    /// Propagates compile and runtime errors.
    pub fn call_function(&mut self, function: bytecode::Function, args: &[Value]) -> Result<Value, RuntimeError> {
        let module = self.gc.alloc(None, ObjKind::Module(ModuleObj::default()));
        let function_ref = self.gc.alloc(None, ObjKind::Function(FunctionObj {
            function,
            name: None,
            source_id: None,
        }));
        let closure = self.gc.alloc(None, ObjKind::Closure(ClosureObj {
            function: function_ref,
            module,
            defaults: Vec::new(),
            upvalues: Vec::new(),
        }));
        self.invoke_closure(closure, Value::Null, args)
    }

    /// Import a dotted module path, returning its module object.
    ///
    /// # Errors
    /// See [`crate::module::import`].
    pub fn import_module(&mut self, path: &str) -> Result<Value, RuntimeError> {
        crate::module::import(self, path).map(Value::Obj)
    }

    /// Compile and run `source` as a fresh module body, under `source_id`
    /// for diagnostics (spec §6.2 `exec_code`).
    ///
    /// # Errors
    /// Propagates a compile failure or any panic raised by the body.
    pub fn exec_code(&mut self, source: &[u8], source_id: &str) -> Result<Value, RuntimeError> {
        let mut interner = VmInterner { gc: &mut self.gc, strings: &mut self.strings };
        let function = self
            .compiler
            .compile(source, source_id, &mut interner)
            .map_err(|e| self.panic(format!("failed to compile '{source_id}': {e}")))?;
        self.call_function(function, &[])
    }

    /// Read `path` off the configured [`Filesystem`] and run it as a module
    /// body (spec §6.2 `exec_file`).
    ///
    /// # Errors
    /// Propagates an I/O failure, a compile failure, or a panic raised by
    /// the body.
    pub fn exec_file(&mut self, path: &str) -> Result<Value, RuntimeError> {
        let source = self.filesystem.read_file(path).map_err(|e| self.panic(e))?;
        self.exec_code(&source, path)
    }

    /// As [`Self::exec_file`], but `path` may name a directory containing a
    /// `self.crucible` package entry point (spec §6.2 `exec_path`).
    ///
    /// # Errors
    /// See [`Self::exec_file`].
    pub fn exec_path(&mut self, path: &str) -> Result<Value, RuntimeError> {
        if self.filesystem.is_dir(path) {
            let entry = self.filesystem.join(path, "self.crucible");
            return self.exec_file(&entry);
        }
        self.exec_file(path)
    }

    /// Render the active call frames (innermost first) as a
    /// [`crate::diagnostics::StackFrameInfo`] trace, for a panic that
    /// escaped to the host uncaught (spec §4.12, §6.2's stack-trace-on-panic
    /// supplement).
    #[must_use]
    pub fn capture_stack_trace(&self) -> Vec<crate::diagnostics::StackFrameInfo> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let ObjKind::Closure(c) = &frame.closure.get().kind else {
                    unreachable!("call frames always hold a closure");
                };
                let ObjKind::Function(f) = &c.function.get().kind else {
                    unreachable!("closure function pointer always points at a Function");
                };
                let name = f.name.map_or_else(|| "<anonymous>".to_string(), |n| self.str_bytes_of(n));
                crate::diagnostics::StackFrameInfo {
                    name,
                    line: f.line_for_ip(frame.ip),
                    source: f.source_id.map(|s| self.str_bytes_of(s)),
                }
            })
            .collect()
    }

    /// Run `source` to completion, returning a rendered [`crate::diagnostics::PanicReport`]
    /// on an uncaught panic instead of the raw [`RuntimeError`] (spec §4.12,
    /// §6.2: "the message plus the active call-frame function names surfaces
    /// through the diagnostics module").
    ///
    /// # Errors
    /// Returns the rendered report if `source` panics; never returns `Err`
    /// for a clean run.
    pub fn run_to_completion(&mut self, source: &[u8], source_id: &str) -> Result<Value, String> {
        match self.exec_code(source, source_id) {
            Ok(v) => Ok(v),
            // A clean shutdown request, not a panic: no stack trace attached.
            Err(RuntimeError::Exit(code)) => Err(crate::diagnostics::render_exit(code)),
            Err(RuntimeError::Panic(message)) => {
                let frames = self.capture_stack_trace();
                Err(crate::diagnostics::PanicReport { message, frames }.render())
            }
            Err(other) => {
                let frames = self.capture_stack_trace();
                Err(crate::diagnostics::PanicReport { message: other.to_string(), frames }.render())
            }
        }
    }

    /// Restore the VM to a clean, ready-to-run state after a panic escaped
    /// all the way to the host without being caught by a `Try` (spec §6.2).
    ///
    /// Clears the operand stack, call frames, open upvalues, pending `with`
    /// receivers, and any allocator memory-failure latch. Leaves the module
    /// cache (`root_modules`) and everything reachable from it — including
    /// the main module, if the host re-runs it — untouched, so re-entering
    /// the VM after a panic doesn't re-import or re-initialize modules that
    /// already loaded successfully.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.with_stack.clear();
        self.gc.clear_memory_failure();
    }

    // ---------------------------------------------------------------
    // GC integration
    // ---------------------------------------------------------------

    fn maybe_collect(&mut self) {
        if self.gc.should_collect() {
            self.collect();
        }
    }

    fn collect(&mut self) {
        let mut object_roots = Vec::new();
        for frame in &self.frames {
            object_roots.push(frame.closure);
        }
        for uv in &self.open_upvalues {
            object_roots.push(*uv);
        }
        for (_, v) in self.root_modules.iter_live() {
            if let Value::Obj(o) = v {
                object_roots.push(o);
            }
        }
        if let Some(err_class) = self.err_class {
            object_roots.push(err_class);
        }
        object_roots.push(self.strings.pool_object());
        let mut value_roots: Vec<Value> = self.stack.clone();
        for w in &self.with_stack {
            value_roots.push(w.value);
        }
        value_roots.push(self.error_sentinel);
        value_roots.push(self.canned.init);
        value_roots.push(self.canned.call);
        value_roots.push(self.canned.next);
        value_roots.push(self.canned.iter);
        value_roots.push(self.canned.str);
        value_roots.push(self.canned.main);

        let strings = &mut self.strings;
        self.gc.collect_with_weak_sweep(&value_roots, &object_roots, || strings.sweep_unreachable());
    }

    // ---------------------------------------------------------------
    // Upvalues
    // ---------------------------------------------------------------

    fn capture_upvalue(&mut self, stack_slot: usize) -> ObjectRef {
        if let Some(pos) = self.open_upvalues.iter().position(|u| match &u.get().kind {
            ObjKind::Upvalue(uv) => matches!(uv.state, UpvalueState::Open(s) if s == stack_slot),
            _ => false,
        }) {
            return self.open_upvalues[pos];
        }
        let obj = self.gc.alloc(None, ObjKind::Upvalue(UpvalueObj { state: UpvalueState::Open(stack_slot) }));
        let insert_at = self
            .open_upvalues
            .iter()
            .position(|u| match &u.get().kind {
                ObjKind::Upvalue(uv) => match uv.state {
                    UpvalueState::Open(s) => s < stack_slot,
                    UpvalueState::Closed(_) => true,
                },
                _ => true,
            })
            .unwrap_or(self.open_upvalues.len());
        self.open_upvalues.insert(insert_at, obj);
        obj
    }

    fn close_upvalues_from(&mut self, from_slot: usize) {
        let stack = &self.stack;
        self.open_upvalues.retain(|u| {
            let ObjKind::Upvalue(uv) = &mut u.get_mut().kind else {
                return false;
            };
            match uv.state {
                UpvalueState::Open(slot) if slot >= from_slot => {
                    uv.state = UpvalueState::Closed(stack[slot]);
                    false
                }
                UpvalueState::Open(_) => true,
                UpvalueState::Closed(_) => false,
            }
        });
    }

    /// Pop every `with`-block receiver pushed since `down_to` and invoke its
    /// `$end_with()`, in LIFO order (spec §4.10 `Return`, §5 `with` blocks).
    ///
    /// Runs every pending `$end_with` even if one of them panics or exits:
    /// the first such error is remembered and returned only after the loop
    /// completes, per §9's "re-raised after all end-withs of the frame
    /// complete" resolution of the open question there.
    fn unwind_with_stack(&mut self, down_to: usize) -> Result<(), RuntimeError> {
        let mut first_err = None;
        while self.with_stack.len() > down_to {
            let entry = self.with_stack.pop().expect("checked len above");
            if let Some(method) = self.lookup_instance_method(entry.value, "$end_with") {
                if let Err(e) = crate::call::call_value(self, method, &[]) {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn read_upvalue(&self, uv_ref: ObjectRef) -> Value {
        match &uv_ref.get().kind {
            ObjKind::Upvalue(u) => match u.state {
                UpvalueState::Open(slot) => self.stack[slot],
                UpvalueState::Closed(v) => v,
            },
            _ => Value::Null,
        }
    }

    fn write_upvalue(&mut self, uv_ref: ObjectRef, value: Value) {
        let slot = match &uv_ref.get().kind {
            ObjKind::Upvalue(u) => match u.state {
                UpvalueState::Open(slot) => Some(slot),
                UpvalueState::Closed(_) => None,
            },
            _ => None,
        };
        match slot {
            Some(s) => self.stack[s] = value,
            None => {
                if let ObjKind::Upvalue(u) = &mut uv_ref.get_mut().kind {
                    u.state = UpvalueState::Closed(value);
                }
            }
        }
    }

    // ---------------------------------------------------------------
    // Queues / files / read helpers used by the iterator module
    // ---------------------------------------------------------------

    pub(crate) fn read_vec_values(&self, o: ObjectRef) -> Vec<Value> {
        match &o.get().kind {
            ObjKind::Vec(v) => v.values.clone(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn read_tup_values(&self, o: ObjectRef) -> Vec<Value> {
        match &o.get().kind {
            ObjKind::Tup(t) => t.values.to_vec(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn read_str_bytes(&self, o: ObjectRef) -> Vec<u8> {
        match &o.get().kind {
            ObjKind::Str(s) => s.bytes.to_vec(),
            _ => Vec::new(),
        }
    }

    pub(crate) fn read_queue_node(&self, o: ObjectRef) -> (Value, Option<ObjectRef>) {
        match &o.get().kind {
            ObjKind::QueueNode(n) => (n.value, n.next),
            _ => (Value::Null, None),
        }
    }

    pub(crate) fn read_file_line(&mut self, _file: ObjectRef) -> Result<Option<Value>, RuntimeError> {
        // Reading from an OS file handle is a platform concern; this
        // implementation's `FileObj` is populated by native stdlib methods
        // (out of scope here), so there is never a live stream to read from
        // at this layer. Always reports end-of-stream.
        Ok(None)
    }

    pub(crate) fn alloc_queue_push(&mut self, queue_ref: ObjectRef, value: Value) {
        self.maybe_collect();
        let node = self.gc.alloc(None, ObjKind::QueueNode(QueueNodeObj { value, next: None }));
        let ObjKind::Queue(q) = &mut queue_ref.get_mut().kind else {
            return;
        };
        let old_tail = q.tail;
        q.tail = Some(node);
        q.count += 1;
        if q.head.is_none() {
            q.head = Some(node);
            return;
        }
        if let Some(tail) = old_tail {
            if let ObjKind::QueueNode(t) = &mut tail.get_mut().kind {
                t.next = Some(node);
            }
        }
    }

    pub(crate) fn alloc_queue(&mut self) -> Value {
        self.maybe_collect();
        Value::Obj(self.gc.alloc(None, ObjKind::Queue(QueueObj::default())))
    }

    // ---------------------------------------------------------------
    // Call frame mechanics
    // ---------------------------------------------------------------

    const MAX_FRAMES: usize = 2048;

    /// Push a new frame for `closure`, run it to completion, and return
    /// its result value.
    ///
    /// # Errors
    /// Propagates any [`RuntimeError`] raised during execution of the
    /// frame, including a nested `Exit`.
    pub(crate) fn invoke_closure(&mut self, closure: ObjectRef, slot0: Value, params: &[Value]) -> Result<Value, RuntimeError> {
        if self.frames.len() >= Self::MAX_FRAMES {
            return Err(RuntimeError::StackOverflow);
        }
        let fp = self.stack.len();
        self.stack.push(slot0);
        self.stack.extend_from_slice(params);
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            fp,
            with_stack_len_on_entry: self.with_stack.len(),
        });
        let target_depth = self.frames.len() - 1;
        self.run(target_depth)
    }

    fn current_function(&self, frame_idx: usize) -> ObjectRef {
        let ObjKind::Closure(c) = &self.frames[frame_idx].closure.get().kind else {
            unreachable!("call frame closure is always a Closure object")
        };
        c.function
    }

    fn read_u8(&mut self, frame_idx: usize) -> Result<u8, RuntimeError> {
        let function = self.current_function(frame_idx);
        let ObjKind::Function(f) = &function.get().kind else {
            unreachable!()
        };
        let ip = self.frames[frame_idx].ip;
        let byte = *f.function.code.get(ip).ok_or(RuntimeError::IpOutOfBounds)?;
        self.frames[frame_idx].ip += 1;
        Ok(byte)
    }

    fn read_u16(&mut self, frame_idx: usize) -> Result<u16, RuntimeError> {
        let lo = self.read_u8(frame_idx)?;
        let hi = self.read_u8(frame_idx)?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn read_constant(&mut self, frame_idx: usize, index: u16) -> Result<Value, RuntimeError> {
        let function = self.current_function(frame_idx);
        let ObjKind::Function(f) = &function.get().kind else {
            unreachable!()
        };
        f.function
            .constants
            .get(index as usize)
            .copied()
            .ok_or(RuntimeError::ConstantOutOfBounds(index))
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn peek(&self, depth: usize) -> Result<Value, RuntimeError> {
        let len = self.stack.len();
        if depth >= len {
            return Err(RuntimeError::StackUnderflow);
        }
        Ok(self.stack[len - 1 - depth])
    }

    /// Jump out of one nested call: handle a module name's field table for
    /// `GetGlobal`/`SetGlobal`-style opcodes against the current frame's
    /// owning module.
    fn current_module(&self, frame_idx: usize) -> ObjectRef {
        let ObjKind::Closure(c) = &self.frames[frame_idx].closure.get().kind else {
            unreachable!()
        };
        c.module
    }

    /// The dispatch loop. Runs instructions until the frame at
    /// `target_depth` returns, then yields its result. Nested calls (from
    /// `CallValue` and friends) recurse back into `run` with a deeper
    /// `target_depth`, matching this interpreter's one-call-stack-per-Rust-
    /// stack design (simple, at the cost of native stack depth bounding
    /// call depth in addition to [`Self::MAX_FRAMES`]).
    fn run(&mut self, target_depth: usize) -> Result<Value, RuntimeError> {
        loop {
            let frame_idx = self.frames.len() - 1;
            let tag = self.read_u8(frame_idx)?;
            let Some(op) = decode_opcode(tag) else {
                return Err(RuntimeError::InvalidOpcode(tag));
            };
            trace!(target: "crucible::vm", "{op:?}");

            match op {
                OpCode::Pop => {
                    self.pop()?;
                }
                OpCode::Dup => {
                    let v = self.peek(0)?;
                    self.push(v);
                }
                OpCode::DupN => {
                    let n = self.read_u8(frame_idx)? as usize;
                    let v = self.peek(n)?;
                    self.push(v);
                }
                OpCode::PopEchoInRepl => {
                    self.pop()?;
                }
                OpCode::LoadTrue => self.push(Value::Bool(true)),
                OpCode::LoadFalse => self.push(Value::Bool(false)),
                OpCode::LoadNull => self.push(Value::Null),
                OpCode::LoadI => {
                    let byte = self.read_u8(frame_idx)?;
                    self.push(Value::I64(i64::from(byte as i8)));
                }
                OpCode::LoadConstant => {
                    let idx = self.read_u16(frame_idx)?;
                    let v = self.read_constant(frame_idx, idx)?;
                    self.push(v);
                }
                OpCode::GetLocal => {
                    let slot = self.read_u8(frame_idx)? as usize;
                    let fp = self.frames[frame_idx].fp;
                    self.push(self.stack[fp + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_u8(frame_idx)? as usize;
                    let fp = self.frames[frame_idx].fp;
                    let v = self.peek(0)?;
                    self.stack[fp + slot] = v;
                }
                OpCode::GetUpvalue => {
                    let idx = self.read_u8(frame_idx)? as usize;
                    let ObjKind::Closure(c) = &self.frames[frame_idx].closure.get().kind else {
                        unreachable!()
                    };
                    let uv = c.upvalues[idx];
                    self.push(self.read_upvalue(uv));
                }
                OpCode::SetUpvalue => {
                    let idx = self.read_u8(frame_idx)? as usize;
                    let ObjKind::Closure(c) = &self.frames[frame_idx].closure.get().kind else {
                        unreachable!()
                    };
                    let uv = c.upvalues[idx];
                    let v = self.peek(0)?;
                    self.write_upvalue(uv, v);
                }
                OpCode::GetGlobal | OpCode::DefinePubGlobal | OpCode::DefinePriGlobal | OpCode::SetGlobal => {
                    self.do_global_op(frame_idx, op)?;
                }
                OpCode::GetField | OpCode::SetField | OpCode::GetPubField | OpCode::SetPubField => {
                    self.do_field_op(frame_idx, op)?;
                }
                OpCode::GetMember => {
                    let idx = self.read_u16(frame_idx)?;
                    let name = self.read_constant(frame_idx, idx)?;
                    let module_val = self.pop()?;
                    self.push(self.get_module_member(module_val, name)?);
                }
                OpCode::GetIndex => {
                    let key = self.pop()?;
                    let container = self.pop()?;
                    self.push(self.get_index(container, key)?);
                }
                OpCode::SetIndex => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    let container = self.pop()?;
                    self.set_index(container, key, value)?;
                    self.push(value);
                }
                OpCode::GetMethod | OpCode::GetPubMethod => {
                    let idx = self.read_u16(frame_idx)?;
                    let name = self.read_constant(frame_idx, idx)?;
                    let receiver = self.pop()?;
                    let name_str = self.value_as_method_name(name)?;
                    let Some(method) = self.lookup_instance_method(receiver, &name_str) else {
                        return Err(self.panic(format!("object has no method '{name_str}'")));
                    };
                    self.push(method);
                }
                OpCode::GetSuperMethod => {
                    let idx = self.read_u16(frame_idx)?;
                    let name = self.read_constant(frame_idx, idx)?;
                    let superclass = self.pop()?;
                    let receiver = self.pop()?;
                    let name_str = self.value_as_method_name(name)?;
                    let Value::Obj(class_ref) = superclass else {
                        return Err(self.panic("invalid superclass reference"));
                    };
                    let Some(method) = self.lookup_method_on_class(class_ref, &name_str) else {
                        return Err(self.panic(format!("superclass has no method '{name_str}'")));
                    };
                    let Some(method_obj) = method.as_obj() else {
                        return Err(self.panic("invalid method value"));
                    };
                    let bound = self.gc.alloc(None, ObjKind::BoundMethod(BoundMethodObj { receiver, callable: method_obj }));
                    self.push(Value::Obj(bound));
                }
                OpCode::CallMethod | OpCode::CallPubMethod | OpCode::CallSuperMethod => {
                    self.do_call_method(frame_idx, op)?;
                }
                OpCode::CallMethodWithUnpack | OpCode::CallPubMethodWithUnpack | OpCode::CallSuperMethodWithUnpack => {
                    self.do_call_method_with_unpack(frame_idx, op)?;
                }
                OpCode::CallValue => {
                    let arg_count = self.read_u8(frame_idx)? as usize;
                    self.do_call_value(arg_count)?;
                }
                OpCode::CallValueWithUnpack => {
                    let arg_count = self.read_u8(frame_idx)? as usize;
                    self.do_call_value_with_unpack(arg_count)?;
                }

                OpCode::BinaryPlus => self.binary_op(crate::ops::add)?,
                OpCode::BinaryMinus => self.binary_op(crate::ops::sub)?,
                OpCode::BinaryStar => self.binary_op(crate::ops::mul)?,
                OpCode::BinaryStarStar => self.binary_pow()?,
                OpCode::BinarySlash => self.binary_op(crate::ops::div)?,
                OpCode::BinarySlashSlash => self.binary_op(crate::ops::floor_div)?,
                OpCode::BinaryPercent => self.binary_op(crate::ops::rem)?,
                OpCode::BinaryAmp => self.binary_int_op(|a, b| a & b)?,
                OpCode::BinaryBar => self.binary_int_op(|a, b| a | b)?,
                OpCode::BinaryCaret => self.binary_int_op(|a, b| a ^ b)?,
                OpCode::BinaryLessLess => self.binary_int_op(|a, b| a.wrapping_shl(b as u32))?,
                OpCode::BinaryGreaterGreater => self.binary_int_op(|a, b| a.wrapping_shr(b as u32))?,
                OpCode::BinaryLess => self.binary_op(crate::ops::less)?,
                OpCode::BinaryLessEqual => self.binary_op(crate::ops::less_equal)?,
                OpCode::BinaryGreater => self.binary_op(crate::ops::greater)?,
                OpCode::BinaryGreaterEqual => self.binary_op(crate::ops::greater_equal)?,
                OpCode::BinaryEqualEqual => self.binary_op(crate::ops::equal)?,
                OpCode::BinaryBangEqual => {
                    self.binary_op(crate::ops::equal)?;
                    let v = self.pop()?;
                    self.push(Value::Bool(!v.is_truthy()));
                }
                OpCode::BinaryIn => {
                    let key = self.pop()?;
                    let container = self.pop()?;
                    let r = self.contains(container, key)?;
                    self.push(r);
                }
                OpCode::ConcatStrings => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let r = crate::ops::add(self, a, b)?;
                    self.push(r);
                }
                OpCode::UnaryMinus => {
                    let v = self.pop()?;
                    let r = crate::ops::neg(self, v)?;
                    self.push(r);
                }
                OpCode::UnaryPlus => {
                    let v = self.pop()?;
                    self.push(v);
                }
                OpCode::UnaryBang => {
                    let v = self.pop()?;
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::UnaryTilde => {
                    let v = self.pop()?;
                    match v {
                        Value::I64(n) => self.push(Value::I64(!n)),
                        _ => return Err(self.panic(format!("invalid operand type for '~': '{}'", v.type_name()))),
                    }
                }

                OpCode::Jump => {
                    let dist = self.read_u16(frame_idx)?;
                    self.frames[frame_idx].ip += dist as usize;
                }
                OpCode::JumpBack => {
                    let dist = self.read_u16(frame_idx)?;
                    self.frames[frame_idx].ip -= dist as usize;
                }
                OpCode::JumpIfTrue => {
                    let dist = self.read_u16(frame_idx)?;
                    if self.peek(0)?.is_truthy() {
                        self.frames[frame_idx].ip += dist as usize;
                    }
                }
                OpCode::JumpIfFalse => {
                    let dist = self.read_u16(frame_idx)?;
                    if self.peek(0)?.is_falsey() {
                        self.frames[frame_idx].ip += dist as usize;
                    }
                }
                OpCode::PopJumpIfFalse => {
                    let dist = self.read_u16(frame_idx)?;
                    let v = self.pop()?;
                    if v.is_falsey() {
                        self.frames[frame_idx].ip += dist as usize;
                    }
                }
                OpCode::JumpIfNull => {
                    let dist = self.read_u16(frame_idx)?;
                    if self.peek(0)?.is_null() {
                        self.frames[frame_idx].ip += dist as usize;
                    }
                }
                OpCode::JumpIfNotNull => {
                    let dist = self.read_u16(frame_idx)?;
                    if !self.peek(0)?.is_null() {
                        self.frames[frame_idx].ip += dist as usize;
                    }
                }
                OpCode::JumpIfErr => {
                    let dist = self.read_u16(frame_idx)?;
                    if self.is_err_value(self.peek(0)?) {
                        self.frames[frame_idx].ip += dist as usize;
                    }
                }
                OpCode::JumpIfNotErr => {
                    let dist = self.read_u16(frame_idx)?;
                    if !self.is_err_value(self.peek(0)?) {
                        self.frames[frame_idx].ip += dist as usize;
                    }
                }
                OpCode::JumpIfNotKindaFalsey => {
                    let dist = self.read_u16(frame_idx)?;
                    if !self.is_kinda_falsey(self.peek(0)?) {
                        self.frames[frame_idx].ip += dist as usize;
                    }
                }

                OpCode::MakeVec => {
                    let count = self.read_u16(frame_idx)? as usize;
                    let values = self.stack.split_off(self.stack.len() - count);
                    let v = self.alloc_vec(values);
                    self.push(v);
                }
                OpCode::MakeMap | OpCode::MakeSet => {
                    let count = self.read_u16(frame_idx)? as usize;
                    let is_set = op == OpCode::MakeSet;
                    let m = self.alloc_map(is_set);
                    let Value::Obj(map_ref) = m else { unreachable!() };
                    if is_set {
                        let values = self.stack.split_off(self.stack.len() - count);
                        for v in values {
                            let hash = self.hash_value(v);
                            let ObjKind::Map(map) = &mut map_ref.get_mut().kind else { unreachable!() };
                            map.table.set(v, Value::Null, hash, |a, b| a.strict_eq(b));
                        }
                    } else {
                        let pairs = self.stack.split_off(self.stack.len() - count * 2);
                        for kv in pairs.chunks_exact(2) {
                            let hash = self.hash_value(kv[0]);
                            let ObjKind::Map(map) = &mut map_ref.get_mut().kind else { unreachable!() };
                            map.table.set(kv[0], kv[1], hash, |a, b| a.strict_eq(b));
                        }
                    }
                    self.push(m);
                }
                OpCode::MakeClosure | OpCode::MakeClosureWithDefArgs => {
                    self.do_make_closure(frame_idx, op)?;
                }
                OpCode::MakeClass => {
                    let idx = self.read_u16(frame_idx)?;
                    let name = self.read_constant(frame_idx, idx)?;
                    let Some(name_ref) = name.as_obj() else {
                        return Err(self.panic("invalid class name constant"));
                    };
                    let class = self.gc.alloc(None, ObjKind::Class(ClassObj::new(name_ref)));
                    self.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let superclass = self.pop()?;
                    let subclass = self.peek(0)?;
                    self.do_inherit(subclass, superclass)?;
                }
                OpCode::DefinePubMethod | OpCode::DefinePriMethod | OpCode::DefineStaticMethod => {
                    self.do_define_method(frame_idx, op)?;
                }
                OpCode::DefinePubField | OpCode::DefinePriField | OpCode::DefineStaticField => {
                    self.do_define_field(frame_idx, op)?;
                }

                OpCode::GetIterator => {
                    let v = self.pop()?;
                    let it = self.get_iterator(v)?;
                    self.push(it);
                }
                OpCode::GetNextFromIterator => {
                    let it = self.peek(0)?;
                    let Value::Obj(it_ref) = it else {
                        return Err(self.panic("not an iterator"));
                    };
                    let next = crate::iterator::next(self, it_ref)?;
                    self.push(next);
                }
                OpCode::Unpack => {
                    let count = self.read_u8(frame_idx)? as usize;
                    let v = self.pop()?;
                    self.do_unpack(v, count)?;
                }

                OpCode::Try => {
                    let callee = self.pop()?;
                    let frame_count_before = self.frames.len();
                    let stack_len_before = self.stack.len();
                    let with_len_before = self.with_stack.len();
                    let (source_val, line) = {
                        let function = self.current_function(frame_idx);
                        let ip = self.frames[frame_idx].ip;
                        match &function.get().kind {
                            ObjKind::Function(f) => (f.source_id.map_or(Value::Null, Value::Obj), f.line_for_ip(ip)),
                            _ => (Value::Null, 0),
                        }
                    };
                    match crate::call::call_value(self, callee, &[]) {
                        Ok(v) => self.push(v),
                        Err(RuntimeError::Panic(msg)) => {
                            // Frames between here and `frame_count_before`
                            // that panicked mid-body never reached their own
                            // `Return`, so any `with` receivers they pushed
                            // are still on the with-stack; unwind them (and
                            // run their `$end_with`s) before restoring state.
                            let unwind_result = self.unwind_with_stack(with_len_before);
                            self.close_upvalues_from(stack_len_before);
                            self.frames.truncate(frame_count_before);
                            self.stack.truncate(stack_len_before);
                            unwind_result?;
                            let source_key = self.intern_copy(b"source");
                            let line_key = self.intern_copy(b"line");
                            let err = self.new_err(
                                msg.as_bytes(),
                                &[(source_key, source_val), (line_key, Value::I64(i64::from(line)))],
                            );
                            self.push(err);
                        }
                        Err(e) => return Err(e),
                    }
                }
                OpCode::Assert => {
                    let v = self.pop()?;
                    if v.is_falsey() {
                        return Err(self.panic("assertion failed"));
                    }
                }
                OpCode::Echo => {
                    let v = self.pop()?;
                    let s = self.stringify(v)?;
                    println!("{s}");
                }
                OpCode::Format => {
                    let count = self.read_u16(frame_idx)? as usize;
                    let args = self.stack.split_off(self.stack.len() - count);
                    let mut out = String::new();
                    for a in args {
                        out.push_str(&self.stringify(a)?);
                    }
                    let v = self.intern_copy(out.as_bytes());
                    self.push(v);
                }
                OpCode::Stringify => {
                    let v = self.pop()?;
                    let s = self.stringify(v)?;
                    let sv = self.intern_copy(s.as_bytes());
                    self.push(sv);
                }

                OpCode::StartWith => {
                    let v = self.peek(0)?;
                    self.with_stack.push(WithEntry { value: v });
                }
                OpCode::EndWith => {
                    if let Some(entry) = self.with_stack.pop() {
                        if let Some(method) = self.lookup_instance_method(entry.value, "$end_with") {
                            crate::call::call_value(self, method, &[])?;
                        }
                    }
                }

                OpCode::ImportModule => {
                    let idx = self.read_u16(frame_idx)?;
                    let path_val = self.read_constant(frame_idx, idx)?;
                    let path = self.as_str_bytes(path_val).unwrap_or_default();
                    let path_str = String::from_utf8_lossy(&path).into_owned();
                    let module = crate::module::import(self, &path_str)?;
                    self.push(Value::Obj(module));
                }
                OpCode::ImportAllMembers => {
                    let idx = self.read_u16(frame_idx)?;
                    let path_val = self.read_constant(frame_idx, idx)?;
                    let path = self.as_str_bytes(path_val).unwrap_or_default();
                    let path_str = String::from_utf8_lossy(&path).into_owned();
                    let module_ref = crate::module::import(self, &path_str)?;
                    let target = self.current_module(frame_idx);
                    self.import_all_public_members(module_ref, target)?;
                }
                OpCode::ImportNamedMembers => {
                    let idx = self.read_u16(frame_idx)?;
                    let path_val = self.read_constant(frame_idx, idx)?;
                    let name_count = self.read_u8(frame_idx)? as usize;
                    let names = self.stack.split_off(self.stack.len() - name_count);
                    let path = self.as_str_bytes(path_val).unwrap_or_default();
                    let path_str = String::from_utf8_lossy(&path).into_owned();
                    let module_ref = crate::module::import(self, &path_str)?;
                    for name in names {
                        let value = self.get_pub_module_member(module_ref, name)?;
                        self.push(value);
                    }
                }

                OpCode::CloseUpvalue => {
                    let fp = self.frames[frame_idx].fp;
                    let top = self.stack.len() - 1;
                    self.close_upvalues_from(top.max(fp));
                    self.pop()?;
                }
                OpCode::Return => {
                    let result = self.pop()?;
                    self.close_upvalues_from(self.frames[frame_idx].fp);
                    self.unwind_with_stack(self.frames[frame_idx].with_stack_len_on_entry)?;
                    self.stack.truncate(self.frames[frame_idx].fp);
                    self.frames.pop();
                    if self.frames.len() == target_depth {
                        return Ok(result);
                    }
                }
                OpCode::ReturnTuple => {
                    let count = self.read_u8(frame_idx)? as usize;
                    let values = self.stack.split_off(self.stack.len() - count);
                    let tup = self.alloc_tuple(&values)?;
                    self.close_upvalues_from(self.frames[frame_idx].fp);
                    self.unwind_with_stack(self.frames[frame_idx].with_stack_len_on_entry)?;
                    self.stack.truncate(self.frames[frame_idx].fp);
                    self.frames.pop();
                    if self.frames.len() == target_depth {
                        return Ok(tup);
                    }
                    self.push(tup);
                }
            }
        }
    }

    fn binary_op(&mut self, f: impl FnOnce(&mut Self, Value, Value) -> Result<Value, RuntimeError>) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = f(self, a, b)?;
        self.push(r);
        Ok(())
    }

    fn binary_pow(&mut self) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let r = match (a, b) {
            (Value::I64(x), Value::I64(y)) if y >= 0 => Value::I64(x.wrapping_pow(y as u32)),
            (Value::I64(x), Value::I64(y)) => Value::F64((x as f64).powf(y as f64)),
            (Value::I64(x), Value::F64(y)) => Value::F64((x as f64).powf(y)),
            (Value::F64(x), Value::I64(y)) => Value::F64(x.powf(y as f64)),
            (Value::F64(x), Value::F64(y)) => Value::F64(x.powf(y)),
            _ => return Err(self.panic(format!("invalid operand types for '**': '{}' and '{}'", a.type_name(), b.type_name()))),
        };
        self.push(r);
        Ok(())
    }

    fn binary_int_op(&mut self, f: impl FnOnce(i64, i64) -> i64) -> Result<(), RuntimeError> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::I64(x), Value::I64(y)) => {
                self.push(Value::I64(f(x, y)));
                Ok(())
            }
            _ => Err(self.panic(format!("invalid operand types: '{}' and '{}'", a.type_name(), b.type_name()))),
        }
    }

    fn is_err_value(&self, v: Value) -> bool {
        matches!(v, Value::Obj(o) if matches!(o.get().kind, ObjKind::Err(_)))
    }

    fn is_kinda_falsey(&self, v: Value) -> bool {
        if v.is_scalar_kinda_falsey() {
            return true;
        }
        match v {
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Err(_) => true,
                ObjKind::Str(s) => s.bytes.is_empty(),
                _ => false,
            },
            _ => false,
        }
    }

    fn value_as_method_name(&mut self, v: Value) -> Result<String, RuntimeError> {
        self.as_str_bytes(v)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .ok_or_else(|| self.panic("method name constant is not a string"))
    }

    fn do_global_op(&mut self, frame_idx: usize, op: OpCode) -> Result<(), RuntimeError> {
        let idx = self.read_u16(frame_idx)?;
        let name = self.read_constant(frame_idx, idx)?;
        let module = self.current_module(frame_idx);
        match op {
            OpCode::GetGlobal => {
                let v = self.get_module_member(Value::Obj(module), name)?;
                self.push(v);
            }
            OpCode::SetGlobal => {
                let v = self.peek(0)?;
                self.set_module_member(module, name, v)?;
            }
            OpCode::DefinePubGlobal | OpCode::DefinePriGlobal => {
                let v = self.pop()?;
                let is_pub = op == OpCode::DefinePubGlobal;
                self.define_module_member(module, name, v, is_pub);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn define_module_member(&mut self, module: ObjectRef, name: Value, value: Value, is_pub: bool) {
        let hash = self.hash_value(name);
        let ObjKind::Module(m) = &mut module.get_mut().kind else { return };
        let index = m.members.len();
        m.members.push(value);
        m.all_member_indexes.set(name, Value::I64(index as i64), hash, |a, b| a.strict_eq(b));
        if is_pub {
            m.pub_member_indexes.set(name, Value::I64(index as i64), hash, |a, b| a.strict_eq(b));
        }
    }

    fn get_module_member(&mut self, module_val: Value, name: Value) -> Result<Value, RuntimeError> {
        let Value::Obj(module) = module_val else {
            return Err(self.panic("not a module"));
        };
        let hash = self.hash_value(name);
        let ObjKind::Module(m) = &module.get().kind else {
            return Err(self.panic("not a module"));
        };
        let Some(idx) = m.all_member_indexes.get(&name, hash, |a, b| a.strict_eq(b)) else {
            let name_str = self.value_as_method_name(name).unwrap_or_default();
            return Err(self.panic(format!("undefined global variable '{name_str}'")));
        };
        let Value::I64(i) = idx else { unreachable!() };
        Ok(m.members[i as usize])
    }

    /// `import x.y.{*}`: splice every public member of `source` into
    /// `target`'s own globals, panicking on a name already defined there.
    fn import_all_public_members(&mut self, source: ObjectRef, target: ObjectRef) -> Result<(), RuntimeError> {
        let pairs: Vec<(Value, Value)> = {
            let ObjKind::Module(m) = &source.get().kind else {
                return Err(self.panic("not a module"));
            };
            m.pub_member_indexes
                .iter_live()
                .map(|(name, idx)| {
                    let Value::I64(i) = idx else { unreachable!("member index is always an I64") };
                    (name, m.members[i as usize])
                })
                .collect()
        };
        for (name, value) in pairs {
            let hash = self.hash_value(name);
            let clash = {
                let ObjKind::Module(t) = &target.get().kind else {
                    return Err(self.panic("not a module"));
                };
                t.all_member_indexes.get(&name, hash, |a, b| a.strict_eq(b)).is_some()
            };
            if clash {
                let name_str = self.value_as_method_name(name).unwrap_or_default();
                return Err(self.panic(format!("import name clash: '{name_str}' is already defined")));
            }
            self.define_module_member(target, name, value, true);
        }
        Ok(())
    }

    /// `import x.y.{a, b}`: resolve one public member by name, panicking if
    /// it doesn't exist or exists only privately.
    fn get_pub_module_member(&mut self, module: ObjectRef, name: Value) -> Result<Value, RuntimeError> {
        let hash = self.hash_value(name);
        let (is_pub, idx) = {
            let ObjKind::Module(m) = &module.get().kind else {
                return Err(self.panic("not a module"));
            };
            let is_pub = m.pub_member_indexes.get(&name, hash, |a, b| a.strict_eq(b)).is_some();
            (is_pub, m.all_member_indexes.get(&name, hash, |a, b| a.strict_eq(b)))
        };
        let Some(Value::I64(i)) = idx else {
            let name_str = self.value_as_method_name(name).unwrap_or_default();
            return Err(self.panic(format!("module has no member '{name_str}'")));
        };
        if !is_pub {
            let name_str = self.value_as_method_name(name).unwrap_or_default();
            return Err(self.panic(format!("member '{name_str}' is private")));
        }
        let ObjKind::Module(m) = &module.get().kind else {
            unreachable!();
        };
        Ok(m.members[i as usize])
    }

    fn set_module_member(&mut self, module: ObjectRef, name: Value, value: Value) -> Result<(), RuntimeError> {
        let hash = self.hash_value(name);
        let idx = {
            let ObjKind::Module(m) = &module.get().kind else {
                return Err(self.panic("not a module"));
            };
            m.all_member_indexes.get(&name, hash, |a, b| a.strict_eq(b))
        };
        let Some(Value::I64(i)) = idx else {
            return Err(self.panic("undefined global variable"));
        };
        let ObjKind::Module(m) = &mut module.get_mut().kind else { unreachable!() };
        m.members[i as usize] = value;
        Ok(())
    }

    fn do_field_op(&mut self, frame_idx: usize, op: OpCode) -> Result<(), RuntimeError> {
        let idx = self.read_u16(frame_idx)?;
        let name = self.read_constant(frame_idx, idx)?;
        match op {
            OpCode::GetField | OpCode::GetPubField => {
                let receiver = self.pop()?;
                let v = self.get_field(receiver, name)?;
                self.push(v);
            }
            OpCode::SetField | OpCode::SetPubField => {
                let value = self.pop()?;
                let receiver = self.pop()?;
                self.set_field(receiver, name, value)?;
                self.push(value);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn field_index(&mut self, receiver: Value, name: Value) -> Result<usize, RuntimeError> {
        let Value::Obj(o) = receiver else {
            return Err(self.panic(format!("value of type '{}' has no fields", receiver.type_name())));
        };
        let Some(class_ref) = o.get().class else {
            return Err(self.panic("object has no class"));
        };
        let hash = self.hash_value(name);
        let ObjKind::Class(c) = &class_ref.get().kind else {
            return Err(self.panic("invalid class"));
        };
        let Some(Value::I64(i)) = c.all_field_indexes.get(&name, hash, |a, b| a.strict_eq(b)) else {
            let name_str = self.value_as_method_name(name).unwrap_or_default();
            return Err(self.panic(format!("object has no field '{name_str}'")));
        };
        Ok(i as usize)
    }

    fn get_field(&mut self, receiver: Value, name: Value) -> Result<Value, RuntimeError> {
        let idx = self.field_index(receiver, name)?;
        let Value::Obj(o) = receiver else { unreachable!() };
        let ObjKind::Instance(inst) = &o.get().kind else {
            return Err(self.panic("not an instance"));
        };
        Ok(inst.fields[idx])
    }

    fn set_field(&mut self, receiver: Value, name: Value, value: Value) -> Result<(), RuntimeError> {
        let idx = self.field_index(receiver, name)?;
        let Value::Obj(o) = receiver else { unreachable!() };
        let ObjKind::Instance(inst) = &mut o.get_mut().kind else {
            return Err(self.panic("not an instance"));
        };
        inst.fields[idx] = value;
        Ok(())
    }

    fn get_index(&mut self, container: Value, key: Value) -> Result<Value, RuntimeError> {
        if let Value::Obj(o) = container {
            match &o.get().kind {
                ObjKind::Vec(v) => {
                    let Value::I64(i) = key else {
                        return Err(self.panic("index must be an integer"));
                    };
                    return v.values.get(normalize_index(i, v.values.len()))
                        .copied()
                        .ok_or_else(|| self.panic("index out of bounds"));
                }
                ObjKind::Tup(t) => {
                    let Value::I64(i) = key else {
                        return Err(self.panic("index must be an integer"));
                    };
                    return t.values.get(normalize_index(i, t.values.len()))
                        .copied()
                        .ok_or_else(|| self.panic("index out of bounds"));
                }
                ObjKind::Map(m) => {
                    let hash = self.hash_value(key);
                    return m.table.get(&key, hash, |a, b| a.strict_eq(b))
                        .ok_or_else(|| self.panic("key not found"));
                }
                _ => {}
            }
        }
        if let Some(method) = self.lookup_instance_method(container, "$get_index") {
            return crate::call::call_value(self, method, &[key]);
        }
        Err(self.panic(format!("value of type '{}' does not support indexing", container.type_name())))
    }

    fn set_index(&mut self, container: Value, key: Value, value: Value) -> Result<(), RuntimeError> {
        if let Value::Obj(o) = container {
            match &mut o.get_mut().kind {
                ObjKind::Vec(v) => {
                    let Value::I64(i) = key else {
                        return Err(self.panic("index must be an integer"));
                    };
                    let len = v.values.len();
                    let idx = normalize_index(i, len);
                    let Some(slot) = v.values.get_mut(idx) else {
                        return Err(self.panic("index out of bounds"));
                    };
                    *slot = value;
                    return Ok(());
                }
                ObjKind::Map(m) => {
                    let hash = self.hash_value(key);
                    m.table.set(key, value, hash, |a, b| a.strict_eq(b));
                    return Ok(());
                }
                _ => {}
            }
        }
        if let Some(method) = self.lookup_instance_method(container, "$set_index") {
            crate::call::call_value(self, method, &[key, value])?;
            return Ok(());
        }
        Err(self.panic(format!("value of type '{}' does not support indexed assignment", container.type_name())))
    }

    fn do_call_method(&mut self, frame_idx: usize, op: OpCode) -> Result<(), RuntimeError> {
        let idx = self.read_u16(frame_idx)?;
        let name = self.read_constant(frame_idx, idx)?;
        let arg_count = self.read_u8(frame_idx)? as usize;
        let name_str = self.value_as_method_name(name)?;
        let args = self.stack.split_off(self.stack.len() - arg_count);

        let result = if op == OpCode::CallSuperMethod {
            let superclass = self.pop()?;
            let receiver = self.pop()?;
            let Value::Obj(class_ref) = superclass else {
                return Err(self.panic("invalid superclass reference"));
            };
            let Some(method) = self.lookup_method_on_class(class_ref, &name_str) else {
                return Err(self.panic(format!("superclass has no method '{name_str}'")));
            };
            crate::call::call_value(self, method, &{
                let mut v = Vec::with_capacity(args.len() + 1);
                v.push(receiver);
                v.extend_from_slice(&args);
                v
            })
        } else {
            let receiver = self.pop()?;
            crate::call::call_method(self, receiver, &name_str, &args)
        }?;
        self.push(result);
        Ok(())
    }

    fn do_call_value(&mut self, arg_count: usize) -> Result<(), RuntimeError> {
        let args = self.stack.split_off(self.stack.len() - arg_count);
        let callee = self.pop()?;
        let result = crate::call::call_value(self, callee, &args)?;
        self.push(result);
        Ok(())
    }

    fn do_call_value_with_unpack(&mut self, arg_count: usize) -> Result<(), RuntimeError> {
        let args = self.stack.split_off(self.stack.len() - arg_count);
        let args = self.spread_last(args)?;
        let callee = self.pop()?;
        let result = crate::call::call_value(self, callee, &args)?;
        self.push(result);
        Ok(())
    }

    fn do_call_method_with_unpack(&mut self, frame_idx: usize, op: OpCode) -> Result<(), RuntimeError> {
        let idx = self.read_u16(frame_idx)?;
        let name = self.read_constant(frame_idx, idx)?;
        let arg_count = self.read_u8(frame_idx)? as usize;
        let name_str = self.value_as_method_name(name)?;
        let args = self.stack.split_off(self.stack.len() - arg_count);
        let args = self.spread_last(args)?;

        let result = if op == OpCode::CallSuperMethodWithUnpack {
            let superclass = self.pop()?;
            let receiver = self.pop()?;
            let Value::Obj(class_ref) = superclass else {
                return Err(self.panic("invalid superclass reference"));
            };
            let Some(method) = self.lookup_method_on_class(class_ref, &name_str) else {
                return Err(self.panic(format!("superclass has no method '{name_str}'")));
            };
            crate::call::call_value(self, method, &{
                let mut v = Vec::with_capacity(args.len() + 1);
                v.push(receiver);
                v.extend_from_slice(&args);
                v
            })
        } else {
            let receiver = self.pop()?;
            crate::call::call_method(self, receiver, &name_str, &args)
        }?;
        self.push(result);
        Ok(())
    }

    /// Pop the trailing `Vec`/`Tup` argument and splice its elements onto the
    /// end of `args` (the `f(a, b, *rest)` call form, spec §4.10).
    fn spread_last(&mut self, mut args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
        let Some(last) = args.pop() else {
            return Err(self.panic("unpacking call requires at least one argument"));
        };
        let extra = match last {
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Vec(v) => v.values.clone(),
                ObjKind::Tup(t) => t.values.to_vec(),
                other => return Err(self.panic(format!("cannot unpack value of type '{}'", other.name()))),
            },
            other => return Err(self.panic(format!("cannot unpack value of type '{}'", other.type_name()))),
        };
        if args.len() + extra.len() > u8::MAX as usize {
            return Err(self.panic("too many arguments after unpacking"));
        }
        args.extend(extra);
        Ok(args)
    }

    fn do_make_closure(&mut self, frame_idx: usize, op: OpCode) -> Result<(), RuntimeError> {
        let const_idx = self.read_u16(frame_idx)?;
        let function_val = self.read_constant(frame_idx, const_idx)?;
        let Some(function_ref) = function_val.as_obj() else {
            return Err(self.panic("invalid function constant"));
        };
        let defaults = if op == OpCode::MakeClosureWithDefArgs {
            let n = self.read_u16(frame_idx)? as usize;
            self.stack.split_off(self.stack.len() - n)
        } else {
            Vec::new()
        };

        let upvalue_count = match &function_ref.get().kind {
            ObjKind::Function(f) => f.function.upvalue_count as usize,
            _ => return Err(self.panic("invalid function constant")),
        };
        let mut upvalues = Vec::with_capacity(upvalue_count);
        for _ in 0..upvalue_count {
            let is_local = self.read_u8(frame_idx)? != 0;
            let index = self.read_u8(frame_idx)? as usize;
            if is_local {
                let fp = self.frames[frame_idx].fp;
                upvalues.push(self.capture_upvalue(fp + index));
            } else {
                let ObjKind::Closure(c) = &self.frames[frame_idx].closure.get().kind else {
                    unreachable!()
                };
                upvalues.push(c.upvalues[index]);
            }
        }

        let module = self.current_module(frame_idx);
        let closure = self.gc.alloc(None, ObjKind::Closure(ClosureObj { function: function_ref, module, defaults, upvalues }));
        self.push(Value::Obj(closure));
        Ok(())
    }

    fn do_inherit(&mut self, subclass: Value, superclass: Value) -> Result<(), RuntimeError> {
        let (Value::Obj(sub), Value::Obj(sup)) = (subclass, superclass) else {
            return Err(self.panic("superclass must be a class"));
        };
        if !matches!(sup.get().kind, ObjKind::Class(_)) {
            return Err(self.panic("superclass must be a class"));
        }
        let ObjKind::Class(subc) = &mut sub.get_mut().kind else {
            return Err(self.panic("not a class"));
        };
        subc.superclass = Some(sup);
        Ok(())
    }

    fn do_define_method(&mut self, frame_idx: usize, op: OpCode) -> Result<(), RuntimeError> {
        let idx = self.read_u16(frame_idx)?;
        let name = self.read_constant(frame_idx, idx)?;
        let method = self.pop()?;
        let class_val = self.peek(0)?;
        let Value::Obj(class_ref) = class_val else {
            return Err(self.panic("not a class"));
        };
        let hash = self.hash_value(name);
        let ObjKind::Class(c) = &mut class_ref.get_mut().kind else {
            return Err(self.panic("not a class"));
        };
        match op {
            OpCode::DefinePubMethod => {
                c.all_instance_methods.set(name, method, hash, |a, b| a.strict_eq(b));
                c.pub_instance_methods.set(name, method, hash, |a, b| a.strict_eq(b));
            }
            OpCode::DefinePriMethod => {
                c.all_instance_methods.set(name, method, hash, |a, b| a.strict_eq(b));
            }
            OpCode::DefineStaticMethod => {
                c.static_methods.set(name, method, hash, |a, b| a.strict_eq(b));
            }
            _ => unreachable!(),
        }
        if self.constant_names_init(name) {
            let ObjKind::Class(c) = &mut class_ref.get_mut().kind else { unreachable!() };
            c.init_method = Some(method);
        }
        Ok(())
    }

    fn constant_names_init(&self, name: Value) -> bool {
        matches!(name, Value::Obj(o) if matches!(&o.get().kind, ObjKind::Str(s) if s.as_str() == "$init"))
    }

    fn do_define_field(&mut self, frame_idx: usize, op: OpCode) -> Result<(), RuntimeError> {
        let idx = self.read_u16(frame_idx)?;
        let name = self.read_constant(frame_idx, idx)?;
        let default_value = self.pop()?;
        let class_val = self.peek(0)?;
        let Value::Obj(class_ref) = class_val else {
            return Err(self.panic("not a class"));
        };
        let hash = self.hash_value(name);
        let ObjKind::Class(c) = &mut class_ref.get_mut().kind else {
            return Err(self.panic("not a class"));
        };
        match op {
            OpCode::DefineStaticField => {
                c.static_fields.set(name, default_value, hash, |a, b| a.strict_eq(b));
            }
            OpCode::DefinePubField | OpCode::DefinePriField => {
                let index = c.default_field_values.len();
                c.default_field_values.push(default_value);
                c.all_field_indexes.set(name, Value::I64(index as i64), hash, |a, b| a.strict_eq(b));
                if op == OpCode::DefinePubField {
                    c.pub_field_indexes.set(name, Value::I64(index as i64), hash, |a, b| a.strict_eq(b));
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn get_iterator(&mut self, v: Value) -> Result<Value, RuntimeError> {
        if let Value::Obj(o) = v {
            if matches!(o.get().kind, ObjKind::Iter(_)) {
                return Ok(v);
            }
        }
        let kind = match v {
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Vec(_) => Some(IterObj { kind: crate::iterator::IterKind::Vec(o, 0) }),
                ObjKind::Tup(_) => Some(IterObj { kind: crate::iterator::IterKind::Tup(o, 0) }),
                ObjKind::Str(_) => Some(IterObj { kind: crate::iterator::IterKind::Str(o, 0) }),
                ObjKind::Map(_) => Some(IterObj { kind: crate::iterator::IterKind::MapEntries(o, 0) }),
                ObjKind::Queue(q) => Some(IterObj { kind: crate::iterator::IterKind::Queue(q.head) }),
                _ => None,
            },
            _ => None,
        };
        if let Some(k) = kind {
            return Ok(Value::Obj(self.gc.alloc(None, ObjKind::Iter(k))));
        }
        if let Some(method) = self.lookup_instance_method(v, "$iter") {
            return crate::call::call_value(self, method, &[]);
        }
        Err(self.panic(format!("value of type '{}' is not iterable", v.type_name())))
    }

    fn do_unpack(&mut self, v: Value, count: usize) -> Result<(), RuntimeError> {
        let values = match v {
            Value::Obj(o) => match &o.get().kind {
                ObjKind::Tup(t) => t.values.to_vec(),
                ObjKind::Vec(vec) => vec.values.clone(),
                _ => return Err(self.panic("value cannot be unpacked")),
            },
            _ => return Err(self.panic("value cannot be unpacked")),
        };
        if values.len() != count {
            return Err(self.panic(format!("expected {count} values to unpack, found {}", values.len())));
        }
        for v in values {
            self.push(v);
        }
        Ok(())
    }
}

fn normalize_index(i: i64, len: usize) -> usize {
    if i < 0 {
        (len as i64 + i).max(0) as usize
    } else {
        i as usize
    }
}

fn contains_subslice(hay: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    hay.windows(needle.len()).any(|w| w == needle)
}

fn str_matches(obj: ObjectRef, s: &str) -> bool {
    matches!(&obj.get().kind, ObjKind::Str(st) if st.as_str() == s)
}

fn key_matches(key: &Value, name: &str) -> bool {
    matches!(key, Value::Obj(o) if str_matches(*o, name))
}
