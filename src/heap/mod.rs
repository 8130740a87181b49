// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! The heap object model.
//!
//! Every heap object carries a link to the next object in the VM's global
//! object list (used for sweep), an optional reference to its class, a type
//! tag from a closed set of kinds, and a GC mark bit. This module defines
//! that header plus the payload of every object kind; allocation and the
//! mark/sweep algorithm itself live in [`crate::gc`].
//!
//! Objects are heap-allocated with `Box` and tracked through raw,
//! non-owning [`ObjectRef`] handles so the object graph can contain cycles.
//! Ownership is expressed structurally instead: the VM's object list (a
//! singly linked list threaded through [`Obj::next`]) is the *only* owner,
//! and sweep is the *only* place a `Box` is reconstituted and dropped. Every
//! other place in the runtime treats `ObjectRef` as a borrowed, GC-rooted
//! pointer.

#[cfg(test)]
mod heap_test;

mod objects;

pub use objects::{
    BoundMethodObj, BufObj, ClassObj, ClosureObj, ErrObj, FileObj, FunctionObj, InstanceObj,
    IterObj, MapObj, ModuleObj, NativeFn, NativeFnObj, QueueNodeObj, QueueObj, ResourcePointerObj,
    StrObj, TupObj, UpvalueObj, UpvalueState, VecObj,
};

use crate::value::Value;
use core::cell::Cell;
use core::fmt;
use core::ptr::NonNull;

/// A non-owning, GC-rooted reference to a heap object.
///
/// Equality is pointer identity, matching the specification's reference
/// equality for interned strings and every other heap type.
#[derive(Clone, Copy)]
pub struct ObjectRef(NonNull<Obj>);

impl ObjectRef {
    /// Wrap a raw, newly-boxed object pointer.
    ///
    /// # Safety
    /// `ptr` must point to a live `Obj` that the caller (the allocator) has
    /// linked into the VM's object list, and it must remain valid for as
    /// long as any `ObjectRef` referring to it survives.
    #[must_use]
    pub(crate) unsafe fn from_non_null(ptr: NonNull<Obj>) -> Self {
        Self(ptr)
    }

    #[must_use]
    pub(crate) fn as_ptr(&self) -> *mut Obj {
        self.0.as_ptr()
    }

    /// Borrow the object.
    ///
    /// # Safety
    /// The object must not have been swept. The VM upholds this by only
    /// sweeping objects that failed to mark during the current collection,
    /// and by rooting every reachable `ObjectRef` before collecting.
    #[must_use]
    pub fn get(&self) -> &Obj {
        // SAFETY: see method docs; callers only hold `ObjectRef`s to rooted
        // or otherwise-reachable objects while a collection could run.
        unsafe { self.0.as_ref() }
    }

    #[must_use]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn get_mut(&self) -> &mut Obj {
        // SAFETY: the VM is single-threaded and never holds two live
        // mutable borrows of the same object across a call boundary.
        unsafe { &mut *self.0.as_ptr() }
    }

    #[must_use]
    pub fn same_object(&self, other: &Self) -> bool {
        core::ptr::eq(self.as_ptr(), other.as_ptr())
    }

    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.get().kind.name()
    }

    #[must_use]
    pub fn value(self) -> Value {
        Value::Obj(self)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}:{}", self.as_ptr(), self.kind_name())
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.same_object(other)
    }
}
impl Eq for ObjectRef {}

/// The object header shared by every heap object, plus its payload.
pub struct Obj {
    /// Link to the next object in the VM's global object list (sweep order).
    pub next: Option<ObjectRef>,
    /// The object's class, if any (instances, and builtins wired at bootstrap).
    pub class: Option<ObjectRef>,
    /// GC mark bit.
    pub marked: Cell<bool>,
    /// The closed set of object kinds and their state.
    pub kind: ObjKind,
}

/// The closed set of heap object kinds (spec §3.2).
pub enum ObjKind {
    Str(StrObj),
    Buf(BufObj),
    Tup(TupObj),
    Vec(VecObj),
    Map(objects::MapObj),
    Closure(ClosureObj),
    Function(FunctionObj),
    NativeFn(NativeFnObj),
    BoundMethod(BoundMethodObj),
    Class(ClassObj),
    Instance(InstanceObj),
    Module(ModuleObj),
    Iter(IterObj),
    Queue(QueueObj),
    QueueNode(QueueNodeObj),
    Upvalue(UpvalueObj),
    File(FileObj),
    Err(ErrObj),
    ResourcePointer(ResourcePointerObj),
}

impl ObjKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Str(_) => "str",
            Self::Buf(_) => "buf",
            Self::Tup(_) => "tup",
            Self::Vec(_) => "vec",
            Self::Map(m) => {
                if m.is_set {
                    "set"
                } else {
                    "map"
                }
            }
            Self::Closure(_) => "closure",
            Self::Function(_) => "fn",
            Self::NativeFn(_) => "native fn",
            Self::BoundMethod(_) => "bound method",
            Self::Class(_) => "class",
            Self::Instance(_) => "instance",
            Self::Module(_) => "module",
            Self::Iter(_) => "iter",
            Self::Queue(_) => "queue",
            Self::QueueNode(_) => "queue node",
            Self::Upvalue(_) => "upvalue",
            Self::File(_) => "file",
            Self::Err(_) => "err",
            Self::ResourcePointer(_) => "resource pointer",
        }
    }

    /// Push every directly-referenced child object/value onto the grey
    /// stack. Called once per reachable object during the mark phase.
    ///
    /// The `Map`-as-WeakRef variant (the intern pool) deliberately blackens
    /// nothing, so unreferenced interned strings fall out of the pool.
    pub(crate) fn blacken(&self, grey: &mut Vec<ObjectRef>, values: &mut Vec<Value>) {
        match self {
            Self::Str(_) | Self::Buf(_) | Self::NativeFn(_) | Self::ResourcePointer(_) => {}
            Self::Tup(t) => values.extend_from_slice(&t.values),
            Self::Vec(v) => values.extend_from_slice(&v.values),
            Self::Map(m) => {
                if !m.is_weak {
                    for (k, v) in m.table.iter_live() {
                        values.push(k);
                        values.push(v);
                    }
                }
            }
            Self::Closure(c) => {
                grey.push(c.function);
                grey.push(c.module);
                values.extend_from_slice(&c.defaults);
                for uv in &c.upvalues {
                    grey.push(*uv);
                }
            }
            Self::Function(f) => {
                values.extend_from_slice(&f.function.constants);
                if let Some(n) = f.name {
                    grey.push(n);
                }
                if let Some(s) = f.source_id {
                    grey.push(s);
                }
            }
            Self::BoundMethod(b) => {
                values.push(b.receiver);
                grey.push(b.callable);
            }
            Self::Class(c) => {
                if let Some(sup) = c.superclass {
                    grey.push(sup);
                }
                grey.push(c.name);
                for (k, v) in c.all_instance_methods.iter_live() {
                    values.push(k);
                    values.push(v);
                }
                for (k, v) in c.all_field_indexes.iter_live() {
                    values.push(k);
                    values.push(v);
                }
                for (k, v) in c.static_methods.iter_live() {
                    values.push(k);
                    values.push(v);
                }
                for (k, v) in c.static_fields.iter_live() {
                    values.push(k);
                    values.push(v);
                }
                values.extend_from_slice(&c.default_field_values);
                if let Some(init) = c.init_method {
                    values.push(init);
                }
                if let Some((name, val)) = c.method_cache.get() {
                    grey.push(name);
                    values.push(val);
                }
            }
            Self::Instance(i) => values.extend_from_slice(&i.fields),
            Self::Module(m) => {
                for (k, v) in m.submodules.iter_live() {
                    values.push(k);
                    values.push(v);
                }
                values.extend_from_slice(&m.members);
            }
            Self::Iter(it) => it.kind.blacken(grey, values),
            Self::Queue(q) => {
                if let Some(h) = q.head {
                    grey.push(h);
                }
                if let Some(t) = q.tail {
                    grey.push(t);
                }
            }
            Self::QueueNode(n) => {
                values.push(n.value);
                if let Some(next) = n.next {
                    grey.push(next);
                }
            }
            Self::Upvalue(u) => {
                if let UpvalueState::Closed(v) = u.state {
                    values.push(v);
                }
            }
            Self::File(f) => {
                if let Some(p) = f.path {
                    grey.push(p);
                }
            }
            Self::Err(e) => {
                grey.push(e.message);
                for (k, v) in e.details.iter_live() {
                    values.push(k);
                    values.push(v);
                }
            }
        }
    }
}
