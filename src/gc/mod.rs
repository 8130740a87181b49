// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! Allocation and the tri-color mark-and-sweep collector (spec §4.4).
//!
//! The collector is non-moving and runs over a singly linked list threaded
//! through every [`Obj`]'s `next` field — [`Gc`] is the list's sole owner.
//! Collection has two phases: **mark**, which walks outward from an
//! explicit root set pushed onto a grey stack until it drains, and
//! **sweep**, which walks the object list once, freeing anything left
//! unmarked and clearing the mark bit on everything that survives.
//!
//! `Gc` does not know how to find its own roots — the VM's value stack,
//! call frames, open upvalues, and loaded modules are all its business, not
//! this module's. Callers pass roots in explicitly to [`Gc::collect`].

#[cfg(test)]
mod gc_test;

use crate::alloc_shim::AllocShim;
use crate::heap::{Obj, ObjKind, ObjectRef};
use crate::value::Value;
use core::cell::Cell;
use core::mem::size_of_val;
use core::ptr::NonNull;
use log::{debug, trace};

/// Multiplier applied to `bytes_in_use` at the end of a collection to pick
/// the next collection threshold (spec default: 2x).
const DEFAULT_GROW_FACTOR: usize = 2;

/// Starting threshold before any allocation has happened, chosen so a fresh
/// VM doesn't collect on its first few bootstrap allocations.
const INITIAL_THRESHOLD: usize = 1 << 20;

/// RAII guard that disallows collection for as long as it's alive. Used
/// while assembling a heap object out of several intermediate, possibly
/// unrooted allocations (for example: building a `Tup`'s element array
/// before the `Tup` object itself exists to root them).
///
/// Holds a raw pointer to the owning [`Gc`]'s `disallows` counter rather
/// than a borrow of the whole `Gc`, specifically so the holder can still
/// call `&mut self` methods like [`Gc::alloc`] on the same `Gc` while the
/// guard is alive — that's the entire point of a guard meant to span
/// several further allocations.
#[must_use]
pub struct GcGuard<'a> {
    disallows: NonNull<Cell<u32>>,
    _marker: core::marker::PhantomData<&'a Cell<u32>>,
}

impl Drop for GcGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the pointer was taken from a live `&Cell<u32>` field of a
        // `Gc` that outlives `'a`; nothing else frees that field early.
        let cell = unsafe { self.disallows.as_ref() };
        let n = cell.get();
        debug_assert!(n > 0, "GcGuard dropped with disallows already at zero");
        cell.set(n.saturating_sub(1));
    }
}

/// Owns the object list, the allocation byte accounting, and the
/// mark/sweep state between collections.
pub struct Gc {
    objects: Option<ObjectRef>,
    shim: AllocShim,
    threshold: usize,
    grow_factor: usize,
    /// Collections are skipped while this is non-zero; see [`GcGuard`].
    disallows: Cell<u32>,
    /// Collect before every single allocation, for shaking out rooting bugs.
    stress_mode: bool,
    grey: Vec<ObjectRef>,
}

impl Default for Gc {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Gc {
    #[must_use]
    pub fn new(byte_cap: Option<usize>) -> Self {
        Self {
            objects: None,
            shim: AllocShim::new(byte_cap),
            threshold: INITIAL_THRESHOLD,
            grow_factor: DEFAULT_GROW_FACTOR,
            disallows: Cell::new(0),
            stress_mode: false,
            grey: Vec::new(),
        }
    }

    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        self.shim.bytes_in_use()
    }

    #[must_use]
    pub fn memory_failure(&self) -> bool {
        self.shim.memory_failure()
    }

    pub fn clear_memory_failure(&mut self) {
        self.shim.clear_memory_failure();
    }

    pub fn set_byte_cap(&mut self, cap: Option<usize>) {
        self.shim.set_cap(cap);
    }

    /// Enable or disable single-step debug collection (spec §4.4, debug
    /// mode): when set, every allocation triggers a collection first.
    pub fn set_stress_mode(&mut self, enabled: bool) {
        self.stress_mode = enabled;
    }

    #[must_use]
    pub fn disallow(&self) -> GcGuard<'_> {
        self.disallows.set(self.disallows.get() + 1);
        GcGuard {
            disallows: NonNull::from(&self.disallows),
            _marker: core::marker::PhantomData,
        }
    }

    #[must_use]
    fn collection_allowed(&self) -> bool {
        self.disallows.get() == 0
    }

    /// `true` if the caller should run a collection (via
    /// [`Gc::collect`]) before performing the next allocation.
    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.collection_allowed() && (self.stress_mode || self.shim.over_threshold(self.threshold))
    }

    /// Allocate a new heap object of `kind`, optionally bound to `class`,
    /// and link it at the head of the object list.
    ///
    /// Accounting is approximate: it charges the `size_of` the `Obj`
    /// header plus payload, which undercounts objects that additionally own
    /// heap buffers (`Vec<Value>`, `Box<[u8]>`, ...). This mirrors the
    /// spec's "objects charge their own header size" rule and keeps
    /// threshold growth proportional to allocation rate without needing a
    /// custom allocator.
    pub fn alloc(&mut self, class: Option<ObjectRef>, kind: ObjKind) -> ObjectRef {
        let obj = Box::new(Obj {
            next: self.objects,
            class,
            marked: Cell::new(false),
            kind,
        });
        let size = size_of_val(&*obj);
        self.shim.reserve(size);

        let raw = Box::into_raw(obj);
        // SAFETY: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(raw) };
        // SAFETY: `ptr` was just boxed above and is linked into `self.objects`
        // below, making `self` its sole owner until swept.
        let obj_ref = unsafe { ObjectRef::from_non_null(ptr) };
        self.objects = Some(obj_ref);
        trace!(target: "crucible::gc", "allocated {} ({size} bytes)", obj_ref.kind_name());
        obj_ref
    }

    /// Run a full mark-and-sweep collection.
    ///
    /// `value_roots` and `object_roots` are every root the caller currently
    /// knows about (value stack, constant pools reachable without walking
    /// functions again, call-frame locals expressed as slice, etc).
    /// Weak collections (the string intern pool) must NOT be passed here —
    /// they are swept separately by the caller after this returns, using
    /// [`Obj::marked`] to decide which entries survived.
    ///
    /// No-op if a [`GcGuard`] is currently held.
    pub fn collect(&mut self, value_roots: &[Value], object_roots: &[ObjectRef]) {
        if !self.collection_allowed() {
            return;
        }
        debug!(target: "crucible::gc", "collection start, {} bytes in use", self.shim.bytes_in_use());
        self.mark_phase(value_roots, object_roots);
        self.sweep();
        self.threshold = self.shim.bytes_in_use().saturating_mul(self.grow_factor).max(INITIAL_THRESHOLD);
        debug!(target: "crucible::gc", "collection end, {} bytes in use, next threshold {}", self.shim.bytes_in_use(), self.threshold);
    }

    fn mark_object(&mut self, obj_ref: ObjectRef) {
        let obj = obj_ref.get();
        if obj.marked.replace(true) {
            return;
        }
        if let Some(class) = obj.class {
            self.grey.push(class);
        }
        self.grey.push(obj_ref);
    }

    fn sweep(&mut self) {
        let mut survivors: Option<ObjectRef> = None;
        let mut cursor = self.objects.take();
        while let Some(obj_ref) = cursor {
            let next = obj_ref.get().next;
            cursor = next;
            if obj_ref.get().marked.replace(false) {
                obj_ref.get_mut().next = survivors;
                survivors = Some(obj_ref);
            } else {
                // SAFETY: unmarked at the end of a full mark phase means
                // unreachable from every root we were given; `alloc` is the
                // only other place a `Box` pointing at this address exists,
                // and it was moved into the object list at allocation time.
                let reclaimed = unsafe { Box::from_raw(obj_ref.as_ptr()) };
                let size = size_of_val(&*reclaimed);
                self.shim.release(size);
                trace!(target: "crucible::gc", "swept {}", reclaimed.kind.name());
                drop(reclaimed);
            }
        }
        self.objects = survivors;
    }

    /// Iterate every live object, for the weak intern-pool sweep: entries
    /// whose value object didn't survive (mark bit false, but note the
    /// sweep above already cleared survivors' bits back to `false` as part
    /// of normal bookkeeping) must be identified *during* `collect`, before
    /// sweep clears marks. Callers needing weak-map semantics should use
    /// [`Gc::collect_with_weak_sweep`] instead of calling `collect` +
    /// inspecting marks afterward.
    pub fn objects_head(&self) -> Option<ObjectRef> {
        self.objects
    }

    /// Run mark, give `weak_sweep` a chance to drop entries whose object did
    /// not mark, then sweep.
    pub fn collect_with_weak_sweep(
        &mut self,
        value_roots: &[Value],
        object_roots: &[ObjectRef],
        weak_sweep: impl FnOnce(),
    ) {
        if !self.collection_allowed() {
            return;
        }
        self.mark_phase(value_roots, object_roots);
        weak_sweep();
        self.sweep();
        self.threshold = self.shim.bytes_in_use().saturating_mul(self.grow_factor).max(INITIAL_THRESHOLD);
    }

    fn mark_phase(&mut self, value_roots: &[Value], object_roots: &[ObjectRef]) {
        self.grey.clear();
        for v in value_roots {
            if let Value::Obj(o) = v {
                self.mark_object(*o);
            }
        }
        for o in object_roots {
            self.mark_object(*o);
        }
        let mut values_scratch = Vec::new();
        while let Some(obj_ref) = self.grey.pop() {
            values_scratch.clear();
            let mut local_grey = core::mem::take(&mut self.grey);
            obj_ref.get().kind.blacken(&mut local_grey, &mut values_scratch);
            self.grey = local_grey;
            for v in &values_scratch {
                if let Value::Obj(o) = v {
                    self.mark_object(*o);
                }
            }
        }
    }
}

impl Drop for Gc {
    fn drop(&mut self) {
        let mut cursor = self.objects.take();
        while let Some(obj_ref) = cursor {
            cursor = obj_ref.get().next;
            // SAFETY: `Gc` is the sole owner of every object in this list.
            unsafe {
                drop(Box::from_raw(obj_ref.as_ptr()));
            }
        }
    }
}
