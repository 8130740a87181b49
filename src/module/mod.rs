// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! The module loader (spec §4.11).
//!
//! Resolves a dotted import path (`foo.bar.baz`) against the host
//! filesystem (behind the [`crate::platform::Filesystem`] trait boundary)
//! or an embedder-supplied [`crate::platform::StdlibSource`], caches loaded
//! submodules on their parent [`crate::heap::ModuleObj`], and guards
//! against cyclic imports by tracking modules currently mid-load.

#[cfg(test)]
mod module_test;

use crate::heap::{ModuleObj, ObjectRef};
use crate::platform::{Filesystem, StdlibSource};
use crate::vm::{RuntimeError, Vm};

/// Split a dotted import path into its segments: `"a.b.c"` -> `["a", "b", "c"]`.
#[must_use]
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

/// Resolve a dotted import path to source bytes, trying (in order) the
/// configured [`StdlibSource`], then the filesystem relative to each entry
/// in `search_paths`.
///
/// # Errors
/// Returns a human-readable message if no source produces the module and
/// the filesystem path doesn't exist either.
pub fn resolve_source(
    path: &str,
    fs: &dyn Filesystem,
    stdlib: &dyn StdlibSource,
    search_paths: &[String],
) -> Result<Vec<u8>, String> {
    if let Some(src) = stdlib.source_for(path) {
        return Ok(src);
    }

    let segments = split_path(path);
    let relative = segments.join("/") + ".crucible";

    for base in search_paths {
        let candidate = fs.join(base, &relative);
        if fs.is_file(&candidate) {
            return fs.read_file(&candidate);
        }
        // Package form: `a/b/mod.crucible`.
        let package_candidate = fs.join(&fs.join(base, &segments.join("/")), "mod.crucible");
        if fs.is_file(&package_candidate) {
            return fs.read_file(&package_candidate);
        }
    }

    Err(format!("module not found: {path}"))
}

/// Import `path` into the VM, returning the (possibly cached) module
/// object. Recurses one segment at a time so `a.b.c` caches `a`, `a.b`, and
/// `a.b.c` each exactly once, as submodules of one another.
///
/// Per spec §4.11 step 2, a freshly-created module is installed at its
/// prefix *before* its body runs. This is what makes an import cycle
/// terminate instead of recursing forever: when `a`'s body (indirectly)
/// re-imports `a`, the lookup above finds the already-installed
/// (still-empty) module and returns it immediately rather than reloading —
/// any attempt to read a not-yet-defined member off it then fails with an
/// ordinary "missing member" panic (spec §8 scenario 7), not a dedicated
/// cycle error. If the body panics or exits, step 5 undoes the
/// installation so a later, non-cyclic retry can still succeed.
///
/// # Errors
/// Propagates a panic-flavored [`RuntimeError`] for a missing source, a
/// compile failure, or a panic/exit raised by the module body itself.
pub fn import(vm: &mut Vm, path: &str) -> Result<ObjectRef, RuntimeError> {
    let segments = split_path(path);
    if segments.is_empty() {
        return Err(vm.panic("empty import path"));
    }

    let mut parent: Option<ObjectRef> = None;
    let mut built_path = String::new();

    for seg in &segments {
        if !built_path.is_empty() {
            built_path.push('.');
        }
        built_path.push_str(seg);

        if let Some(existing) = lookup_submodule(parent, vm.root_modules(), seg) {
            parent = Some(existing);
            continue;
        }

        let module_ref = vm.alloc_empty_module();
        if let Some(p) = parent {
            vm.register_submodule(p, seg, module_ref);
        } else {
            vm.register_root_module(seg, module_ref);
        }

        if let Err(e) = vm.run_module_body_into(&built_path, module_ref) {
            if let Some(p) = parent {
                vm.unregister_submodule(p, seg);
            } else {
                vm.unregister_root_module(seg);
            }
            return Err(e);
        }

        parent = Some(module_ref);
    }

    Ok(parent.expect("at least one segment was processed"))
}

fn lookup_submodule(parent: Option<ObjectRef>, roots: &crate::table::Table, seg: &str) -> Option<ObjectRef> {
    match parent {
        Some(p) => {
            let crate::heap::ObjKind::Module(m) = &p.get().kind else {
                return None;
            };
            submodule_of(m, seg)
        }
        None => root_submodule(roots, seg),
    }
}

fn submodule_of(m: &ModuleObj, seg: &str) -> Option<ObjectRef> {
    use crate::strings::fnv1a;
    let hash = fnv1a(seg.as_bytes());
    m.submodules
        .get(&crate::value::Value::Null, hash, |k, _| match k {
            crate::value::Value::Obj(o) => match &o.get().kind {
                crate::heap::ObjKind::Str(s) => s.as_str() == seg,
                _ => false,
            },
            _ => false,
        })
        .and_then(|v| v.as_obj())
}

fn root_submodule(roots: &crate::table::Table, seg: &str) -> Option<ObjectRef> {
    use crate::strings::fnv1a;
    let hash = fnv1a(seg.as_bytes());
    roots
        .get(&crate::value::Value::Null, hash, |k, _| match k {
            crate::value::Value::Obj(o) => match &o.get().kind {
                crate::heap::ObjKind::Str(s) => s.as_str() == seg,
                _ => false,
            },
            _ => false,
        })
        .and_then(|v| v.as_obj())
}

