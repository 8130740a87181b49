// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! Call mechanics (spec §4.9).
//!
//! Everything that can end up in a call-expression position funnels through
//! [`call_value`]: closures, compiled functions wrapped in a closure, native
//! functions, classes (instantiation), bound methods, and instances with a
//! `$call` method. Arity checking, variadic packing, and default-argument
//! filling all happen here, once, rather than being duplicated per callable
//! kind.
//!
//! Every closure frame reserves local slot 0 for the receiver: `self` for a
//! method call, or an unused placeholder (`Null`) for a plain function
//! call. Declared arity never counts that slot — it is supplied
//! separately from `args` throughout this module.


use crate::heap::{ClosureObj, NativeFnObj, ObjKind, ObjectRef};
use crate::value::Value;
use crate::vm::{RuntimeError, Vm};

/// Dispatch a call: `callee(args[0], args[1], ...)`.
///
/// `callee` and `args` are values already evaluated; this does not touch the
/// VM's operand stack directly, so it can be reused both from the bytecode
/// dispatch loop (which passes a stack slice) and from native code calling
/// back into the interpreter (iterator combinators, `Iter.join`, `$call`
/// fallbacks, and so on).
///
/// # Errors
/// Returns a panic-flavored [`RuntimeError`] for arity mismatches, an
/// uncallable value, or any error propagated from the callee itself.
pub fn call_value(vm: &mut Vm, callee: Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let Value::Obj(obj) = callee else {
        return Err(vm.panic(format!("value of type '{}' is not callable", callee.type_name())));
    };

    enum Dispatch {
        Closure(ObjectRef),
        NativeFn(ObjectRef),
        BoundMethod(Value, ObjectRef),
        Class(ObjectRef),
        Instance(ObjectRef),
        Uncallable(&'static str),
    }

    let dispatch = match &obj.get().kind {
        ObjKind::Closure(_) => Dispatch::Closure(obj),
        ObjKind::NativeFn(_) => Dispatch::NativeFn(obj),
        ObjKind::BoundMethod(b) => Dispatch::BoundMethod(b.receiver, b.callable),
        ObjKind::Class(_) => Dispatch::Class(obj),
        ObjKind::Instance(_) => Dispatch::Instance(obj),
        other => Dispatch::Uncallable(other.name()),
    };

    match dispatch {
        Dispatch::Closure(c) => call_closure(vm, c, Value::Null, args),
        Dispatch::NativeFn(f) => call_native(vm, f, args),
        Dispatch::BoundMethod(receiver, method) => call_with_self(vm, method, receiver, args),
        Dispatch::Class(class_ref) => call_class(vm, class_ref, args),
        Dispatch::Instance(instance_ref) => {
            let Some(class_ref) = instance_ref.get().class else {
                return Err(vm.panic("object is not callable"));
            };
            let Some(method) = vm.lookup_method_on_class(class_ref, "$call") else {
                return Err(vm.panic("object is not callable"));
            };
            call_with_self(vm, method, Value::Obj(instance_ref), args)
        }
        Dispatch::Uncallable(kind) => Err(vm.panic(format!("value of type '{kind}' is not callable"))),
    }
}

/// Call `method` (a raw closure or native fn, never a `BoundMethod`) with
/// `receiver` bound to local slot 0 / prefixed onto the native argument
/// list.
fn call_with_self(vm: &mut Vm, method: ObjectRef, receiver: Value, args: &[Value]) -> Result<Value, RuntimeError> {
    match &method.get().kind {
        ObjKind::Closure(_) => call_closure(vm, method, receiver, args),
        ObjKind::NativeFn(_) => {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(receiver);
            full.extend_from_slice(args);
            call_native(vm, method, &full)
        }
        _ => Err(vm.panic("invalid method type")),
    }
}

/// Resolve and call `receiver.name(args...)`.
///
/// # Errors
/// Returns a panic if `receiver` is not an instance, the method doesn't
/// exist, or the callee itself errors.
pub fn call_method(vm: &mut Vm, receiver: Value, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let Some(method) = vm.lookup_instance_method(receiver, name) else {
        return Err(vm.panic(format!("object has no method '{name}'")));
    };
    let Value::Obj(method_ref) = method else {
        return Err(vm.panic("invalid method value"));
    };
    match &method_ref.get().kind {
        ObjKind::BoundMethod(b) => call_with_self(vm, b.callable, b.receiver, args),
        _ => call_with_self(vm, method_ref, receiver, args),
    }
}

fn call_closure(vm: &mut Vm, closure_ref: ObjectRef, slot0: Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let (arity, is_variadic, defaults_len) = {
        let ObjKind::Closure(c) = &closure_ref.get().kind else {
            unreachable!("call_closure called with non-closure");
        };
        let ObjKind::Function(f) = &c.function.get().kind else {
            unreachable!("closure function pointer always points at a Function");
        };
        (f.arity() as usize, f.is_variadic(), c.defaults.len())
    };

    let arg_count = args.len();

    if is_variadic {
        let num_required = arity.saturating_sub(1);
        if arg_count < num_required {
            return Err(arity_error(vm, closure_ref, num_required, arg_count, true));
        }
        let variadic = &args[num_required..];
        let tup = vm.alloc_tuple(variadic)?;
        let mut final_args = Vec::with_capacity(num_required + 1);
        final_args.extend_from_slice(&args[..num_required]);
        final_args.push(tup);
        return vm.invoke_closure(closure_ref, slot0, &final_args);
    }

    if arg_count == arity {
        return vm.invoke_closure(closure_ref, slot0, args);
    }

    if arg_count < arity && arg_count + defaults_len >= arity {
        let num_missing = arity - arg_count;
        let ObjKind::Closure(c) = &closure_ref.get().kind else {
            unreachable!();
        };
        let start = c.defaults.len() - num_missing;
        let fill = c.defaults[start..].to_vec();
        let mut final_args = Vec::with_capacity(arity);
        final_args.extend_from_slice(args);
        final_args.extend_from_slice(&fill);
        return vm.invoke_closure(closure_ref, slot0, &final_args);
    }

    Err(arity_error(vm, closure_ref, arity, arg_count, false))
}

fn arity_error(vm: &mut Vm, closure_ref: ObjectRef, expected: usize, found: usize, at_least: bool) -> RuntimeError {
    let ObjKind::Closure(ClosureObj { function, .. }) = &closure_ref.get().kind else {
        return vm.panic("expected a different number of arguments");
    };
    let name = match &function.get().kind {
        ObjKind::Function(f) => f.name.as_deref().unwrap_or("<anonymous>").to_string(),
        _ => "<anonymous>".to_string(),
    };
    let plural = if expected == 1 { "" } else { "s" };
    if at_least {
        vm.panic(format!("{name}(): expected at least {expected} argument{plural}, found {found}"))
    } else {
        vm.panic(format!("{name}(): expected {expected} argument{plural}, found {found}"))
    }
}

fn call_native(vm: &mut Vm, fn_ref: ObjectRef, args: &[Value]) -> Result<Value, RuntimeError> {
    let (func, arity, name) = {
        let ObjKind::NativeFn(NativeFnObj { func, arity, name }) = &fn_ref.get().kind else {
            unreachable!("call_native called with non-native");
        };
        (*func, *arity, *name)
    };
    if arity >= 0 && args.len() != arity as usize {
        let plural = if arity == 1 { "" } else { "s" };
        let name_str = vm.str_bytes_of(name);
        return Err(vm.panic(format!("{name_str}(): expected {arity} argument{plural}, found {}", args.len())));
    }
    func(vm, args)
}

fn call_class(vm: &mut Vm, class_ref: ObjectRef, args: &[Value]) -> Result<Value, RuntimeError> {
    let instance = vm.new_instance(class_ref)?;
    let init_method = match &class_ref.get().kind {
        ObjKind::Class(c) => c.init_method,
        _ => unreachable!("call_class called with non-class"),
    };
    let Some(init) = init_method else {
        if !args.is_empty() {
            let name = vm.str_bytes_of(match &class_ref.get().kind {
                ObjKind::Class(c) => c.name,
                _ => unreachable!(),
            });
            return Err(vm.panic(format!("{name}(): expected 0 arguments for initializer, found {}", args.len())));
        }
        return Ok(instance);
    };
    let Value::Obj(init_ref) = init else {
        return Err(vm.panic("invalid init method value"));
    };
    call_with_self(vm, init_ref, instance, args)?;
    Ok(instance)
}
