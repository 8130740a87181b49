// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! End-to-end tests driving the dispatch loop through [`Vm::call_function`].

#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::bytecode::FunctionBuilder;

fn new_vm() -> Vm {
    Vm::new(VmOptions::new())
}

#[test]
fn arithmetic_and_return() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(1);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(2);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(3);
    b.emit_op(OpCode::BinaryPlus);
    b.emit_op(OpCode::Return);
    let result = vm.call_function(b.finish(), &[]).unwrap();
    assert!(matches!(result, Value::I64(5)));
}

#[test]
fn local_slots_round_trip_through_get_and_set() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(1);
    // slot 0 is the receiver placeholder; slot 1 is our first param.
    b.emit_op(OpCode::LoadI);
    b.emit_u8(9);
    b.emit_op(OpCode::SetLocal);
    b.emit_u8(1);
    b.emit_op(OpCode::Pop);
    b.emit_op(OpCode::GetLocal);
    b.emit_u8(1);
    b.emit_op(OpCode::Return);
    let result = vm.call_function(b.finish(), &[Value::I64(0)]).unwrap();
    assert!(matches!(result, Value::I64(9)));
}

#[test]
fn jump_skips_the_dead_branch() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(1);
    b.emit_op(OpCode::LoadFalse);
    let jump_at = b.emit_op(OpCode::JumpIfFalse);
    b.emit_u16(0);
    b.emit_op(OpCode::Pop);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(1);
    b.emit_op(OpCode::Return);
    b.emit_op(OpCode::Pop);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(2);
    b.emit_op(OpCode::Return);
    b.patch_jump_forward(jump_at + 1);
    let result = vm.call_function(b.finish(), &[]).unwrap();
    assert!(matches!(result, Value::I64(2)));
}

#[test]
fn jump_if_null_takes_the_branch_only_on_null_and_leaves_the_value_on_the_stack() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(1);
    b.emit_op(OpCode::LoadNull);
    let jump_at = b.emit_op(OpCode::JumpIfNull);
    b.emit_u16(0);
    b.emit_op(OpCode::Pop);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(1);
    b.emit_op(OpCode::Return);
    b.patch_jump_forward(jump_at + 1);
    b.emit_op(OpCode::Return);
    let result = vm.call_function(b.finish(), &[]).unwrap();
    assert!(matches!(result, Value::Null));
}

#[test]
fn jump_if_null_does_not_take_the_branch_on_a_non_null_value() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(1);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(7);
    let jump_at = b.emit_op(OpCode::JumpIfNull);
    b.emit_u16(0);
    b.emit_op(OpCode::Return);
    b.patch_jump_forward(jump_at + 1);
    b.emit_op(OpCode::Pop);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(99);
    b.emit_op(OpCode::Return);
    let result = vm.call_function(b.finish(), &[]).unwrap();
    assert!(matches!(result, Value::I64(7)));
}

#[test]
fn make_vec_then_get_index() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(1);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(10);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(20);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(30);
    b.emit_op(OpCode::MakeVec);
    b.emit_u16(3);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(1);
    b.emit_op(OpCode::GetIndex);
    b.emit_op(OpCode::Return);
    let result = vm.call_function(b.finish(), &[]).unwrap();
    assert!(matches!(result, Value::I64(20)));
}

#[test]
fn division_by_zero_panics() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(1);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(1);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(0);
    b.emit_op(OpCode::BinarySlash);
    b.emit_op(OpCode::Return);
    let err = vm.call_function(b.finish(), &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::Panic(_)));
}

#[test]
fn try_opcode_catches_a_panic_and_yields_an_err_value() {
    let mut vm = new_vm();

    // A native function is callable just like a closure; simplest way to
    // give `Try` something that panics.
    fn always_panics(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
        Err(vm.panic("boom"))
    }
    let name = vm.intern_copy(b"boom_fn");
    let name_ref = name.as_obj().expect("interned string is an Obj");
    let native = vm.gc.alloc(None, ObjKind::NativeFn(crate::heap::NativeFnObj {
        func: always_panics,
        name: name_ref,
        arity: 0,
    }));

    let mut b = FunctionBuilder::new(1);
    let const_idx = b.add_constant(Value::Obj(native));
    b.emit_op(OpCode::LoadConstant);
    b.emit_u16(const_idx);
    b.emit_op(OpCode::Try);
    b.emit_op(OpCode::Return);

    let result = vm.call_function(b.finish(), &[]).unwrap();
    let Value::Obj(obj) = result else {
        panic!("expected an Err object, got {result:?}");
    };
    assert!(matches!(obj.get().kind, ObjKind::Err(_)));
}

#[test]
fn try_opcode_passes_through_a_successful_call() {
    let mut vm = new_vm();
    fn always_ok(_vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
        Ok(Value::I64(42))
    }
    let name = vm.intern_copy(b"ok_fn");
    let name_ref = name.as_obj().expect("interned string is an Obj");
    let native = vm.gc.alloc(None, ObjKind::NativeFn(crate::heap::NativeFnObj {
        func: always_ok,
        name: name_ref,
        arity: 0,
    }));

    let mut b = FunctionBuilder::new(1);
    let const_idx = b.add_constant(Value::Obj(native));
    b.emit_op(OpCode::LoadConstant);
    b.emit_u16(const_idx);
    b.emit_op(OpCode::Try);
    b.emit_op(OpCode::Return);

    let result = vm.call_function(b.finish(), &[]).unwrap();
    assert!(matches!(result, Value::I64(42)));
}

#[test]
fn stack_underflow_on_pop_from_empty_stack_is_an_internal_error() {
    let mut vm = new_vm();
    let mut b = FunctionBuilder::new(1);
    b.emit_op(OpCode::Pop);
    b.emit_op(OpCode::LoadNull);
    b.emit_op(OpCode::Return);
    let err = vm.call_function(b.finish(), &[]).unwrap_err();
    assert!(matches!(err, RuntimeError::StackUnderflow));
}

#[test]
fn bytes_in_use_grows_after_allocating_heap_objects() {
    let mut vm = new_vm();
    let before = vm.bytes_in_use();
    let mut b = FunctionBuilder::new(1);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(1);
    b.emit_op(OpCode::LoadI);
    b.emit_u8(2);
    b.emit_op(OpCode::MakeVec);
    b.emit_u16(2);
    b.emit_op(OpCode::Return);
    vm.call_function(b.finish(), &[]).unwrap();
    assert!(vm.bytes_in_use() >= before);
}
