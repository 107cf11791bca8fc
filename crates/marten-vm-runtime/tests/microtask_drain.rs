//! Full-stack promise chain: bytecode, built-ins, microtask drain
//!
//! The S4 scenario — `Promise.resolve(1).then(v => v + 2).then(v => v * 10)`
//! — assembled as bytecode against the installed globals, driven through
//! the `Marten` facade which drains microtasks between turns.

use std::sync::Arc;

use marten_vm_bytecode::{FunctionDef, Opcode};
use marten_vm_core::{PromiseState, Value};
use marten_vm_runtime::Marten;

fn promise_outcome(value: &Value) -> (PromiseState, Value) {
    let data = value
        .as_object()
        .and_then(|o| o.as_promise())
        .expect("promise expected");
    (data.state, data.result_or_reason.clone())
}

#[test]
fn promise_chain_through_bytecode() {
    let mut marten = Marten::new();
    let runtime = marten.runtime().clone();

    let c1 = runtime.intern(Value::int(1));
    let c2 = runtime.intern(Value::int(2));
    let c10 = runtime.intern(Value::int(10));
    let promise_key = runtime.intern(Value::str("Promise"));
    let resolve_key = runtime.intern(Value::str("resolve"));
    let then_key = runtime.keys().then;

    // v => v + 2
    let mut add2 = FunctionDef::new("add2", 1);
    add2.var_def_table.add_var("v");
    add2.bytecode.emit_var_load(0);
    add2.bytecode.emit_const_load(c2);
    add2.bytecode.emit_opcode(Opcode::Add);
    add2.bytecode.emit_opcode(Opcode::Return);
    let add2_idx = runtime.intern(Value::function_def(Arc::new(add2)));

    // v => v * 10
    let mut mul10 = FunctionDef::new("mul10", 1);
    mul10.var_def_table.add_var("v");
    mul10.bytecode.emit_var_load(0);
    mul10.bytecode.emit_const_load(c10);
    mul10.bytecode.emit_opcode(Opcode::Mul);
    mul10.bytecode.emit_opcode(Opcode::Return);
    let mul10_idx = runtime.intern(Value::function_def(Arc::new(mul10)));

    // function main() {
    //   let p = Promise.resolve(1);
    //   let p2 = p.then(v => v + 2);
    //   return p2.then(v => v * 10);
    // }
    let mut main = FunctionDef::new("main", 0);
    main.var_def_table.add_var("p");
    main.var_def_table.add_var("p2");
    let bc = &mut main.bytecode;

    // Promise.resolve(1)
    bc.emit_const_load(c1); // argument
    bc.emit_opcode(Opcode::GetGlobal);
    bc.emit_u32(promise_key.to_wire()); // this
    bc.emit_opcode(Opcode::GetGlobal);
    bc.emit_u32(promise_key.to_wire());
    bc.emit_property_load(resolve_key); // callee
    bc.emit_const_load(c1); // argc = 1
    bc.emit_opcode(Opcode::FunctionCall);
    bc.emit_var_store(0);

    // p.then(add2)
    bc.emit_closure(add2_idx);
    bc.emit_var_load(0);
    bc.emit_var_load(0);
    bc.emit_property_load(then_key);
    bc.emit_const_load(c1);
    bc.emit_opcode(Opcode::FunctionCall);
    bc.emit_var_store(1);

    // p2.then(mul10)
    bc.emit_closure(mul10_idx);
    bc.emit_var_load(1);
    bc.emit_var_load(1);
    bc.emit_property_load(then_key);
    bc.emit_const_load(c1);
    bc.emit_opcode(Opcode::FunctionCall);
    bc.emit_opcode(Opcode::Return);
    let main = Arc::new(main);

    let result = marten.call(&main, &[]);
    assert!(!result.is_exception(), "main must not throw: {result:?}");

    let (state, value) = promise_outcome(&result);
    assert_eq!(state, PromiseState::Fulfilled, "chain settles in the drain");
    assert_eq!(value.as_int(), Some(30));
}

#[test]
fn microtasks_enqueued_during_drain_run_in_same_drain() {
    use marten_vm_core::promise;

    let mut marten = Marten::new();
    let ctx = marten.context();

    let scope = ctx.open_handle_scope();
    let p = promise::resolved_with(ctx, Value::int(1));
    let p_h = ctx.handle(p);

    // Chain two levels: the second callback is enqueued only while the
    // first runs, yet a single drain settles everything.
    fn passthrough(
        _ctx: &mut marten_vm_core::Context,
        _argc: u32,
        frame: &marten_vm_core::StackFrame,
    ) -> Value {
        frame.arg(0)
    }
    let p = ctx.handle_value(p_h);
    let mid = promise::then(ctx, p, Value::cpp_function(passthrough), Value::undefined());
    let mid_h = ctx.handle(mid);
    let mid = ctx.handle_value(mid_h);
    let tail = promise::then(ctx, mid, Value::cpp_function(passthrough), Value::undefined());
    let tail_h = ctx.handle(tail);

    ctx.run_microtasks();

    let tail = ctx.handle_value(tail_h);
    let (state, value) = promise_outcome(&tail);
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(value.as_int(), Some(1));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

#[test]
fn facade_drains_between_turns() {
    let mut marten = Marten::new();
    let runtime = marten.runtime().clone();
    let c1 = runtime.intern(Value::int(1));
    let promise_key = runtime.intern(Value::str("Promise"));
    let resolve_key = runtime.intern(Value::str("resolve"));

    // function turn() { return Promise.resolve(1); }
    let mut def = FunctionDef::new("turn", 0);
    let bc = &mut def.bytecode;
    bc.emit_const_load(c1);
    bc.emit_opcode(Opcode::GetGlobal);
    bc.emit_u32(promise_key.to_wire());
    bc.emit_opcode(Opcode::GetGlobal);
    bc.emit_u32(promise_key.to_wire());
    bc.emit_property_load(resolve_key);
    bc.emit_const_load(c1);
    bc.emit_opcode(Opcode::FunctionCall);
    bc.emit_opcode(Opcode::Return);

    let result = marten.call(&Arc::new(def), &[]);
    let (state, value) = promise_outcome(&result);
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(value.as_int(), Some(1));
}
