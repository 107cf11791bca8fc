//! Generator and async suspension over hand-assembled bytecode

use std::sync::Arc;

use marten_vm_bytecode::{ExceptionEntry, FunctionDef, Opcode};
use marten_vm_core::{Context, Handle, PromiseState, Runtime, Value};

fn engine() -> (Arc<Runtime>, Context) {
    let runtime = Runtime::new();
    let ctx = Context::new(runtime.clone());
    (runtime, ctx)
}

fn call(ctx: &mut Context, def: &Arc<FunctionDef>, args: &[Value]) -> Value {
    let func = Value::function_def(def.clone());
    ctx.call_function(&func, Value::undefined(), args)
}

/// Call `generator.next()` and return the `{value, done}` object.
fn next(ctx: &mut Context, gen_h: Handle) -> Value {
    let next_key = ctx.runtime().keys().next;
    let gen = ctx.handle_value(gen_h);
    let next_fn = ctx.get_property(&gen, next_key);
    assert!(next_fn.is_callable(), "generator must expose next()");
    let gen = ctx.handle_value(gen_h);
    ctx.call_function(&next_fn, gen, &[])
}

fn iter_value(ctx: &mut Context, result: &Value) -> Value {
    let value_key = ctx.runtime().keys().value;
    ctx.get_property(result, value_key)
}

fn iter_done(ctx: &mut Context, result: &Value) -> bool {
    let done_key = ctx.runtime().keys().done;
    ctx.get_property(result, done_key).is_truthy()
}

/// `function* g() { yield 1; yield 2; yield 3; }`
#[test]
fn generator_yields_in_order() {
    let (runtime, mut ctx) = engine();
    let consts: Vec<_> = (1..=3i64).map(|i| runtime.intern(Value::int(i))).collect();

    let mut def = FunctionDef::new("g", 0);
    def.flags.is_generator = true;
    let bc = &mut def.bytecode;
    for &idx in &consts {
        bc.emit_const_load(idx);
        bc.emit_opcode(Opcode::Yield);
        bc.emit_opcode(Opcode::Pop); // discard the value sent back in
    }
    bc.emit_opcode(Opcode::Undefined);
    bc.emit_opcode(Opcode::GeneratorReturn);
    let def = Arc::new(def);

    let scope = ctx.open_handle_scope();
    let gen = call(&mut ctx, &def, &[]);
    assert!(gen.is_object());
    let gen_h = ctx.handle(gen);

    for expected in 1..=3i64 {
        let result = next(&mut ctx, gen_h);
        assert!(!result.is_exception());
        assert_eq!(iter_value(&mut ctx, &result).as_int(), Some(expected));
        assert!(!iter_done(&mut ctx, &result));
    }

    let result = next(&mut ctx, gen_h);
    assert!(iter_done(&mut ctx, &result));
    assert!(iter_value(&mut ctx, &result).is_undefined());

    // A closed generator keeps reporting done.
    let result = next(&mut ctx, gen_h);
    assert!(iter_done(&mut ctx, &result));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// `function* g() { const a = yield 1; return a; }` — next(v) resumes the
/// yield expression with v.
#[test]
fn next_sends_values_into_the_generator() {
    let (runtime, mut ctx) = engine();
    let c1 = runtime.intern(Value::int(1));

    let mut def = FunctionDef::new("g", 0);
    def.flags.is_generator = true;
    def.var_def_table.add_var("a");
    let bc = &mut def.bytecode;
    bc.emit_const_load(c1);
    bc.emit_opcode(Opcode::Yield);
    bc.emit_var_store(0);
    bc.emit_var_load(0);
    bc.emit_opcode(Opcode::GeneratorReturn);
    let def = Arc::new(def);

    let scope = ctx.open_handle_scope();
    let gen = call(&mut ctx, &def, &[]);
    let gen_h = ctx.handle(gen);

    let first = next(&mut ctx, gen_h);
    assert_eq!(iter_value(&mut ctx, &first).as_int(), Some(1));

    // Send 10 back in.
    let next_key = ctx.runtime().keys().next;
    let gen = ctx.handle_value(gen_h);
    let next_fn = ctx.get_property(&gen, next_key);
    let gen = ctx.handle_value(gen_h);
    let second = ctx.call_function(&next_fn, gen, &[Value::int(10)]);
    assert_eq!(iter_value(&mut ctx, &second).as_int(), Some(10));
    assert!(iter_done(&mut ctx, &second));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Generator arguments become the parked frame's locals.
#[test]
fn generator_captures_its_arguments() {
    let (_runtime, mut ctx) = engine();

    // function* g(n) { yield n; }
    let mut def = FunctionDef::new("g", 1);
    def.flags.is_generator = true;
    def.var_def_table.add_var("n");
    let bc = &mut def.bytecode;
    bc.emit_var_load(0);
    bc.emit_opcode(Opcode::Yield);
    bc.emit_opcode(Opcode::Pop);
    bc.emit_opcode(Opcode::Undefined);
    bc.emit_opcode(Opcode::GeneratorReturn);
    let def = Arc::new(def);

    let scope = ctx.open_handle_scope();
    let gen = call(&mut ctx, &def, &[Value::int(77)]);
    let gen_h = ctx.handle(gen);
    let result = next(&mut ctx, gen_h);
    assert_eq!(iter_value(&mut ctx, &result).as_int(), Some(77));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

fn promise_state(value: &Value) -> Option<(PromiseState, Value)> {
    let data = value.as_object()?.as_promise()?;
    Some((data.state, data.result_or_reason.clone()))
}

/// `async function f() { return await 5; }` — a non-promise awaits as a
/// fulfilled promise; the result promise settles after the drain.
#[test]
fn async_function_awaits_plain_values() {
    let (runtime, mut ctx) = engine();
    let c5 = runtime.intern(Value::int(5));

    let mut def = FunctionDef::new("f", 0);
    def.flags.is_async = true;
    let bc = &mut def.bytecode;
    bc.emit_const_load(c5);
    bc.emit_opcode(Opcode::Await);
    bc.emit_opcode(Opcode::AsyncReturn);
    let def = Arc::new(def);

    let scope = ctx.open_handle_scope();
    let promise = call(&mut ctx, &def, &[]);
    let promise_h = ctx.handle(promise);

    let promise = ctx.handle_value(promise_h);
    let (state, _) = promise_state(&promise).expect("async call returns a promise");
    assert_eq!(state, PromiseState::Pending, "settles only after the drain");

    ctx.run_microtasks();

    let promise = ctx.handle_value(promise_h);
    let (state, result) = promise_state(&promise).unwrap();
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(result.as_int(), Some(5));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Awaiting a rejected promise rethrows at the suspension point; uncaught,
/// it rejects the result promise.
#[test]
fn await_rejection_rejects_result_promise() {
    let (_runtime, mut ctx) = engine();

    // async function f(p) { return await p; }
    let mut def = FunctionDef::new("f", 1);
    def.flags.is_async = true;
    def.var_def_table.add_var("p");
    let bc = &mut def.bytecode;
    bc.emit_var_load(0);
    bc.emit_opcode(Opcode::Await);
    bc.emit_opcode(Opcode::AsyncReturn);
    let def = Arc::new(def);

    let scope = ctx.open_handle_scope();
    let rejected = marten_vm_core::promise::rejected_with(&mut ctx, Value::str("bad"));
    let rejected_h = ctx.handle(rejected);
    let rejected = ctx.handle_value(rejected_h);
    let promise = call(&mut ctx, &def, &[rejected]);
    let promise_h = ctx.handle(promise);

    ctx.run_microtasks();

    let promise = ctx.handle_value(promise_h);
    let (state, reason) = promise_state(&promise).unwrap();
    assert_eq!(state, PromiseState::Rejected);
    assert!(reason.is_exception());
    assert_eq!(
        reason.clear_exception().as_string().unwrap().as_str(),
        "bad"
    );
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// `async function f(p) { try { await p; } catch (e) { return "caught"; }
/// return "ok"; }`
#[test]
fn async_catch_handles_awaited_rejection() {
    let (runtime, mut ctx) = engine();
    let ok = runtime.intern(Value::str("ok"));
    let caught = runtime.intern(Value::str("caught"));

    let mut def = FunctionDef::new("f", 1);
    def.flags.is_async = true;
    def.var_def_table.add_var("p");
    let bc = &mut def.bytecode;
    let try_start = bc.len();
    bc.emit_opcode(Opcode::TryBegin);
    bc.emit_var_load(0);
    bc.emit_opcode(Opcode::Await);
    bc.emit_opcode(Opcode::Pop);
    bc.emit_opcode(Opcode::TryEnd);
    let after_try = bc.emit_jump(Opcode::Goto);
    let try_end = bc.len();
    let catch_start = bc.len();
    bc.emit_const_load(caught);
    bc.emit_opcode(Opcode::AsyncReturn);
    let catch_end = bc.len();
    let rest = bc.len();
    bc.patch_jump(after_try, rest);
    bc.emit_const_load(ok);
    bc.emit_opcode(Opcode::AsyncReturn);

    let mut entry = ExceptionEntry::new(try_start, try_end);
    entry.catch_start = catch_start;
    entry.catch_end = catch_end;
    def.exception_table.add_entry(entry);
    let def = Arc::new(def);

    let scope = ctx.open_handle_scope();

    // Fulfilled path → "ok".
    let fulfilled = marten_vm_core::promise::resolved_with(&mut ctx, Value::int(1));
    let fulfilled_h = ctx.handle(fulfilled);
    let fulfilled = ctx.handle_value(fulfilled_h);
    let p1 = call(&mut ctx, &def, &[fulfilled]);
    let p1_h = ctx.handle(p1);

    // Rejected path → "caught".
    let rejected = marten_vm_core::promise::rejected_with(&mut ctx, Value::str("boom"));
    let rejected_h = ctx.handle(rejected);
    let rejected = ctx.handle_value(rejected_h);
    let p2 = call(&mut ctx, &def, &[rejected]);
    let p2_h = ctx.handle(p2);

    ctx.run_microtasks();

    let p1 = ctx.handle_value(p1_h);
    let (state, result) = promise_state(&p1).unwrap();
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(result.as_string().unwrap().as_str(), "ok");

    let p2 = ctx.handle_value(p2_h);
    let (state, result) = promise_state(&p2).unwrap();
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(result.as_string().unwrap().as_str(), "caught");
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}
