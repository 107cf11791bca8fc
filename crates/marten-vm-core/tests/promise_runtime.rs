//! Promise state machine and microtask ordering

use std::cell::RefCell;
use std::sync::Arc;

use marten_vm_core::promise;
use marten_vm_core::{Context, PromiseState, Runtime, StackFrame, Value};

fn engine() -> (Arc<Runtime>, Context) {
    let runtime = Runtime::new();
    let ctx = Context::new(runtime.clone());
    (runtime, ctx)
}

fn state_of(value: &Value) -> (PromiseState, Value) {
    let data = value
        .as_object()
        .and_then(|o| o.as_promise())
        .expect("promise expected");
    (data.state, data.result_or_reason.clone())
}

thread_local! {
    /// Order log for callback-sequencing tests.
    static LOG: RefCell<Vec<i64>> = const { RefCell::new(Vec::new()) };
}

fn log_clear() {
    LOG.with(|log| log.borrow_mut().clear());
}

fn log_snapshot() -> Vec<i64> {
    LOG.with(|log| log.borrow().clone())
}

fn log_arg(_ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    LOG.with(|log| log.borrow_mut().push(frame.arg(0).as_int().unwrap_or(-1)));
    frame.arg(0)
}

fn add_two(_ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    Value::int(frame.arg(0).as_int().unwrap_or(0) + 2)
}

fn times_ten(_ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    Value::int(frame.arg(0).as_int().unwrap_or(0) * 10)
}

/// `Promise.resolve(1).then(v => v + 2).then(v => v * 10)` → 30.
#[test]
fn promise_chain_fulfills_through_callbacks() {
    let (_runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();

    let p1 = promise::resolved_with(&mut ctx, Value::int(1));
    let p1_h = ctx.handle(p1);
    let p1 = ctx.handle_value(p1_h);
    let p2 = promise::then(&mut ctx, p1, Value::cpp_function(add_two), Value::undefined());
    let p2_h = ctx.handle(p2);
    let p2 = ctx.handle_value(p2_h);
    let p3 = promise::then(&mut ctx, p2, Value::cpp_function(times_ten), Value::undefined());
    let p3_h = ctx.handle(p3);

    // Nothing settles synchronously past the first promise.
    let p3 = ctx.handle_value(p3_h);
    assert_eq!(state_of(&p3).0, PromiseState::Pending);

    ctx.run_microtasks();

    let p3 = ctx.handle_value(p3_h);
    let (state, result) = state_of(&p3);
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(result.as_int(), Some(30));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Settlement is idempotent: the first resolve/reject wins.
#[test]
fn settlement_is_idempotent() {
    let (_runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();

    let p = promise::new_promise(&mut ctx);
    let p_h = ctx.handle(p);

    let p = ctx.handle_value(p_h);
    promise::resolve(&mut ctx, p, Value::int(1));
    let p = ctx.handle_value(p_h);
    promise::resolve(&mut ctx, p, Value::int(2));
    let p = ctx.handle_value(p_h);
    promise::reject(&mut ctx, p, Value::str("late"));

    let p = ctx.handle_value(p_h);
    let (state, result) = state_of(&p);
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(result.as_int(), Some(1));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Resolving a promise with itself rejects with a cycle error.
#[test]
fn self_resolution_is_a_cycle() {
    let (_runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();

    let p = promise::new_promise(&mut ctx);
    let p_h = ctx.handle(p);
    let p = ctx.handle_value(p_h);
    let p_again = ctx.handle_value(p_h);
    promise::resolve(&mut ctx, p, p_again);

    let p = ctx.handle_value(p_h);
    let (state, reason) = state_of(&p);
    assert_eq!(state, PromiseState::Rejected);
    assert!(reason.is_exception());
    assert_eq!(
        reason.clear_exception().as_string().unwrap().as_str(),
        "Cycle detected"
    );
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// `Promise.resolve(p)` with a pending `p` returns a *new* promise that
/// settles when `p` does.
#[test]
fn resolve_with_pending_promise_adopts_it() {
    let (_runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();

    let inner = promise::new_promise(&mut ctx);
    let inner_h = ctx.handle(inner);
    let inner = ctx.handle_value(inner_h);
    let outer = promise::resolved_with(&mut ctx, inner);
    let outer_h = ctx.handle(outer);

    // Distinct identity, still pending.
    let outer = ctx.handle_value(outer_h);
    let inner = ctx.handle_value(inner_h);
    assert!(outer.as_object() != inner.as_object());
    assert_eq!(state_of(&outer).0, PromiseState::Pending);

    let inner = ctx.handle_value(inner_h);
    promise::resolve(&mut ctx, inner, Value::int(9));
    ctx.run_microtasks();

    let outer = ctx.handle_value(outer_h);
    let (state, result) = state_of(&outer);
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(result.as_int(), Some(9));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Resolving with a settled promise adopts its outcome synchronously.
#[test]
fn resolve_with_settled_promise_unwraps() {
    let (_runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();

    let inner = promise::rejected_with(&mut ctx, Value::str("inner reason"));
    let inner_h = ctx.handle(inner);
    let inner = ctx.handle_value(inner_h);
    let outer = promise::resolved_with(&mut ctx, inner);
    let outer_h = ctx.handle(outer);

    let outer = ctx.handle_value(outer_h);
    let (state, reason) = state_of(&outer);
    assert_eq!(state, PromiseState::Rejected);
    assert_eq!(
        reason.clear_exception().as_string().unwrap().as_str(),
        "inner reason"
    );
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Callbacks registered before settlement run in registration order;
/// registered after settlement they run in then-call order.
#[test]
fn microtasks_drain_fifo() {
    let (_runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();
    log_clear();

    // Before settlement: registration order.
    let p = promise::new_promise(&mut ctx);
    let p_h = ctx.handle(p);
    for _ in 0..3 {
        let p = ctx.handle_value(p_h);
        promise::then(&mut ctx, p, Value::cpp_function(log_arg), Value::undefined());
    }
    let p = ctx.handle_value(p_h);
    promise::resolve(&mut ctx, p, Value::int(1));
    ctx.run_microtasks();
    assert_eq!(log_snapshot(), vec![1, 1, 1]);

    // After settlement: then-call order, with distinct results.
    log_clear();
    let q = promise::resolved_with(&mut ctx, Value::int(7));
    let q_h = ctx.handle(q);
    let q = ctx.handle_value(q_h);
    let q2 = promise::then(&mut ctx, q, Value::cpp_function(add_two), Value::undefined());
    let q2_h = ctx.handle(q2);
    let q2 = ctx.handle_value(q2_h);
    promise::then(&mut ctx, q2, Value::cpp_function(log_arg), Value::undefined());
    let q = ctx.handle_value(q_h);
    promise::then(&mut ctx, q, Value::cpp_function(log_arg), Value::undefined());
    ctx.run_microtasks();
    // q's direct callback was enqueued first (q was already settled);
    // q2's callback runs once q2 settles during the same drain.
    assert_eq!(log_snapshot(), vec![7, 9]);
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// A callback that throws rejects the chained promise but never stops the
/// drain.
#[test]
fn throwing_callback_rejects_child() {
    fn boom(ctx: &mut Context, _argc: u32, _frame: &StackFrame) -> Value {
        ctx.throw_error(marten_vm_core::ErrorKind::Type, "callback failed")
    }

    let (runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();
    log_clear();

    let p = promise::resolved_with(&mut ctx, Value::int(1));
    let p_h = ctx.handle(p);
    let p = ctx.handle_value(p_h);
    let child = promise::then(&mut ctx, p, Value::cpp_function(boom), Value::undefined());
    let child_h = ctx.handle(child);

    // A second chain keeps running after the failure.
    let p = ctx.handle_value(p_h);
    promise::then(&mut ctx, p, Value::cpp_function(log_arg), Value::undefined());

    ctx.run_microtasks();

    let child = ctx.handle_value(child_h);
    let (state, reason) = state_of(&child);
    assert_eq!(state, PromiseState::Rejected);
    let name_key = runtime.keys().name;
    let reason = reason.clear_exception();
    assert_eq!(
        ctx.get_property(&reason, name_key).as_string().unwrap().as_str(),
        "TypeError"
    );
    assert_eq!(log_snapshot(), vec![1], "drain continued past the failure");
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Missing rejection handlers re-throw down the chain until handled.
#[test]
fn rejection_propagates_through_default_handlers() {
    let (_runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();

    let p = promise::rejected_with(&mut ctx, Value::str("deep"));
    let p_h = ctx.handle(p);
    let p = ctx.handle_value(p_h);
    // No handlers: the rejection falls through to the tail promise.
    let mid = promise::then(&mut ctx, p, Value::undefined(), Value::undefined());
    let mid_h = ctx.handle(mid);
    let mid = ctx.handle_value(mid_h);
    let tail = promise::then(&mut ctx, mid, Value::undefined(), Value::undefined());
    let tail_h = ctx.handle(tail);

    ctx.run_microtasks();

    let tail = ctx.handle_value(tail_h);
    let (state, reason) = state_of(&tail);
    assert_eq!(state, PromiseState::Rejected);
    assert_eq!(
        reason.clear_exception().as_string().unwrap().as_str(),
        "deep"
    );
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// The executor runs synchronously with working resolve/reject thunks.
#[test]
fn executor_thunks_settle_the_promise() {
    fn executor(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
        let resolve = frame.arg(0);
        ctx.call_function(&resolve, Value::undefined(), &[Value::int(123)])
    }

    let (_runtime, mut ctx) = engine();
    let scope = ctx.open_handle_scope();
    let p = promise::new_promise_with_executor(&mut ctx, Value::cpp_function(executor));
    let p_h = ctx.handle(p);
    let p = ctx.handle_value(p_h);
    let (state, result) = state_of(&p);
    assert_eq!(state, PromiseState::Fulfilled);
    assert_eq!(result.as_int(), Some(123));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}
