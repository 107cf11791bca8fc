//! Promises
//!
//! A promise is a heap object holding its settlement state, the result or
//! reason, and two parked job queues. Settlement moves the matching queue
//! into the context's microtask queue (each job gets the outcome appended
//! as its final argument) and drops the other queue.
//!
//! Resolution unwraps promises: resolving with a *pending* promise parks
//! the outer promise behind it, resolving with a *settled* promise adopts
//! its outcome synchronously, and resolving a promise with itself rejects
//! with a cycle error. Rejection reasons always carry the exception bit.

use crate::class_def::ClassId;
use crate::context::Context;
use crate::job::Job;
use crate::object::{ObjectData, ObjectRef, PROMISE_VTABLE, PromiseData, PromiseState};
use crate::value::Value;

/// Allocate a fresh pending promise.
pub fn new_promise(ctx: &mut Context) -> Value {
    let data = PromiseData {
        base: ObjectData::new(ClassId::PromiseObject, ctx.shape_manager().empty_shape()),
        state: PromiseState::Pending,
        result_or_reason: Value::undefined(),
        on_fulfill: crate::job::JobQueue::new(),
        on_reject: crate::job::JobQueue::new(),
    };
    Value::object(ctx.allocate(&PROMISE_VTABLE, data))
}

/// Allocate a promise and run its executor with resolve/reject thunks.
///
/// An executor that throws rejects the promise with the thrown value.
pub fn new_promise_with_executor(ctx: &mut Context, executor: Value) -> Value {
    let scope = ctx.open_handle_scope();
    let executor_h = ctx.handle(executor);
    let promise = new_promise(ctx);
    let promise_h = ctx.handle(promise);

    let executor = ctx.handle_value(executor_h);
    if !executor.is_undefined() {
        let promise_obj = ctx.handle_value(promise_h).as_object().unwrap();
        let args = [
            Value::promise_resolve(promise_obj),
            Value::promise_reject(promise_obj),
        ];
        let outcome = ctx.call_function(&executor, Value::undefined(), &args);
        if outcome.is_exception() {
            let promise = ctx.handle_value(promise_h);
            reject(ctx, promise, outcome);
        }
    }

    let result = ctx.handle_value(promise_h);
    ctx.close_handle_scope(scope, result)
}

fn promise_data(promise: &Value) -> Option<(ObjectRef, &mut PromiseData)> {
    let obj = promise.as_object()?;
    let data = obj.as_promise()?;
    Some((obj, data))
}

/// Resolve `promise` with `value`; a no-op once settled.
pub fn resolve(ctx: &mut Context, promise: Value, value: Value) {
    let scope = ctx.open_handle_scope();
    let promise_h = ctx.handle(promise);
    let value_h = ctx.handle(value);

    'settle: {
        let current = ctx.handle_value(promise_h);
        let Some((_, data)) = promise_data(&current) else {
            break 'settle;
        };
        if data.state != PromiseState::Pending {
            break 'settle;
        }
        if !unwrap(ctx, promise_h, value_h) {
            break 'settle;
        }
        let promise = ctx.handle_value(promise_h);
        let value = ctx.handle_value(value_h);
        let (obj, data) = promise_data(&promise).unwrap();
        if value.is_exception() {
            settle_reject(ctx, obj, data, value);
        } else {
            settle_fulfill(ctx, obj, data, value);
        }
    }
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Reject `promise` with `reason`; a no-op once settled. The stored reason
/// carries the exception bit.
pub fn reject(ctx: &mut Context, promise: Value, reason: Value) {
    let scope = ctx.open_handle_scope();
    let promise_h = ctx.handle(promise);
    let reason_h = ctx.handle(reason.with_exception());

    'settle: {
        let current = ctx.handle_value(promise_h);
        let Some((_, data)) = promise_data(&current) else {
            break 'settle;
        };
        if data.state != PromiseState::Pending {
            break 'settle;
        }
        if !unwrap(ctx, promise_h, reason_h) {
            break 'settle;
        }
        let promise = ctx.handle_value(promise_h);
        let reason = ctx.handle_value(reason_h).with_exception();
        let (obj, data) = promise_data(&promise).unwrap();
        settle_reject(ctx, obj, data, reason);
    }
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Unwrap a promise outcome handle in place.
///
/// Returns `false` when the outer promise's settlement is deferred (pending
/// inner promise, or a detected cycle already rejected it).
fn unwrap(
    ctx: &mut Context,
    promise_h: crate::context::Handle,
    value_h: crate::context::Handle,
) -> bool {
    let value = ctx.handle_value(value_h);
    let Some((inner_obj, inner)) = promise_data(&value) else {
        return true;
    };
    let promise = ctx.handle_value(promise_h);
    let promise_obj = promise.as_object().unwrap();
    if inner_obj == promise_obj {
        let (obj, data) = promise_data(&promise).unwrap();
        let reason = Value::str("Cycle detected").with_exception();
        settle_reject(ctx, obj, data, reason);
        return false;
    }
    match inner.state {
        PromiseState::Pending => {
            // Park the outer promise behind the inner one.
            let thunks_this = ctx.handle_value(promise_h).as_object().unwrap();
            then(
                ctx,
                value,
                Value::promise_resolve(thunks_this),
                Value::promise_reject(thunks_this),
            );
            false
        }
        PromiseState::Fulfilled | PromiseState::Rejected => {
            // Adopt the settled outcome synchronously; a settled promise
            // never holds another promise (it was unwrapped on the way in).
            let outcome = inner.result_or_reason.clone();
            debug_assert!(promise_data(&outcome).is_none());
            ctx.replace_handle(value_h, outcome);
            true
        }
    }
}

fn settle_fulfill(ctx: &mut Context, obj: ObjectRef, data: &mut PromiseData, result: Value) {
    data.state = PromiseState::Fulfilled;
    data.result_or_reason = result.clone();
    ctx.record_write(obj, &result);
    while let Some(mut job) = data.on_fulfill.pop_front() {
        job.add_arg(result.clone());
        ctx.microtasks().push_back(job);
    }
    data.on_reject.clear();
}

fn settle_reject(ctx: &mut Context, obj: ObjectRef, data: &mut PromiseData, reason: Value) {
    data.state = PromiseState::Rejected;
    data.result_or_reason = reason.clone();
    ctx.record_write(obj, &reason);
    while let Some(mut job) = data.on_reject.pop_front() {
        job.add_arg(reason.clone());
        ctx.microtasks().push_back(job);
    }
    data.on_fulfill.clear();
}

/// Identity: `v => v`.
fn identity_thunk(
    _ctx: &mut Context,
    _argc: u32,
    frame: &crate::interpreter::StackFrame,
) -> Value {
    frame.arg(0)
}

/// Re-throw: `v => { throw v; }`.
fn rethrow_thunk(
    _ctx: &mut Context,
    _argc: u32,
    frame: &crate::interpreter::StackFrame,
) -> Value {
    frame.arg(0).with_exception()
}

/// Microtask body for the fulfillment side of `then`.
///
/// `this` is the child promise; arguments are `[callback, result]`. The
/// callback's outcome settles the child: a thrown value rejects it, any
/// other value resolves it.
fn then_on_fulfilled(
    ctx: &mut Context,
    _argc: u32,
    frame: &crate::interpreter::StackFrame,
) -> Value {
    let callback = frame.arg(0);
    let result = frame.arg(1);
    let outcome = ctx.call_function(&callback, Value::undefined(), &[result]);
    let child = frame.this_val();
    if outcome.is_exception() {
        reject(ctx, child, outcome.clear_exception());
    } else {
        resolve(ctx, child, outcome);
    }
    Value::undefined()
}

/// Microtask body for the rejection side of `then`.
fn then_on_rejected(
    ctx: &mut Context,
    _argc: u32,
    frame: &crate::interpreter::StackFrame,
) -> Value {
    let callback = frame.arg(0);
    let reason = frame.arg(1).clear_exception();
    let outcome = ctx.call_function(&callback, Value::undefined(), &[reason]);
    let child = frame.this_val();
    if outcome.is_exception() {
        reject(ctx, child, outcome.clear_exception());
    } else {
        resolve(ctx, child, outcome);
    }
    Value::undefined()
}

/// `promise.then(on_fulfilled, on_rejected)`: create the child promise and
/// park (or immediately enqueue) the side callbacks.
///
/// Missing callbacks default to identity (fulfillment) and re-throw
/// (rejection). On an already-settled promise the matching callback is
/// enqueued immediately, preserving `then`-call order.
pub fn then(ctx: &mut Context, promise: Value, on_fulfilled: Value, on_rejected: Value) -> Value {
    let on_fulfilled = if on_fulfilled.is_undefined() {
        Value::cpp_function(identity_thunk)
    } else {
        on_fulfilled
    };
    let on_rejected = if on_rejected.is_undefined() {
        Value::cpp_function(rethrow_thunk)
    } else {
        on_rejected
    };

    let scope = ctx.open_handle_scope();
    let promise_h = ctx.handle(promise);
    let on_f_h = ctx.handle(on_fulfilled);
    let on_r_h = ctx.handle(on_rejected);
    let child = new_promise(ctx);
    let child_h = ctx.handle(child);

    let promise = ctx.handle_value(promise_h);
    let child = ctx.handle_value(child_h);
    let Some((obj, data)) = promise_data(&promise) else {
        let exc = ctx.throw_error(crate::error::ErrorKind::Type, "then called on a non-promise");
        return ctx.close_handle_scope(scope, exc);
    };

    let mut fulfill_job = Job::new(Value::cpp_function(then_on_fulfilled), child.clone());
    fulfill_job.add_arg(ctx.handle_value(on_f_h));
    let mut reject_job = Job::new(Value::cpp_function(then_on_rejected), child.clone());
    reject_job.add_arg(ctx.handle_value(on_r_h));

    match data.state {
        PromiseState::Pending => {
            ctx.record_write(obj, &child);
            let on_f = ctx.handle_value(on_f_h);
            let on_r = ctx.handle_value(on_r_h);
            ctx.record_write(obj, &on_f);
            ctx.record_write(obj, &on_r);
            data.on_fulfill.push_back(fulfill_job);
            data.on_reject.push_back(reject_job);
        }
        PromiseState::Fulfilled => {
            fulfill_job.add_arg(data.result_or_reason.clone());
            ctx.microtasks().push_back(fulfill_job);
        }
        PromiseState::Rejected => {
            reject_job.add_arg(data.result_or_reason.clone());
            ctx.microtasks().push_back(reject_job);
        }
    }

    let result = ctx.handle_value(child_h);
    ctx.close_handle_scope(scope, result)
}

/// `Promise.resolve(v)`: a fresh promise resolved with `v`.
///
/// Even when `v` is already a promise the result is a new promise that
/// settles with it, never `v` itself.
pub fn resolved_with(ctx: &mut Context, value: Value) -> Value {
    let scope = ctx.open_handle_scope();
    let value_h = ctx.handle(value);
    let promise = new_promise(ctx);
    let promise_h = ctx.handle(promise);
    let promise = ctx.handle_value(promise_h);
    let value = ctx.handle_value(value_h);
    resolve(ctx, promise, value);
    let result = ctx.handle_value(promise_h);
    ctx.close_handle_scope(scope, result)
}

/// `Promise.reject(r)`: a fresh promise rejected with `r`.
pub fn rejected_with(ctx: &mut Context, reason: Value) -> Value {
    let scope = ctx.open_handle_scope();
    let reason_h = ctx.handle(reason);
    let promise = new_promise(ctx);
    let promise_h = ctx.handle(promise);
    let promise = ctx.handle_value(promise_h);
    let reason = ctx.handle_value(reason_h);
    reject(ctx, promise, reason);
    let result = ctx.handle_value(promise_h);
    ctx.close_handle_scope(scope, result)
}
