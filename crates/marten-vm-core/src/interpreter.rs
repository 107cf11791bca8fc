//! The bytecode interpreter
//!
//! A single read-opcode → match → operand-fetch → effect loop over the
//! shared operand stack. Each call owns a [`StackFrame`] windowing the
//! stack from its `bottom`; arguments become frame-locals, the result
//! replaces the argument slots on return.
//!
//! Exceptions are exception-flagged values: any faulting opcode produces
//! one, and the loop routes it through the function's exception table
//! (catch binding, finally replay, frame unwinding). Generators and async
//! functions suspend by saving their stack slice and PC into their heap
//! object and resuming from it later.

use std::sync::Arc;

use marten_vm_bytecode::{
    ConstIndex, ExceptionEntry, FunctionDef, INVALID_VAR_INDEX, ModuleDef, Opcode, Pc, VarIndex,
};
use marten_vm_gc::GcHeader;

use crate::context::Context;
use crate::error::ErrorKind;
use crate::jit::StubOutcome;
use crate::object::{ClosureEnv, GeneratorState, ObjectRef};
use crate::value::{Value, ValueCell, ValueKind};

/// The shared operand stack (one per context; contexts are single-threaded,
/// so this is the thread's stack).
pub struct Stack {
    values: Vec<Value>,
}

impl Stack {
    /// Fresh empty stack.
    pub fn new() -> Self {
        Self {
            values: Vec::with_capacity(256),
        }
    }

    /// Current depth.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Push a value.
    #[inline]
    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    /// Pop the top value.
    #[inline]
    pub fn pop(&mut self) -> Value {
        self.values.pop().expect("operand stack underflow")
    }

    /// Read slot `index`.
    #[inline]
    pub fn get(&self, index: usize) -> &Value {
        &self.values[index]
    }

    /// Write slot `index`.
    #[inline]
    pub fn set(&mut self, index: usize, value: Value) {
        self.values[index] = value;
    }

    /// Drop everything above `len`.
    #[inline]
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Move out every value from `from` upwards.
    pub fn drain_from(&mut self, from: usize) -> Vec<Value> {
        self.values.split_off(from)
    }

    /// Mutable view for root scanning.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        self.values.iter_mut()
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

/// Action to replay when a finally region finishes.
#[derive(Debug)]
pub enum FinallyAction {
    /// A `return` left the protected region.
    Return(Value),
    /// An exception is still in flight.
    Rethrow(Value),
    /// Control continues at a recorded PC.
    Goto(Pc),
}

/// The definition a frame executes (functions and module bodies share the
/// interpreter).
#[derive(Clone)]
pub enum FrameDef {
    /// An ordinary function definition.
    Function(Arc<FunctionDef>),
    /// A module body.
    Module(Arc<ModuleDef>),
}

impl FrameDef {
    /// The underlying function definition.
    pub fn def(&self) -> &FunctionDef {
        match self {
            FrameDef::Function(def) => def,
            FrameDef::Module(module) => &module.function,
        }
    }
}

/// One call frame: a window into the shared operand stack.
///
/// Frames live on the Rust call stack and register themselves with the
/// context for the duration of the call, so their values are GC roots (and
/// are rewritten when objects move).
pub struct StackFrame {
    stack: *mut Stack,
    /// Stack index where this frame's locals begin.
    pub(crate) bottom: usize,
    /// The callee value (function object, definition, or host callable).
    pub(crate) func_val: Value,
    /// The executing definition (None for host frames).
    pub(crate) func_def: Option<FrameDef>,
    /// The bound `this`.
    pub(crate) this: Value,
    /// Program counter.
    pub(crate) pc: Pc,
    /// Pending finally-replay action.
    pub(crate) pending: Option<FinallyAction>,
    /// Generator/async object driving this frame, or undefined.
    pub(crate) generator: Value,
}

impl StackFrame {
    pub(crate) fn new(
        stack: *mut Stack,
        bottom: usize,
        func_val: Value,
        func_def: Option<FrameDef>,
        this: Value,
    ) -> Self {
        Self {
            stack,
            bottom,
            func_val,
            func_def,
            this,
            pc: 0,
            pending: None,
            generator: Value::undefined(),
        }
    }

    /// A frame for host code entering the VM: its bottom is the current
    /// stack top.
    pub(crate) fn host(stack: *mut Stack) -> Self {
        // SAFETY: the stack outlives every frame (it is boxed in the
        // context).
        let bottom = unsafe { (*stack).len() };
        Self::new(stack, bottom, Value::undefined(), None, Value::undefined())
    }

    #[inline]
    fn stack(&self) -> &mut Stack {
        // SAFETY: the boxed stack outlives every frame; frames are confined
        // to the single VM thread.
        unsafe { &mut *self.stack }
    }

    /// Push onto the operand stack.
    #[inline]
    pub fn push(&self, value: Value) {
        self.stack().push(value);
    }

    /// Pop from the operand stack.
    #[inline]
    pub fn pop(&self) -> Value {
        self.stack().pop()
    }

    /// Current operand-stack depth.
    #[inline]
    pub fn top(&self) -> usize {
        self.stack().len()
    }

    /// Indexed access: non-negative from the frame bottom, negative from
    /// the stack top. Cells read through.
    pub fn get(&self, index: i64) -> Value {
        let stack = self.stack();
        let at = if index >= 0 {
            self.bottom + index as usize
        } else {
            (stack.len() as i64 + index) as usize
        };
        stack.get(at).deref_cell()
    }

    /// The `i`-th argument (arguments are the first frame-locals).
    pub fn arg(&self, index: u32) -> Value {
        if self.bottom + (index as usize) < self.top() {
            self.get(index as i64)
        } else {
            Value::undefined()
        }
    }

    /// The bound `this`.
    pub fn this_val(&self) -> Value {
        self.this.clone()
    }

    /// Read frame-local `idx`, reading through escaped-local cells.
    #[inline]
    pub fn local(&self, idx: VarIndex) -> Value {
        self.stack().get(self.bottom + idx as usize).deref_cell()
    }

    /// Read frame-local `idx` without cell indirection.
    #[inline]
    pub(crate) fn local_raw(&self, idx: VarIndex) -> Value {
        self.stack().get(self.bottom + idx as usize).clone()
    }

    /// Write frame-local `idx`, writing through escaped-local cells.
    pub fn store_local(&self, idx: VarIndex, value: Value) {
        let stack = self.stack();
        let at = self.bottom + idx as usize;
        match stack.get(at).kind() {
            ValueKind::ClosureVar(cell) | ValueKind::ExportVar(cell) => cell.set(value),
            _ => stack.set(at, value),
        }
    }

    /// Replace frame-local `idx` outright (cell promotion).
    pub(crate) fn store_local_raw(&self, idx: VarIndex, value: Value) {
        let stack = self.stack();
        let at = self.bottom + idx as usize;
        stack.set(at, value);
    }

    /// Visit the frame's own GC references (the operand slice is rooted
    /// through the stack itself).
    pub fn trace(&mut self, visitor: &mut dyn FnMut(&mut *mut GcHeader)) {
        self.func_val.trace(visitor);
        self.this.trace(visitor);
        self.generator.trace(visitor);
        match &mut self.pending {
            Some(FinallyAction::Return(v)) | Some(FinallyAction::Rethrow(v)) => v.trace(visitor),
            _ => {}
        }
    }
}

/// What ended a dispatch run.
enum Control {
    /// Normal (or exceptional — check the exception bit) return.
    Return(Value),
    /// A generator yielded.
    Yield(Value),
    /// An async function awaited this value.
    Await(Value),
}

/// The interpreter over one context.
pub struct Vm<'c> {
    ctx: &'c mut Context,
}

impl<'c> Vm<'c> {
    /// Borrow the context for a run of calls.
    pub fn new(ctx: &'c mut Context) -> Self {
        Self { ctx }
    }

    /// Call `func` with `this` and `args`, returning the result (exception
    /// bit set when the call threw).
    pub fn call(&mut self, func: Value, this: Value, args: &[Value]) -> Value {
        let stack = self.ctx.stack_ptr();
        let frame = StackFrame::host(stack);
        for arg in args {
            frame.push(arg.clone());
        }
        self.call_internal(func, this, args.len() as u32);
        frame.pop()
    }

    /// `new func(args...)`.
    pub fn construct(&mut self, ctor: Value, args: &[Value]) -> Value {
        for arg in args {
            self.ctx.stack().push(arg.clone());
        }
        self.construct_on_stack(ctor, args.len() as u32)
    }

    /// Run a module body against its namespace object.
    pub fn call_module(&mut self, module: Arc<ModuleDef>, module_val: Value) -> Value {
        let def = &module.function;
        def.hotness.increment();
        let stack_ptr = self.ctx.stack_ptr();
        let bottom = self.ctx.stack().len();

        // Zero-fill the module's locals, then bind exported locals to the
        // namespace's live cells so stores are import-visible.
        for _ in 0..def.var_count() {
            self.ctx.stack().push(Value::undefined());
        }
        if let Some(module_obj) = module_val.as_object().and_then(|o| o.as_module().map(|_| o)) {
            let data = module_obj.as_module().unwrap();
            for (_, export) in module.export_var_def_table.iter() {
                let cell = data.export_vars[export.export_slot as usize].clone();
                self.ctx
                    .stack()
                    .set(bottom + export.var_slot as usize, Value::export_var(cell));
            }
        }

        let mut frame = StackFrame::new(
            stack_ptr,
            bottom,
            Value::module_def(module.clone()),
            Some(FrameDef::Module(module.clone())),
            module_val,
        );
        self.ctx.push_frame_root(&mut frame);
        let control = self.dispatch(&mut frame, &module.function, None);
        self.ctx.pop_frame_root();

        self.ctx.stack().truncate(bottom);
        match control {
            Control::Return(value) => value,
            _ => Value::undefined(),
        }
    }

    // ==================== Call protocol ====================

    /// Invoke `func` with the top `argc` stack values as arguments.
    ///
    /// On return the arguments are replaced by the single result value.
    fn call_internal(&mut self, func: Value, this: Value, argc: u32) {
        enum Target {
            Host(crate::value::CppFunction),
            Defined(Option<ObjectRef>, Arc<FunctionDef>),
            GeneratorNext,
            PromiseResolve(ObjectRef),
            PromiseReject(ObjectRef),
            NotCallable,
        }

        let target = match func.kind() {
            ValueKind::CppFunction(f) => Target::Host(*f),
            ValueKind::FunctionDef(def) => Target::Defined(None, def.clone()),
            ValueKind::Object(obj) => {
                if let Some(native) = obj.as_native_function() {
                    Target::Host(native.func)
                } else if let Some(function) = obj.as_function() {
                    Target::Defined(Some(*obj), function.def.clone())
                } else {
                    Target::NotCallable
                }
            }
            ValueKind::GeneratorNext => Target::GeneratorNext,
            ValueKind::PromiseResolve(promise) => Target::PromiseResolve(*promise),
            ValueKind::PromiseReject(promise) => Target::PromiseReject(*promise),
            _ => Target::NotCallable,
        };

        match target {
            Target::Host(f) => {
                let stack_ptr = self.ctx.stack_ptr();
                let bottom = self.ctx.stack().len() - argc as usize;
                let mut frame = StackFrame::new(stack_ptr, bottom, func, None, this);
                self.ctx.push_frame_root(&mut frame);
                let result = f(self.ctx, argc, &frame);
                self.ctx.pop_frame_root();
                self.ctx.stack().truncate(bottom);
                self.ctx.stack().push(result);
            }
            Target::Defined(closure, def) => {
                self.call_defined(func, closure, def, this, argc);
            }
            Target::GeneratorNext => {
                let sent = self.pop_first_arg(argc);
                let result = match this.as_object() {
                    Some(obj) if obj.as_async().is_some() => {
                        self.resume_async(this.clone(), sent);
                        Value::undefined()
                    }
                    Some(obj) if obj.as_generator().is_some() => {
                        self.resume_generator(this.clone(), sent)
                    }
                    _ => self
                        .ctx
                        .throw_error(ErrorKind::Type, "next called on a non-generator"),
                };
                self.ctx.stack().push(result);
            }
            Target::PromiseResolve(promise) => {
                let promise = Value::object(promise);
                let arg = self.pop_first_arg(argc);
                crate::promise::resolve(self.ctx, promise, arg);
                self.ctx.stack().push(Value::undefined());
            }
            Target::PromiseReject(promise) => {
                let promise = Value::object(promise);
                let arg = self.pop_first_arg(argc);
                crate::promise::reject(self.ctx, promise, arg);
                self.ctx.stack().push(Value::undefined());
            }
            Target::NotCallable => {
                let bottom = self.ctx.stack().len() - argc as usize;
                self.ctx.stack().truncate(bottom);
                let exc = self.ctx.throw_error(
                    ErrorKind::Type,
                    &format!("{} is not a function", func.to_display_string()),
                );
                self.ctx.stack().push(exc);
            }
        }
    }

    /// Pop `argc` arguments, keeping the first.
    fn pop_first_arg(&mut self, argc: u32) -> Value {
        let stack = self.ctx.stack();
        let bottom = stack.len() - argc as usize;
        let first = if argc >= 1 {
            stack.get(bottom).clone().deref_cell()
        } else {
            Value::undefined()
        };
        stack.truncate(bottom);
        first
    }

    /// Call a compiled function (normal, arrow, generator or async).
    fn call_defined(
        &mut self,
        func: Value,
        closure: Option<ObjectRef>,
        def: Arc<FunctionDef>,
        this: Value,
        argc: u32,
    ) {
        def.hotness.increment();
        if self.ctx.jit().enabled() {
            crate::jit::maybe_compile(self.ctx, &def);
        }

        if def.is_generator() {
            let r#gen = self.spawn_suspendable(func, &def, argc, false);
            self.ctx.stack().push(r#gen);
            return;
        }
        if def.is_async() {
            let scope = self.ctx.open_handle_scope();
            let async_val = self.spawn_suspendable(func, &def, argc, true);
            let async_h = self.ctx.handle(async_val);
            let async_val = self.ctx.handle_value(async_h);
            self.resume_async(async_val, Value::undefined());
            let promise = self
                .ctx
                .handle_value(async_h)
                .as_object()
                .and_then(|o| o.as_async().map(|a| a.res_promise.clone()))
                .unwrap_or_default();
            let result = self.ctx.close_handle_scope(scope, promise);
            self.ctx.stack().push(result);
            return;
        }

        let stack_ptr = self.ctx.stack_ptr();
        let bottom = self.ctx.stack().len() - argc as usize;
        adjust_locals(self.ctx.stack(), bottom, argc, &def);
        self.bind_closure_vars(closure, &def, bottom);

        let this = if def.is_arrow() {
            closure
                .and_then(|obj| obj.as_function().map(|f| f.env.lexical_this.clone()))
                .unwrap_or(this)
        } else {
            this
        };

        let mut frame = StackFrame::new(
            stack_ptr,
            bottom,
            func,
            Some(FrameDef::Function(def.clone())),
            this,
        );
        self.ctx.push_frame_root(&mut frame);
        let control = self.dispatch(&mut frame, &def, None);
        self.ctx.pop_frame_root();

        self.ctx.stack().truncate(bottom);
        match control {
            Control::Return(value) => self.ctx.stack().push(value),
            // Yield/Await never escape a non-suspendable body.
            _ => self.ctx.stack().push(Value::undefined()),
        }
    }

    /// Create a generator or async object whose saved stack holds the
    /// call's locals.
    fn spawn_suspendable(&mut self, func: Value, def: &Arc<FunctionDef>, argc: u32, is_async: bool) -> Value {
        let scope = self.ctx.open_handle_scope();
        let func_h = self.ctx.handle(func);

        let obj_val = if is_async {
            self.ctx.new_async_object(Value::undefined(), Vec::new())
        } else {
            self.ctx.new_generator_object(Value::undefined(), Vec::new())
        };
        let obj = obj_val.as_object().unwrap();
        let data = obj.as_generator().unwrap();
        data.function = self.ctx.handle_value(func_h);

        // Move the arguments off the operand stack into the parked frame,
        // applying the same local setup as a direct call.
        let bottom = self.ctx.stack().len() - argc as usize;
        adjust_locals(self.ctx.stack(), bottom, argc, def);
        // Re-resolve the (possibly moved) closure through its handle.
        let closure = self
            .ctx
            .handle_value(func_h)
            .as_object()
            .filter(|o| o.as_function().is_some());
        self.bind_closure_vars(closure, def, bottom);
        data.stack = self.ctx.stack().drain_from(bottom);
        data.pc = 0;
        data.state = GeneratorState::Suspended;

        self.ctx.close_handle_scope(scope, obj_val)
    }

    /// Install the closure environment's cells over the captured locals
    /// (the callee sees its captures through the shared cells).
    fn bind_closure_vars(&mut self, closure: Option<ObjectRef>, def: &FunctionDef, bottom: usize) {
        let Some(obj) = closure else {
            return;
        };
        let Some(data) = obj.as_function() else {
            return;
        };
        for (var_idx, capture) in def.closure_var_table.iter() {
            let cell = data.env.vars[capture.env_slot as usize].clone();
            self.ctx.stack().set(bottom + var_idx as usize, cell);
        }
    }

    /// `new` with `argc` arguments already on the stack.
    fn construct_on_stack(&mut self, ctor: Value, argc: u32) -> Value {
        if !ctor.is_callable() {
            let new_len = self.ctx.stack().len() - argc as usize;
            self.ctx.stack().truncate(new_len);
            return self
                .ctx
                .throw_error(ErrorKind::Type, "constructor is not callable");
        }

        let scope = self.ctx.open_handle_scope();
        let ctor_h = self.ctx.handle(ctor);

        // Fresh `this` inheriting from ctor.prototype.
        let ctor_val = self.ctx.handle_value(ctor_h);
        let prototype_key = self.ctx.runtime().keys().prototype;
        let proto = self.ctx.get_property(&ctor_val, prototype_key);
        let proto_h = self.ctx.handle(proto);
        let this_val = self.ctx.new_plain_object();
        let this_h = self.ctx.handle(this_val);
        let proto = self.ctx.handle_value(proto_h);
        if proto.is_object() {
            let this_obj = self.ctx.handle_value(this_h).as_object().unwrap();
            this_obj.object_mut().set_prototype(proto.clone());
            self.ctx.record_write(this_obj, &proto);
        }

        let ctor_val = self.ctx.handle_value(ctor_h);
        let this_val = self.ctx.handle_value(this_h);
        self.call_internal(ctor_val, this_val, argc);
        let result = self.ctx.stack().pop();

        let result = if result.is_exception() || result.is_object() {
            result
        } else {
            self.ctx.handle_value(this_h)
        };
        self.ctx.close_handle_scope(scope, result)
    }

    // ==================== Generator / async resumption ====================

    /// Drive a generator one step; returns the `{value, done}` object (or
    /// the propagating exception).
    fn resume_generator(&mut self, gen_val: Value, sent: Value) -> Value {
        let scope = self.ctx.open_handle_scope();
        let gen_h = self.ctx.handle(gen_val);

        let r#gen = self.ctx.handle_value(gen_h);
        let data = r#gen.as_object().unwrap().as_generator().unwrap();
        match data.state {
            GeneratorState::Closed => {
                let result = self.make_iter_result(Value::undefined(), true);
                return self.ctx.close_handle_scope(scope, result);
            }
            GeneratorState::Executing => {
                let exc = self
                    .ctx
                    .throw_error(ErrorKind::Type, "generator is already running");
                return self.ctx.close_handle_scope(scope, exc);
            }
            GeneratorState::Suspended => {}
        }

        let control = self.run_suspendable(gen_h, sent);
        let r#gen = self.ctx.handle_value(gen_h);
        let data = r#gen.as_object().unwrap().as_generator().unwrap();
        let result = match control {
            Control::Yield(value) => {
                let value_h = self.ctx.handle(value);
                let v = self.ctx.handle_value(value_h);
                self.make_iter_result(v, false)
            }
            Control::Return(value) => {
                data.state = GeneratorState::Closed;
                if value.is_exception() {
                    value
                } else {
                    let value_h = self.ctx.handle(value);
                    let v = self.ctx.handle_value(value_h);
                    self.make_iter_result(v, true)
                }
            }
            Control::Await(_) => self
                .ctx
                .throw_error(ErrorKind::Internal, "await outside an async function"),
        };
        self.ctx.close_handle_scope(scope, result)
    }

    /// Drive an async function one step, wiring `await` continuations and
    /// settling the result promise on completion.
    fn resume_async(&mut self, async_val: Value, sent: Value) {
        let scope = self.ctx.open_handle_scope();
        let async_h = self.ctx.handle(async_val);

        {
            let a = self.ctx.handle_value(async_h);
            let data = a.as_object().unwrap().as_generator().unwrap();
            if data.state != GeneratorState::Suspended {
                let _ = self.ctx.close_handle_scope(scope, Value::undefined());
                return;
            }
        }

        let control = self.run_suspendable(async_h, sent);
        match control {
            Control::Await(awaited) => {
                let awaited_h = self.ctx.handle(awaited);
                // Anything non-promise awaits as an already-fulfilled
                // promise.
                let awaited = self.ctx.handle_value(awaited_h);
                let is_promise = awaited
                    .as_object()
                    .is_some_and(|o| o.as_promise().is_some());
                let promise = if is_promise {
                    awaited
                } else {
                    crate::promise::resolved_with(self.ctx, awaited)
                };
                let promise_h = self.ctx.handle(promise);

                // Both settlement paths resume the async object; a rejected
                // reason arrives with its exception bit set and re-enters
                // the unwinder at the suspension point.
                let async_val = self.ctx.handle_value(async_h);
                let promise = self.ctx.handle_value(promise_h);
                let promise_obj = promise.as_object().unwrap();
                let pdata = promise_obj.as_promise().unwrap();
                let mut resume_job =
                    crate::job::Job::new(Value::generator_next(), async_val.clone());
                match pdata.state {
                    crate::object::PromiseState::Pending => {
                        self.ctx.record_write(promise_obj, &async_val);
                        let reject_job =
                            crate::job::Job::new(Value::generator_next(), async_val);
                        pdata.on_fulfill.push_back(resume_job);
                        pdata.on_reject.push_back(reject_job);
                    }
                    crate::object::PromiseState::Fulfilled
                    | crate::object::PromiseState::Rejected => {
                        resume_job.add_arg(pdata.result_or_reason.clone());
                        self.ctx.microtasks().push_back(resume_job);
                    }
                }
            }
            Control::Return(value) => {
                let value_h = self.ctx.handle(value);
                let a = self.ctx.handle_value(async_h);
                let data = a.as_object().unwrap().as_generator().unwrap();
                data.state = GeneratorState::Closed;
                let res_promise = a.as_object().unwrap().as_async().unwrap().res_promise.clone();
                let value = self.ctx.handle_value(value_h);
                if value.is_exception() {
                    crate::promise::reject(self.ctx, res_promise, value.clear_exception());
                } else {
                    crate::promise::resolve(self.ctx, res_promise, value);
                }
            }
            Control::Yield(_) => {
                // Async bodies never yield; close defensively.
                let a = self.ctx.handle_value(async_h);
                a.as_object().unwrap().as_generator().unwrap().state = GeneratorState::Closed;
            }
        }
        let _ = self.ctx.close_handle_scope(scope, Value::undefined());
    }

    /// Restore a parked frame from its generator object and run it.
    fn run_suspendable(&mut self, gen_h: crate::context::Handle, sent: Value) -> Control {
        let gen_val = self.ctx.handle_value(gen_h);
        let gen_obj = gen_val.as_object().unwrap();
        let data = gen_obj.as_generator().unwrap();

        let func_val = data.function.clone();
        let def = match func_val.kind() {
            ValueKind::Object(obj) => obj.as_function().unwrap().def.clone(),
            ValueKind::FunctionDef(def) => def.clone(),
            _ => {
                return Control::Return(
                    self.ctx
                        .throw_error(ErrorKind::Internal, "generator lost its function"),
                );
            }
        };

        let started = data.pc != 0;
        let resume_pc = data.pc;
        let saved = std::mem::take(&mut data.stack);
        data.state = GeneratorState::Executing;

        let stack_ptr = self.ctx.stack_ptr();
        let bottom = self.ctx.stack().len();
        for value in saved {
            self.ctx.stack().push(value);
        }

        let mut frame = StackFrame::new(
            stack_ptr,
            bottom,
            func_val,
            Some(FrameDef::Function(def.clone())),
            Value::undefined(),
        );
        frame.pc = resume_pc;
        frame.generator = gen_val;

        let injected = if started {
            if sent.is_exception() {
                Some(sent)
            } else {
                frame.push(sent);
                None
            }
        } else {
            None
        };

        self.ctx.push_frame_root(&mut frame);
        let control = self.dispatch(&mut frame, &def, injected);
        self.ctx.pop_frame_root();
        self.ctx.stack().truncate(bottom);
        control
    }

    /// Build a `{value, done}` object.
    fn make_iter_result(&mut self, value: Value, done: bool) -> Value {
        let scope = self.ctx.open_handle_scope();
        let value_h = self.ctx.handle(value);
        let result = self.ctx.new_plain_object();
        let result_h = self.ctx.handle(result);

        let value_key = self.ctx.runtime().keys().value;
        let done_key = self.ctx.runtime().keys().done;
        let obj = self.ctx.handle_value(result_h).as_object().unwrap();
        let v = self.ctx.handle_value(value_h);
        self.ctx
            .define_property(obj, value_key, v, crate::object::PropertyFlags::DEFAULT);
        self.ctx.define_property(
            obj,
            done_key,
            Value::boolean(done),
            crate::object::PropertyFlags::DEFAULT,
        );
        let result = self.ctx.handle_value(result_h);
        self.ctx.close_handle_scope(scope, result)
    }

    // ==================== Dispatch ====================

    /// Interpret `frame` until it returns, yields, awaits, or an uncaught
    /// exception reaches the frame boundary (returned with its bit set).
    fn dispatch(
        &mut self,
        frame: &mut StackFrame,
        def: &FunctionDef,
        injected_exception: Option<Value>,
    ) -> Control {
        if let Some(exc) = injected_exception {
            if let Some(control) = self.raise(frame, def, frame.pc, exc) {
                return control;
            }
        }

        if self.ctx.jit().enabled() {
            crate::jit::run_baseline(self.ctx, frame, def);
        }

        let bc = &def.bytecode;
        loop {
            let op_pc = frame.pc;
            let opcode = bc.opcode(op_pc);
            frame.pc += 1;

            match opcode {
                // ==================== Constants ====================
                Opcode::CLoad0
                | Opcode::CLoad1
                | Opcode::CLoad2
                | Opcode::CLoad3
                | Opcode::CLoad4
                | Opcode::CLoad5 => {
                    let idx = (opcode.to_byte() - Opcode::CLoad0.to_byte()) as i32;
                    if let Some(control) = self.load_const(frame, def, op_pc, ConstIndex::new(idx))
                    {
                        return control;
                    }
                }
                Opcode::CLoad => {
                    let idx = bc.get_u8(frame.pc) as i32;
                    frame.pc += 1;
                    if let Some(control) = self.load_const(frame, def, op_pc, ConstIndex::new(idx))
                    {
                        return control;
                    }
                }
                Opcode::CLoadW => {
                    let idx = bc.get_u16(frame.pc) as i32;
                    frame.pc += 2;
                    if let Some(control) = self.load_const(frame, def, op_pc, ConstIndex::new(idx))
                    {
                        return control;
                    }
                }
                Opcode::CLoadD => {
                    let idx = bc.get_const_index(frame.pc);
                    frame.pc += 4;
                    if let Some(control) = self.load_const(frame, def, op_pc, idx) {
                        return control;
                    }
                }

                // ==================== Variables ====================
                Opcode::VLoad => {
                    let idx = bc.get_u8(frame.pc) as VarIndex;
                    frame.pc += 1;
                    frame.push(frame.local(idx));
                }
                Opcode::VLoad0 | Opcode::VLoad1 | Opcode::VLoad2 | Opcode::VLoad3 => {
                    let idx = (opcode.to_byte() - Opcode::VLoad0.to_byte()) as VarIndex;
                    frame.push(frame.local(idx));
                }
                Opcode::VStore => {
                    let idx = bc.get_u8(frame.pc) as VarIndex;
                    frame.pc += 1;
                    let value = frame.pop();
                    self.store_local_with_barrier(frame, idx, value);
                }
                Opcode::VStore0 | Opcode::VStore1 | Opcode::VStore2 | Opcode::VStore3 => {
                    let idx = (opcode.to_byte() - Opcode::VStore0.to_byte()) as VarIndex;
                    let value = frame.pop();
                    self.store_local_with_barrier(frame, idx, value);
                }

                // ==================== Globals & modules ====================
                Opcode::GetGlobal => {
                    let key = bc.get_const_index(frame.pc);
                    frame.pc += 4;
                    let global_this = self.ctx.runtime().global_this();
                    let value = if self.ctx.has_property(&global_this, key) {
                        self.ctx.get_property(&global_this, key)
                    } else {
                        let name = self
                            .ctx
                            .pool_value(key)
                            .map(|v| v.to_display_string())
                            .unwrap_or_else(|| "<unknown>".into());
                        self.ctx
                            .throw_error(ErrorKind::Reference, &format!("{name} is not defined"))
                    };
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }
                Opcode::GetModule | Opcode::GetModuleAsync => {
                    let key = bc.get_const_index(frame.pc);
                    frame.pc += 4;
                    let path = self
                        .ctx
                        .pool_value(key)
                        .and_then(|v| v.as_string().cloned());
                    let value = match path {
                        Some(path) => {
                            if opcode == Opcode::GetModule {
                                self.ctx.get_module(path.as_str())
                            } else {
                                self.ctx.get_module_async(path.as_str())
                            }
                        }
                        None => self
                            .ctx
                            .throw_error(ErrorKind::Internal, "module path is not a string"),
                    };
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }
                Opcode::Closure => {
                    let idx = bc.get_const_index(frame.pc);
                    frame.pc += 4;
                    let value = self.build_closure(frame, idx);
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }

                // ==================== Properties ====================
                Opcode::PropertyLoad => {
                    let key = bc.get_const_index(frame.pc);
                    frame.pc += 4;
                    let target = frame.pop();
                    let value = self.ctx.get_property(&target, key);
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }
                Opcode::PropertyStore => {
                    let key = bc.get_const_index(frame.pc);
                    frame.pc += 4;
                    let value = frame.pop();
                    let target = frame.pop();
                    let outcome = self.ctx.set_property(&target, key, value);
                    if outcome.is_exception() {
                        if let Some(control) = self.raise(frame, def, op_pc, outcome) {
                            return control;
                        }
                    }
                }
                Opcode::IndexedLoad => {
                    let key = frame.pop();
                    let target = frame.pop();
                    let value = self.ctx.get_computed(&target, &key);
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }
                Opcode::IndexedStore => {
                    let key = frame.pop();
                    let value = frame.pop();
                    let target = frame.pop();
                    let outcome = self.ctx.set_computed(&target, &key, value);
                    if outcome.is_exception() {
                        if let Some(control) = self.raise(frame, def, op_pc, outcome) {
                            return control;
                        }
                    }
                }

                // ==================== Stack ops ====================
                Opcode::Pop => {
                    frame.pop();
                }
                Opcode::Dump => {
                    let top = frame.get(-1);
                    frame.push(top);
                }
                Opcode::Swap => {
                    let a = frame.pop();
                    let b = frame.pop();
                    frame.push(a);
                    frame.push(b);
                }
                Opcode::Undefined => frame.push(Value::undefined()),
                Opcode::ToString => {
                    let value = frame.pop();
                    frame.push(Value::str(&value.to_display_string()));
                }

                // ==================== Arithmetic ====================
                Opcode::Add => {
                    let rhs = frame.pop();
                    let lhs = frame.pop();
                    let value = op_add(self.ctx, &lhs, &rhs);
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }
                Opcode::Inc => {
                    let value = frame.pop();
                    let value = op_add(self.ctx, &value, &Value::int(1));
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }
                Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                    let rhs = frame.pop();
                    let lhs = frame.pop();
                    let value = op_numeric(self.ctx, opcode, &lhs, &rhs);
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }
                Opcode::Neg => {
                    let value = frame.pop();
                    let value = op_neg(self.ctx, &value);
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }

                // ==================== Bitwise ====================
                Opcode::Shl
                | Opcode::Shr
                | Opcode::UShr
                | Opcode::BitAnd
                | Opcode::BitOr
                | Opcode::BitXor => {
                    let rhs = frame.pop();
                    let lhs = frame.pop();
                    let value = op_bitwise(self.ctx, opcode, &lhs, &rhs);
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }
                Opcode::BitNot => {
                    let value = frame.pop();
                    let value = match value.to_int32() {
                        Some(i) => Value::int(!i as i64),
                        None => self
                            .ctx
                            .throw_error(ErrorKind::Type, "operand is not coercible to a number"),
                    };
                    if let Some(control) = self.push_checked(frame, def, op_pc, value) {
                        return control;
                    }
                }

                // ==================== Comparison ====================
                Opcode::Eq => {
                    let rhs = frame.pop();
                    let lhs = frame.pop();
                    frame.push(Value::boolean(lhs.loose_equals(&rhs)));
                }
                Opcode::Ne => {
                    let rhs = frame.pop();
                    let lhs = frame.pop();
                    frame.push(Value::boolean(!lhs.loose_equals(&rhs)));
                }
                Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                    let rhs = frame.pop();
                    let lhs = frame.pop();
                    frame.push(op_compare(opcode, &lhs, &rhs));
                }

                // ==================== Control flow ====================
                Opcode::IfEq => {
                    let offset = bc.get_i16(frame.pc) as i64;
                    frame.pc += 2;
                    let condition = frame.pop();
                    if !condition.is_truthy() {
                        frame.pc = (frame.pc as i64 + offset) as Pc;
                    }
                }
                Opcode::Goto => {
                    let offset = bc.get_i16(frame.pc) as i64;
                    frame.pc += 2;
                    frame.pc = (frame.pc as i64 + offset) as Pc;
                }
                Opcode::Return => {
                    let value = frame.pop();
                    match pending_finally(def, op_pc) {
                        Some(entry) => {
                            frame.pending = Some(FinallyAction::Return(value));
                            frame.pc = entry.finally_start;
                        }
                        None => return Control::Return(value),
                    }
                }

                // ==================== Calls & this ====================
                Opcode::FunctionCall => {
                    let argc = frame.pop();
                    let func = frame.pop();
                    let this = frame.pop();
                    let argc = argc.as_int().unwrap_or(0).max(0) as u32;
                    self.call_internal(func, this, argc);
                    let result = frame.get(-1);
                    if result.is_exception() {
                        frame.pop();
                        if let Some(control) = self.raise(frame, def, op_pc, result) {
                            return control;
                        }
                    }
                }
                Opcode::New => {
                    let argc = frame.pop();
                    let ctor = frame.pop();
                    let argc = argc.as_int().unwrap_or(0).max(0) as u32;
                    let result = self.construct_on_stack(ctor, argc);
                    if let Some(control) = self.push_checked(frame, def, op_pc, result) {
                        return control;
                    }
                }
                Opcode::GetThis => frame.push(frame.this_val()),
                Opcode::GetOuterThis => {
                    let lexical = frame
                        .func_val
                        .as_object()
                        .and_then(|obj| obj.as_function().map(|f| f.env.lexical_this.clone()))
                        .unwrap_or_else(|| frame.this_val());
                    frame.push(lexical);
                }

                // ==================== Suspension ====================
                Opcode::Yield => {
                    let value = frame.pop();
                    self.save_suspension(frame);
                    return Control::Yield(value);
                }
                Opcode::GeneratorReturn => {
                    let value = frame.pop();
                    self.close_suspendable(frame);
                    return Control::Return(value);
                }
                Opcode::Await => {
                    let value = frame.pop();
                    self.save_suspension(frame);
                    return Control::Await(value);
                }
                Opcode::AsyncReturn => {
                    let value = frame.pop();
                    self.close_suspendable(frame);
                    return Control::Return(value);
                }

                // ==================== Exceptions ====================
                Opcode::TryBegin | Opcode::TryEnd => {
                    // Region boundaries are table-driven; nothing to do at
                    // runtime.
                }
                Opcode::Throw => {
                    let exc = frame.pop().with_exception();
                    if let Some(control) = self.raise(frame, def, op_pc, exc) {
                        return control;
                    }
                }
                Opcode::FinallyReturn => {
                    match frame.pending.take() {
                        Some(FinallyAction::Return(value)) => match pending_finally(def, op_pc) {
                            Some(entry) => {
                                frame.pending = Some(FinallyAction::Return(value));
                                frame.pc = entry.finally_start;
                            }
                            None => return Control::Return(value),
                        },
                        Some(FinallyAction::Rethrow(exc)) => {
                            if let Some(control) = self.raise(frame, def, op_pc, exc) {
                                return control;
                            }
                        }
                        Some(FinallyAction::Goto(target)) => frame.pc = target,
                        None => return Control::Return(frame.pop()),
                    }
                }
                Opcode::FinallyGoto => {
                    let offset = bc.get_i16(frame.pc) as i64;
                    frame.pc += 2;
                    match frame.pending.take() {
                        Some(FinallyAction::Return(value)) => match pending_finally(def, op_pc) {
                            Some(entry) => {
                                frame.pending = Some(FinallyAction::Return(value));
                                frame.pc = entry.finally_start;
                            }
                            None => return Control::Return(value),
                        },
                        Some(FinallyAction::Rethrow(exc)) => {
                            if let Some(control) = self.raise(frame, def, op_pc, exc) {
                                return control;
                            }
                        }
                        Some(FinallyAction::Goto(target)) => frame.pc = target,
                        None => frame.pc = (frame.pc as i64 + offset) as Pc,
                    }
                }

                // New/unlisted opcodes cannot appear: `Opcode::from_byte`
                // already rejected unknown bytes.
            }
        }
    }

    /// Store a frame-local, running the cell write barrier when the slot is
    /// an escaped-local (its owner may be an old-generation object).
    fn store_local_with_barrier(&mut self, frame: &StackFrame, idx: VarIndex, value: Value) {
        match frame.local_raw(idx).kind() {
            ValueKind::ClosureVar(cell) | ValueKind::ExportVar(cell) => {
                let cell = cell.clone();
                cell.set(value.clone());
                self.ctx.record_cell_write(&cell, &value);
            }
            _ => frame.store_local_raw(idx, value),
        }
    }

    /// Push a value, or enter the unwinder when it carries the exception
    /// bit.
    fn push_checked(
        &mut self,
        frame: &mut StackFrame,
        def: &FunctionDef,
        fault_pc: Pc,
        value: Value,
    ) -> Option<Control> {
        if value.is_exception() {
            return self.raise(frame, def, fault_pc, value);
        }
        frame.push(value);
        None
    }

    fn load_const(
        &mut self,
        frame: &mut StackFrame,
        def: &FunctionDef,
        fault_pc: Pc,
        idx: ConstIndex,
    ) -> Option<Control> {
        let value = match self.ctx.pool_value(idx) {
            Some(value) => value,
            None => self
                .ctx
                .throw_error(ErrorKind::Internal, &format!("invalid constant index {idx}")),
        };
        self.push_checked(frame, def, fault_pc, value)
    }

    /// Materialize a function object from the def at `idx`, capturing the
    /// current frame's closure variables.
    fn build_closure(&mut self, frame: &mut StackFrame, idx: ConstIndex) -> Value {
        let Some(def_val) = self.ctx.pool_value(idx) else {
            return self
                .ctx
                .throw_error(ErrorKind::Internal, "closure of an invalid constant");
        };
        let Some(def) = def_val.as_function_def().cloned() else {
            return self
                .ctx
                .throw_error(ErrorKind::Internal, "closure of a non-function constant");
        };

        let mut env = ClosureEnv::default();
        env.vars = vec![Value::undefined(); def.closure_var_table.len()];
        for (_, capture) in def.closure_var_table.iter() {
            let cell = if capture.parent_var_index != INVALID_VAR_INDEX {
                // Promote the enclosing frame's variable into a shared heap
                // cell; existing frame references are rewritten through it,
                // so every closure created at this site shares the cell.
                let current = frame.local_raw(capture.parent_var_index);
                match current.kind() {
                    ValueKind::ClosureVar(cell) | ValueKind::ExportVar(cell) => cell.clone(),
                    _ => {
                        let cell = ValueCell::new(current);
                        frame.store_local_raw(
                            capture.parent_var_index,
                            Value::closure_var(cell.clone()),
                        );
                        cell
                    }
                }
            } else {
                ValueCell::new(Value::undefined())
            };
            env.vars[capture.env_slot as usize] = Value::closure_var(cell);
        }
        if def.is_arrow() {
            env.lexical_this = frame.this_val();
        }

        self.ctx.new_function(def, env)
    }

    /// Park the frame's live state into its generator object.
    fn save_suspension(&mut self, frame: &mut StackFrame) {
        let Some(gen_obj) = frame.generator.as_object() else {
            return;
        };
        let data = gen_obj.as_generator().unwrap();
        data.pc = frame.pc;
        data.stack = frame.stack().drain_from(frame.bottom);
        data.state = GeneratorState::Suspended;
        // The (possibly tenured) generator now references stack values.
        for value in &data.stack {
            self.ctx.record_write(gen_obj, value);
        }
    }

    fn close_suspendable(&mut self, frame: &mut StackFrame) {
        if let Some(gen_obj) = frame.generator.as_object() {
            if let Some(data) = gen_obj.as_generator() {
                data.state = GeneratorState::Closed;
            }
        }
    }

    /// Exception unwinding within one frame, driven by the exception table.
    ///
    /// Returns `Some(Control)` when the exception leaves the frame.
    fn raise(
        &mut self,
        frame: &mut StackFrame,
        def: &FunctionDef,
        fault_pc: Pc,
        exc: Value,
    ) -> Option<Control> {
        let mut entries: Vec<&ExceptionEntry> = def
            .exception_table
            .entries()
            .iter()
            .filter(|e| e.contains(fault_pc))
            .collect();
        entries.sort_by_key(|e| e.end() - e.try_start);

        for entry in entries {
            if entry.located_in_try(fault_pc) && entry.has_catch() {
                // Reset the operand portion; locals survive.
                frame.stack().truncate(frame.bottom + def.var_count() as usize);
                if entry.catch_err_var != INVALID_VAR_INDEX {
                    self.store_local_with_barrier(frame, entry.catch_err_var, exc.clear_exception());
                }
                frame.pc = entry.catch_start;
                return None;
            }
            if !entry.located_in_finally(fault_pc) && entry.has_finally() {
                frame.stack().truncate(frame.bottom + def.var_count() as usize);
                frame.pending = Some(FinallyAction::Rethrow(exc));
                frame.pc = entry.finally_start;
                return None;
            }
            // A fault inside this entry's finally (or an uncatchable
            // region) searches outward.
        }
        Some(Control::Return(exc))
    }

    /// Single simple-op step shared with the baseline JIT stubs.
    pub(crate) fn step_simple(
        ctx: &mut Context,
        frame: &mut StackFrame,
        opcode: Opcode,
        imm: u32,
    ) -> StubOutcome {
        match opcode {
            Opcode::Pop => {
                frame.pop();
            }
            Opcode::Dump => {
                let top = frame.get(-1);
                frame.push(top);
            }
            Opcode::Swap => {
                let a = frame.pop();
                let b = frame.pop();
                frame.push(a);
                frame.push(b);
            }
            Opcode::Undefined => frame.push(Value::undefined()),
            Opcode::CLoad0
            | Opcode::CLoad1
            | Opcode::CLoad2
            | Opcode::CLoad3
            | Opcode::CLoad4
            | Opcode::CLoad5
            | Opcode::CLoad
            | Opcode::CLoadW
            | Opcode::CLoadD => {
                let idx = ConstIndex::from_wire(imm);
                match ctx.pool_value(idx) {
                    Some(value) => frame.push(value),
                    // Bad index: nothing consumed, let the interpreter
                    // produce the error.
                    None => return StubOutcome::Bailout,
                }
            }
            Opcode::VLoad | Opcode::VLoad0 | Opcode::VLoad1 | Opcode::VLoad2 | Opcode::VLoad3 => {
                frame.push(frame.local(imm as VarIndex));
            }
            Opcode::VStore
            | Opcode::VStore0
            | Opcode::VStore1
            | Opcode::VStore2
            | Opcode::VStore3 => {
                let value = frame.pop();
                match frame.local_raw(imm as VarIndex).kind() {
                    ValueKind::ClosureVar(cell) | ValueKind::ExportVar(cell) => {
                        let cell = cell.clone();
                        cell.set(value.clone());
                        ctx.record_cell_write(&cell, &value);
                    }
                    _ => frame.store_local_raw(imm as VarIndex, value),
                }
            }
            Opcode::Add | Opcode::Inc => {
                let (lhs, rhs) = if opcode == Opcode::Inc {
                    (frame.pop(), Value::int(1))
                } else {
                    let rhs = frame.pop();
                    (frame.pop(), rhs)
                };
                let value = op_add(ctx, &lhs, &rhs);
                if value.is_exception() {
                    // Restore the operands; the interpreter re-runs the op
                    // and unwinds properly.
                    frame.push(lhs);
                    if opcode == Opcode::Add {
                        frame.push(rhs);
                    }
                    return StubOutcome::Bailout;
                }
                frame.push(value);
            }
            Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let value = op_numeric(ctx, opcode, &lhs, &rhs);
                if value.is_exception() {
                    frame.push(lhs);
                    frame.push(rhs);
                    return StubOutcome::Bailout;
                }
                frame.push(value);
            }
            Opcode::Eq | Opcode::Ne => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                let eq = lhs.loose_equals(&rhs);
                frame.push(Value::boolean(if opcode == Opcode::Eq { eq } else { !eq }));
            }
            Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let rhs = frame.pop();
                let lhs = frame.pop();
                frame.push(op_compare(opcode, &lhs, &rhs));
            }
            _ => return StubOutcome::Bailout,
        }
        StubOutcome::Continue
    }
}

/// Innermost protected region whose finally has not yet run for control
/// leaving from `pc`.
fn pending_finally(def: &FunctionDef, pc: Pc) -> Option<&ExceptionEntry> {
    def.exception_table
        .entries()
        .iter()
        .filter(|e| e.contains(pc) && e.has_finally() && !e.located_in_finally(pc))
        .min_by_key(|e| e.end() - e.try_start)
}

/// Normalize the argument window into the callee's local layout: extra
/// arguments are dropped, missing locals zero-filled with `undefined`.
fn adjust_locals(stack: &mut Stack, bottom: usize, argc: u32, def: &FunctionDef) {
    let param_count = def.param_count as usize;
    if argc as usize > param_count {
        stack.truncate(bottom + param_count);
    }
    let var_count = (def.var_count() as usize).max(param_count);
    while stack.len() < bottom + var_count {
        stack.push(Value::undefined());
    }
}

// ==================== Operator helpers ====================

/// `Add`: string concatenation when either side is a string, numeric
/// addition otherwise (integer fast path with overflow fallback).
pub(crate) fn op_add(ctx: &mut Context, lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_string() || rhs.is_string() {
        let text = format!("{}{}", lhs.to_display_string(), rhs.to_display_string());
        return Value::str(&text);
    }
    if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
        return match a.checked_add(b) {
            Some(sum) => Value::int(sum),
            None => Value::float(a as f64 + b as f64),
        };
    }
    match (lhs.to_number(), rhs.to_number()) {
        (Some(a), Some(b)) => Value::float(a + b),
        _ => ctx.throw_error(ErrorKind::Type, "operands are not addable"),
    }
}

/// `Sub`/`Mul`/`Div`/`Mod` with JS coercion; integer results stay integers
/// when exact.
pub(crate) fn op_numeric(ctx: &mut Context, opcode: Opcode, lhs: &Value, rhs: &Value) -> Value {
    if let (Some(a), Some(b)) = (lhs.as_int(), rhs.as_int()) {
        match opcode {
            Opcode::Sub => {
                if let Some(v) = a.checked_sub(b) {
                    return Value::int(v);
                }
            }
            Opcode::Mul => {
                if let Some(v) = a.checked_mul(b) {
                    return Value::int(v);
                }
            }
            Opcode::Div => {
                if b != 0 && a % b == 0 {
                    return Value::int(a / b);
                }
            }
            Opcode::Mod => {
                if b != 0 {
                    return Value::int(a % b);
                }
            }
            _ => {}
        }
    }
    let (Some(a), Some(b)) = (lhs.to_number(), rhs.to_number()) else {
        return ctx.throw_error(ErrorKind::Type, "operands are not numbers");
    };
    let result = match opcode {
        Opcode::Sub => a - b,
        Opcode::Mul => a * b,
        Opcode::Div => a / b,
        Opcode::Mod => a % b,
        _ => unreachable!("non-numeric opcode routed to op_numeric"),
    };
    Value::float(result)
}

/// Unary negation.
pub(crate) fn op_neg(ctx: &mut Context, value: &Value) -> Value {
    if let Some(i) = value.as_int() {
        if let Some(v) = i.checked_neg() {
            return Value::int(v);
        }
    }
    match value.to_number() {
        Some(f) => Value::float(-f),
        None => ctx.throw_error(ErrorKind::Type, "operand is not a number"),
    }
}

/// 32-bit integer bitwise/shift semantics.
pub(crate) fn op_bitwise(ctx: &mut Context, opcode: Opcode, lhs: &Value, rhs: &Value) -> Value {
    let (Some(a), Some(b)) = (lhs.to_int32(), rhs.to_int32()) else {
        return ctx.throw_error(ErrorKind::Type, "operands are not coercible to numbers");
    };
    let shift = (b as u32) & 31;
    let result: i64 = match opcode {
        Opcode::Shl => (a << shift) as i64,
        Opcode::Shr => (a >> shift) as i64,
        Opcode::UShr => ((a as u32) >> shift) as i64,
        Opcode::BitAnd => (a & b) as i64,
        Opcode::BitOr => (a | b) as i64,
        Opcode::BitXor => (a ^ b) as i64,
        _ => unreachable!("non-bitwise opcode routed to op_bitwise"),
    };
    Value::int(result)
}

/// Relational comparison: strings lexicographically, everything else
/// numerically (`NaN` comparisons are false).
pub(crate) fn op_compare(opcode: Opcode, lhs: &Value, rhs: &Value) -> Value {
    if let (Some(a), Some(b)) = (lhs.as_string(), rhs.as_string()) {
        let ord = a.as_str().cmp(b.as_str());
        return Value::boolean(match opcode {
            Opcode::Lt => ord.is_lt(),
            Opcode::Le => ord.is_le(),
            Opcode::Gt => ord.is_gt(),
            Opcode::Ge => ord.is_ge(),
            _ => false,
        });
    }
    let (Some(a), Some(b)) = (lhs.to_number(), rhs.to_number()) else {
        return Value::boolean(false);
    };
    Value::boolean(match opcode {
        Opcode::Lt => a < b,
        Opcode::Le => a <= b,
        Opcode::Gt => a > b,
        Opcode::Ge => a >= b,
        _ => false,
    })
}
