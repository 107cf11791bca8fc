//! The `Marten` facade
//!
//! Owns a runtime and its default context and exposes the embedder
//! surface: run compiled functions and modules end-to-end, draining the
//! microtask queue between synchronous turns the way the event loop would.

use std::sync::Arc;

use marten_vm_bytecode::{FunctionDef, ModuleDef};
use marten_vm_core::error::{VmError, VmResult};
use marten_vm_core::{Context, ModuleManager, Runtime, Value};

/// An embedded Marten engine: one runtime, one context.
pub struct Marten {
    runtime: Arc<Runtime>,
    ctx: Context,
}

impl Marten {
    /// Engine without a module manager.
    pub fn new() -> Self {
        let runtime = Runtime::new();
        let ctx = Context::new(runtime.clone());
        Self { runtime, ctx }
    }

    /// Engine with a module manager installed.
    pub fn with_module_manager(manager: Arc<dyn ModuleManager>) -> Self {
        let runtime = Runtime::with_module_manager(manager);
        let ctx = Context::new(runtime.clone());
        Self { runtime, ctx }
    }

    /// The owning runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The default context.
    pub fn context(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Call a compiled function as a complete turn: invoke, then drain
    /// microtasks.
    ///
    /// The returned value carries the exception bit when the call threw.
    pub fn call(&mut self, def: &Arc<FunctionDef>, args: &[Value]) -> Value {
        let func = Value::function_def(def.clone());
        self.call_value(&func, Value::undefined(), args)
    }

    /// Call any callable value as a complete turn.
    pub fn call_value(&mut self, func: &Value, this: Value, args: &[Value]) -> Value {
        // Keep the result rooted while the drain runs: microtask execution
        // can move it.
        let scope = self.ctx.open_handle_scope();
        let result = self.ctx.call_function(func, this, args);
        let result_h = self.ctx.handle(result);
        self.ctx.run_microtasks();
        let result = self.ctx.handle_value(result_h);
        self.ctx.close_handle_scope(scope, result)
    }

    /// Run a module body as a complete turn; returns `(namespace,
    /// completion)`.
    pub fn run_module(&mut self, def: Arc<ModuleDef>) -> (Value, Value) {
        let scope = self.ctx.open_handle_scope();
        let (module, completion) = self.ctx.instantiate_module(def);
        let module_h = self.ctx.handle(module);
        let completion_h = self.ctx.handle(completion);
        self.ctx.run_microtasks();
        let module = self.ctx.handle_value(module_h);
        let completion = self.ctx.handle_value(completion_h);
        let _ = self.ctx.close_handle_scope(scope, Value::undefined());
        (module, completion)
    }

    /// Host-facing variant of [`call`](Self::call) that maps an uncaught
    /// exception to a [`VmError`].
    pub fn try_call(&mut self, def: &Arc<FunctionDef>, args: &[Value]) -> VmResult<Value> {
        let result = self.call(def, args);
        if result.is_exception() {
            Err(VmError::Uncaught(result.to_display_string()))
        } else {
            Ok(result)
        }
    }

    /// Drain the microtask queue now.
    pub fn run_microtasks(&mut self) {
        self.ctx.run_microtasks();
    }

    /// Read a property of the global `this` object.
    pub fn global(&mut self, name: &str) -> Value {
        let key = self.runtime.intern(Value::str(name));
        let global_this = self.runtime.global_this();
        self.ctx.get_property(&global_this, key)
    }

    /// Force a collection (`full` escalates to Mark-Compact).
    pub fn collect_garbage(&mut self, full: bool) {
        self.ctx.collect_garbage(full);
    }

    /// Turn the baseline JIT tier on or off.
    pub fn set_jit_enabled(&mut self, enabled: bool) {
        self.ctx.jit().set_enabled(enabled);
    }
}

impl Default for Marten {
    fn default() -> Self {
        Self::new()
    }
}
