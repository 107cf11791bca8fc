//! The execution context
//!
//! A [`Context`] owns everything one thread of JS execution needs: the GC
//! heap, the local constant pool, the per-context shape manager, the operand
//! stack, the microtask queue and the handle stack. The interpreter and all
//! allocations run through it.
//!
//! The context is also the collector's root provider: roots are discovered
//! on demand as the union of the operand stack, the handle stack, queued
//! microtasks, registered live frames, embedder globals and the runtime's
//! own values (global `this`, class table, well-known symbols).

use std::sync::Arc;

use rustc_hash::FxHashMap;

use marten_vm_bytecode::{ConstIndex, FunctionDef, ModuleDef};
use marten_vm_gc::{GcHeader, GcHeap, GcTrace, GcVTable, RootSet, total_size};

use crate::class_def::ClassId;
use crate::const_pool::LocalConstPool;
use crate::error::ErrorKind;
use crate::interpreter::{Stack, StackFrame, Vm};
use crate::job::JobQueue;
use crate::object::{
    ARRAY_VTABLE, ArrayData, ClosureEnv, FUNCTION_VTABLE, FunctionData, GENERATOR_VTABLE,
    GeneratorData, GeneratorState, MODULE_VTABLE, ModuleData, OBJECT_VTABLE, ObjectData,
    ObjectRef, PropertyFlags, PropertySlot,
};
use crate::runtime::Runtime;
use crate::shape::{PoolKeys, ShapeManager, ShapeProperty};
use crate::string::JsSymbol;
use crate::value::{Value, ValueCell, ValueKind};

/// An open handle scope: the saved depth of the context's handle stack.
///
/// Handles created after `open_handle_scope` are roots until the scope is
/// closed; [`Context::close_handle_scope`] truncates back to this depth,
/// transferring one result value out.
#[derive(Debug, Clone, Copy)]
pub struct HandleScope {
    base: usize,
}

/// A rooted value: an index into the context's handle stack.
///
/// Dereference with [`Context::handle_value`] — always re-read after an
/// operation that may allocate, because a moving collection updates the
/// handle stack, not copies taken out of it.
#[derive(Debug, Clone, Copy)]
pub struct Handle(usize);

/// Per-thread execution state.
pub struct Context {
    runtime: Arc<Runtime>,
    heap: GcHeap,
    local_pool: LocalConstPool,
    shape_manager: ShapeManager,
    /// Boxed so frames can hold a stable pointer across context moves.
    stack: Box<Stack>,
    microtasks: JobQueue,
    handle_stack: Vec<Value>,
    frame_roots: Vec<*mut StackFrame>,
    global_roots: Vec<*mut Value>,
    /// Payloads under construction in [`Context::allocate`]; traced so a
    /// collection triggered by the allocation itself cannot orphan them.
    payload_roots: Vec<*mut dyn GcTrace>,
    /// Escaped-local cells recently written with young references. Cells
    /// are reached only through their owning objects, which may be old and
    /// outside the remembered set — this list is the write barrier for
    /// them. Cells stay listed until their payload is no longer young.
    dirty_cells: Vec<ValueCell>,
    symbol_registry: FxHashMap<String, Value>,
    jit: crate::jit::JitManager,
}

// SAFETY: a context is confined to a single VM thread; the raw frame and
// global-root pointers it holds reference data on that thread's call stack.
unsafe impl Send for Context {}

impl Context {
    /// Create a context and, for the runtime's first context, install the
    /// built-ins (class table, global `this`, well-known symbols).
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let shape_manager = ShapeManager::with_root(runtime.shape_root());
        let mut ctx = Self {
            heap: GcHeap::new(),
            local_pool: LocalConstPool::new(),
            shape_manager,
            stack: Box::new(Stack::new()),
            microtasks: JobQueue::new(),
            handle_stack: Vec::new(),
            frame_roots: Vec::new(),
            global_roots: Vec::new(),
            payload_roots: Vec::new(),
            dirty_cells: Vec::new(),
            symbol_registry: FxHashMap::default(),
            jit: crate::jit::JitManager::new(),
            runtime,
        };
        if ctx.runtime.global_this().is_undefined() {
            crate::intrinsics::install(&mut ctx);
        }
        ctx
    }

    /// The owning runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// The operand stack.
    pub fn stack(&mut self) -> &mut Stack {
        &mut self.stack
    }

    /// Stable pointer to the operand stack (frames index through it).
    pub(crate) fn stack_ptr(&mut self) -> *mut Stack {
        &mut *self.stack as *mut Stack
    }

    /// The microtask queue.
    pub fn microtasks(&mut self) -> &mut JobQueue {
        &mut self.microtasks
    }

    /// The local constant pool.
    pub fn local_pool(&mut self) -> &mut LocalConstPool {
        &mut self.local_pool
    }

    /// The per-context shape manager.
    pub fn shape_manager(&self) -> &ShapeManager {
        &self.shape_manager
    }

    /// The GC heap (statistics, configuration).
    pub fn heap(&self) -> &GcHeap {
        &self.heap
    }

    /// Key resolver over this context's pool pair.
    pub fn key_resolver(&self) -> PoolKeys<'_> {
        PoolKeys {
            global: self.runtime.global_pool(),
            local: &self.local_pool,
        }
    }

    // ==================== Constant pools ====================

    /// Read a pool slot by signed index.
    pub fn pool_value(&self, idx: ConstIndex) -> Option<Value> {
        if idx.is_global() {
            self.runtime.global_pool().get(idx).cloned()
        } else if idx.is_local() {
            self.local_pool.get(idx).cloned()
        } else {
            None
        }
    }

    /// Intern a runtime-created string key: reuse a global slot when the
    /// compiler already interned the content, otherwise the local pool.
    pub fn intern_string(&mut self, text: &str) -> ConstIndex {
        let value = Value::str(text);
        if let Some(idx) = self.runtime.global_pool().find(&value) {
            return idx;
        }
        self.local_pool.insert(value)
    }

    /// Intern an arbitrary poolable value the same way.
    pub fn intern_value(&mut self, value: Value) -> ConstIndex {
        if let Some(idx) = self.runtime.global_pool().find(&value) {
            return idx;
        }
        self.local_pool.insert(value)
    }

    // ==================== GC ====================

    /// Force a collection; `full` escalates to Mark-Compact.
    pub fn collect_garbage(&mut self, full: bool) {
        self.collect(full, 0);
    }

    fn collect(&mut self, full: bool, min_free: usize) {
        {
            let heap = &mut self.heap;
            let stack = &mut self.stack;
            let microtasks = &mut self.microtasks;
            let handle_stack = &mut self.handle_stack;
            let frame_roots = &self.frame_roots;
            let global_roots = &self.global_roots;
            let payload_roots = self.payload_roots.clone();
            let dirty_cells = &mut self.dirty_cells;
            let runtime = &self.runtime;
            let mut roots = ContextRoots {
                stack,
                microtasks,
                handle_stack,
                frame_roots,
                global_roots,
                payload_roots,
                dirty_cells,
                runtime,
            };
            // SAFETY: `roots` visits every live slot (operand stack,
            // handles, jobs, registered frames, embedder globals, dirty
            // cells, runtime values).
            unsafe {
                heap.scavenge(&mut roots);
                if full {
                    heap.mark_compact(&mut roots, min_free);
                }
            }
        }
        // A cell leaves the dirty list once nothing young remains behind
        // it (promotion clears it; a fresh young write re-adds it).
        let heap = &self.heap;
        self.dirty_cells
            .retain(|cell| cell_holds_young(heap, cell));
    }

    /// Allocate a heap payload, collecting (minor, then major with growth)
    /// under memory pressure.
    ///
    /// The payload itself is traced as a root while collections run, so
    /// heap references it already carries survive and are rewritten.
    pub(crate) fn allocate<T: GcTrace + 'static>(
        &mut self,
        vtable: &'static GcVTable,
        mut payload: T,
    ) -> ObjectRef {
        let needed = total_size(size_of::<T>());
        {
            let payload_ptr: *mut dyn GcTrace = &mut payload;
            self.payload_roots.push(payload_ptr);
            if self.heap.should_scavenge() || !self.heap.has_capacity(needed) {
                self.collect(false, 0);
            }
            if !self.heap.has_capacity(needed) {
                self.collect(true, needed);
            }
            self.payload_roots.pop();
        }
        // SAFETY: vtables are paired with their payload type at the call
        // sites in this module only.
        match unsafe { self.heap.allocate(vtable, payload) } {
            Ok(header) => ObjectRef::from_raw(header),
            Err(_) => panic!("out of memory: heap exhausted after full collection"),
        }
    }

    /// Record a mutation that may create an old→young reference.
    pub fn record_write(&mut self, parent: ObjectRef, value: &Value) {
        let heap = &mut self.heap;
        let mut probe = value.clone();
        probe.trace(&mut |slot| heap.write_barrier(parent.raw(), *slot));
    }

    /// Barrier for writes through an escaped-local or export cell: the
    /// cell's owner may be old, so young payloads are tracked directly.
    pub(crate) fn record_cell_write(&mut self, cell: &ValueCell, value: &Value) {
        let mut is_young = false;
        let heap = &self.heap;
        let mut probe = value.clone();
        probe.trace(&mut |slot| {
            if heap.is_young(*slot) {
                is_young = true;
            }
        });
        if is_young {
            self.dirty_cells.push(cell.clone());
        }
    }

    // ==================== Handle scopes ====================

    /// Open a handle scope at the current depth.
    pub fn open_handle_scope(&mut self) -> HandleScope {
        HandleScope {
            base: self.handle_stack.len(),
        }
    }

    /// Root `value` in the current scope.
    pub fn handle(&mut self, value: Value) -> Handle {
        self.handle_stack.push(value);
        Handle(self.handle_stack.len() - 1)
    }

    /// Current value of a handle (GC keeps it up to date).
    pub fn handle_value(&self, handle: Handle) -> Value {
        self.handle_stack[handle.0].clone()
    }

    /// Overwrite a handle's value in place.
    pub fn replace_handle(&mut self, handle: Handle, value: Value) {
        self.handle_stack[handle.0] = value;
    }

    /// Close the scope, transferring `result` out.
    pub fn close_handle_scope(&mut self, scope: HandleScope, result: Value) -> Value {
        self.handle_stack.truncate(scope.base);
        result
    }

    // ==================== Frame & global roots ====================

    pub(crate) fn push_frame_root(&mut self, frame: *mut StackFrame) {
        self.frame_roots.push(frame);
    }

    pub(crate) fn pop_frame_root(&mut self) {
        self.frame_roots.pop();
    }

    pub(crate) fn frame_roots(&self) -> &[*mut StackFrame] {
        &self.frame_roots
    }

    /// Pin an embedder-owned value as a GC root.
    ///
    /// # Safety
    /// `root` must stay valid until [`remove_global_root`](Self::remove_global_root).
    pub unsafe fn add_global_root(&mut self, root: *mut Value) {
        self.global_roots.push(root);
    }

    /// Unpin an embedder root.
    pub fn remove_global_root(&mut self, root: *mut Value) {
        self.global_roots.retain(|&r| r != root);
    }

    // ==================== Object constructors ====================

    /// Fresh plain object (class prototype applies).
    pub fn new_plain_object(&mut self) -> Value {
        self.new_object_with_class(ClassId::Object)
    }

    /// Fresh object of `class_id` with the empty shape.
    pub fn new_object_with_class(&mut self, class_id: ClassId) -> Value {
        let data = ObjectData::new(class_id, self.shape_manager.empty_shape());
        Value::object(self.allocate(&OBJECT_VTABLE, data))
    }

    /// Fresh native-function object over a host callable.
    pub fn new_native_function(&mut self, func: crate::value::CppFunction) -> Value {
        let data = crate::object::NativeFunctionData {
            base: ObjectData::new(ClassId::NativeFunction, self.shape_manager.empty_shape()),
            func,
        };
        Value::object(self.allocate(&crate::object::NATIVE_FUNCTION_VTABLE, data))
    }

    /// Fresh array over `elements`.
    pub fn new_array(&mut self, elements: Vec<Value>) -> Value {
        let data = ArrayData {
            base: ObjectData::new(ClassId::ArrayObject, self.shape_manager.empty_shape()),
            elements,
        };
        Value::object(self.allocate(&ARRAY_VTABLE, data))
    }

    /// Materialize a function object over `def` with its captured
    /// environment.
    ///
    /// Ordinary functions (not arrows, generators or async) also get their
    /// own `prototype` object with a `constructor` back-pointer.
    pub fn new_function(&mut self, def: Arc<FunctionDef>, env: ClosureEnv) -> Value {
        let wants_prototype = !def.is_arrow() && !def.is_generator() && !def.is_async();
        let data = FunctionData {
            base: ObjectData::new(ClassId::FunctionObject, self.shape_manager.empty_shape()),
            def,
            env,
        };
        let func = Value::object(self.allocate(&FUNCTION_VTABLE, data));
        if !wants_prototype {
            return func;
        }

        let scope = self.open_handle_scope();
        let func_h = self.handle(func);
        let proto = self.new_plain_object();
        let proto_h = self.handle(proto);

        let constructor_key = self.runtime.keys().constructor;
        let prototype_key = self.runtime.keys().prototype;
        let proto_obj = self.handle_value(proto_h).as_object().unwrap();
        let func_val = self.handle_value(func_h);
        self.define_property(
            proto_obj,
            constructor_key,
            func_val,
            PropertyFlags::WRITABLE.union(PropertyFlags::CONFIGURABLE),
        );
        let func_obj = self.handle_value(func_h).as_object().unwrap();
        let proto_val = self.handle_value(proto_h);
        self.define_property(
            func_obj,
            prototype_key,
            proto_val,
            PropertyFlags::WRITABLE,
        );
        let result = self.handle_value(func_h);
        self.close_handle_scope(scope, result)
    }

    /// Fresh generator object parked at PC 0 with its locals saved.
    pub fn new_generator_object(&mut self, function: Value, stack: Vec<Value>) -> Value {
        let data = GeneratorData {
            base: ObjectData::new(ClassId::GeneratorObject, self.shape_manager.empty_shape()),
            function,
            pc: 0,
            stack,
            state: GeneratorState::Suspended,
        };
        Value::object(self.allocate(&GENERATOR_VTABLE, data))
    }

    /// Fresh async-function object with its embedded result promise.
    pub fn new_async_object(&mut self, function: Value, stack: Vec<Value>) -> Value {
        let scope = self.open_handle_scope();
        let promise = crate::promise::new_promise(self);
        let promise_h = self.handle(promise);
        let function_h = self.handle(function);
        let data = crate::object::AsyncData {
            generator: GeneratorData {
                base: ObjectData::new(ClassId::AsyncObject, self.shape_manager.empty_shape()),
                function: self.handle_value(function_h),
                pc: 0,
                stack,
                state: GeneratorState::Suspended,
            },
            res_promise: self.handle_value(promise_h),
        };
        let result = Value::object(self.allocate(&crate::object::ASYNC_VTABLE, data));
        self.close_handle_scope(scope, result)
    }

    /// Fresh module object with one live cell per export slot.
    pub fn new_module_object(&mut self, def: Arc<ModuleDef>) -> Value {
        let export_vars = (0..def.export_var_def_table.len())
            .map(|_| ValueCell::new(Value::undefined()))
            .collect();
        let data = ModuleData {
            base: ObjectData::new(ClassId::ModuleObject, self.shape_manager.empty_shape()),
            def,
            export_vars,
        };
        Value::object(self.allocate(&MODULE_VTABLE, data))
    }

    // ==================== Symbols ====================

    /// Mint a fresh, unregistered symbol.
    pub fn new_symbol(&mut self, description: Option<String>) -> Value {
        let id = self.runtime.next_symbol_id();
        Value::symbol(JsSymbol::new(id, description))
    }

    /// `Symbol.for`: intern into the context's symbol table.
    pub fn symbol_for(&mut self, name: &str) -> Value {
        if let Some(existing) = self.symbol_registry.get(name) {
            return existing.clone();
        }
        let symbol = self.new_symbol(Some(name.to_string()));
        self.symbol_registry
            .insert(name.to_string(), symbol.clone());
        symbol
    }

    // ==================== Property access ====================

    /// Read `target[key]`; returns an exception value on a type error.
    pub fn get_property(&mut self, target: &Value, key: ConstIndex) -> Value {
        match target.kind() {
            ValueKind::Object(obj) => self.get_object_property(target.clone(), *obj, key),
            ValueKind::String(s) => {
                if key == self.runtime.keys().length {
                    return Value::int(s.as_str().chars().count() as i64);
                }
                let proto = self.class_prototype(ClassId::StringObject);
                match proto.as_object() {
                    Some(proto_obj) => self.get_object_property(target.clone(), proto_obj, key),
                    None => Value::undefined(),
                }
            }
            ValueKind::Undefined | ValueKind::Null => self.throw_error(
                ErrorKind::Type,
                &format!(
                    "cannot read properties of {}",
                    target.to_display_string()
                ),
            ),
            _ => Value::undefined(),
        }
    }

    fn class_prototype(&self, class_id: ClassId) -> Value {
        self.runtime.class_defs().borrow().prototype(class_id)
    }

    fn get_object_property(&mut self, receiver: Value, obj: ObjectRef, key: ConstIndex) -> Value {
        // Module namespaces read through their export cells.
        if let Some(module) = obj.as_module() {
            if let Some(export) = module.def.export_var_def_table.find(key) {
                return module.export_vars[export.export_slot as usize].get();
            }
        }
        // Array length is synthesized from the dense storage.
        if key == self.runtime.keys().length {
            if let Some(array) = obj.as_array() {
                return Value::int(array.elements.len() as i64);
            }
        }

        let mut cur = obj;
        loop {
            let found = {
                let keys = self.key_resolver();
                cur.object().find_own(key, &keys)
            };
            if let Some(slot_idx) = found {
                let slot = cur.object().slot(slot_idx).clone();
                if slot.flags.contains(PropertyFlags::IS_GETTER) {
                    return self.call_function(&slot.value, receiver, &[]);
                }
                if slot.flags.contains(PropertyFlags::IS_SETTER) {
                    return Value::undefined();
                }
                return slot.value;
            }
            match self.next_in_chain(cur) {
                Some(next) => cur = next,
                None => return Value::undefined(),
            }
        }
    }

    /// Next object on the prototype chain: the explicit `__proto__` when
    /// one was stored, otherwise the prototype of the object's class.
    fn next_in_chain(&self, obj: ObjectRef) -> Option<ObjectRef> {
        match obj.object().prototype() {
            Some(proto) => proto.as_object(),
            None => {
                let proto = self.class_prototype(obj.class_id());
                let next = proto.as_object()?;
                // The chain root is its own class prototype.
                (next != obj).then_some(next)
            }
        }
    }

    /// Does `target` (or its prototype chain) have `key`?
    pub fn has_property(&mut self, target: &Value, key: ConstIndex) -> bool {
        let Some(obj) = target.as_object() else {
            return false;
        };
        if let Some(module) = obj.as_module() {
            if module.def.export_var_def_table.find(key).is_some() {
                return true;
            }
        }
        if key == self.runtime.keys().length && obj.as_array().is_some() {
            return true;
        }
        let mut cur = obj;
        loop {
            let found = {
                let keys = self.key_resolver();
                cur.object().find_own(key, &keys)
            };
            if found.is_some() {
                return true;
            }
            match self.next_in_chain(cur) {
                Some(next) => cur = next,
                None => return false,
            }
        }
    }

    /// Write `target[key] = value`; returns `undefined` or an exception.
    ///
    /// Non-writable and non-extensible misses are silently ignored.
    pub fn set_property(&mut self, target: &Value, key: ConstIndex, value: Value) -> Value {
        let obj = match target.kind() {
            ValueKind::Object(obj) => *obj,
            ValueKind::Undefined | ValueKind::Null => {
                return self.throw_error(
                    ErrorKind::Type,
                    &format!(
                        "cannot set properties of {}",
                        target.to_display_string()
                    ),
                );
            }
            // Primitive receivers silently drop writes.
            _ => return Value::undefined(),
        };

        // Module namespaces write through their export cells.
        if let Some(module) = obj.as_module() {
            if let Some(export) = module.def.export_var_def_table.find(key) {
                let cell = module.export_vars[export.export_slot as usize].clone();
                cell.set(value.clone());
                self.record_cell_write(&cell, &value);
                return Value::undefined();
            }
        }
        // Array length writes resize the dense storage.
        if key == self.runtime.keys().length {
            if let Some(array) = obj.as_array() {
                if let Some(new_len) = value.as_f64() {
                    if new_len < 0.0 || new_len.fract() != 0.0 {
                        return self.throw_error(ErrorKind::Range, "invalid array length");
                    }
                    if array.base.flags().is_frozen() || array.base.flags().is_sealed() {
                        return Value::undefined();
                    }
                    array.elements.resize(new_len as usize, Value::undefined());
                    return Value::undefined();
                }
            }
        }

        // Own slot: data write or accessor dispatch.
        let own = {
            let keys = self.key_resolver();
            obj.object().find_own(key, &keys)
        };
        if let Some(slot_idx) = own {
            let slot = obj.object().slot(slot_idx).clone();
            if slot.flags.contains(PropertyFlags::IS_SETTER) {
                return self.call_function(&slot.value, target.clone(), &[value]);
            }
            if slot.flags.contains(PropertyFlags::IS_GETTER) {
                // Getter without setter: silent ignore.
                return Value::undefined();
            }
            if !slot.flags.contains(PropertyFlags::WRITABLE) {
                return Value::undefined();
            }
            self.record_write(obj, &value);
            obj.object_mut().slot_mut(slot_idx).value = value;
            return Value::undefined();
        }

        // Inherited accessor?
        let mut cur = obj;
        while let Some(next) = self.next_in_chain(cur) {
            cur = next;
            let found = {
                let keys = self.key_resolver();
                cur.object().find_own(key, &keys)
            };
            if let Some(slot_idx) = found {
                let slot = cur.object().slot(slot_idx).clone();
                if slot.flags.contains(PropertyFlags::IS_SETTER) {
                    return self.call_function(&slot.value, target.clone(), &[value]);
                }
                if slot.flags.contains(PropertyFlags::IS_GETTER) {
                    return Value::undefined();
                }
                // Shadow inherited data properties with an own slot.
                break;
            }
        }

        if !obj.object().flags().is_extensible() {
            return Value::undefined();
        }
        self.add_own_property(obj, key, value, PropertyFlags::DEFAULT);
        Value::undefined()
    }

    /// Add or overwrite a property, bypassing writability (the
    /// `defineProperty` path). Additions still require extensibility.
    pub fn define_property(
        &mut self,
        obj: ObjectRef,
        key: ConstIndex,
        value: Value,
        flags: PropertyFlags,
    ) -> bool {
        let own = {
            let keys = self.key_resolver();
            obj.object().find_own(key, &keys)
        };
        if let Some(slot_idx) = own {
            self.record_write(obj, &value);
            let slot = obj.object_mut().slot_mut(slot_idx);
            slot.value = value;
            slot.flags = flags;
            return true;
        }
        if !obj.object().flags().is_extensible() {
            return false;
        }
        self.add_own_property(obj, key, value, flags);
        true
    }

    fn add_own_property(&mut self, obj: ObjectRef, key: ConstIndex, value: Value, flags: PropertyFlags) {
        // Keep local-pool keys alive as long as any shape can name them.
        if key.is_local() {
            self.local_pool.reference(key);
        }
        let slot_idx = {
            let keys = PoolKeys {
                global: self.runtime.global_pool(),
                local: &self.local_pool,
            };
            let mut shape = obj.object().shape().clone();
            let idx = self
                .shape_manager
                .add_property(&mut shape, ShapeProperty::new(key), &keys);
            obj.object_mut().set_shape(shape);
            idx
        };
        self.record_write(obj, &value);
        obj.object_mut().push_slot(slot_idx, PropertySlot { value, flags });
    }

    /// Delete an own property. Non-configurable slots (and frozen/sealed
    /// objects) refuse silently.
    pub fn delete_property(&mut self, obj: ObjectRef, key: ConstIndex) -> bool {
        let own = {
            let keys = self.key_resolver();
            obj.object().find_own(key, &keys)
        };
        let Some(slot_idx) = own else {
            return true; // deleting a missing key succeeds vacuously
        };
        if !obj.object().slot(slot_idx).flags.contains(PropertyFlags::CONFIGURABLE) {
            return false;
        }

        // Shapes cannot drop a slot in place: rebuild the layout without
        // the deleted key. Deletion is rare; shared suffix shapes rebuild
        // through the ordinary transition path.
        let old_shape = obj.object().shape().clone();
        let survivors: Vec<(ConstIndex, PropertySlot)> = (0..old_shape.property_size())
            .filter(|&i| i != slot_idx)
            .map(|i| {
                (
                    old_shape.property(i).const_index(),
                    obj.object().slot(i).clone(),
                )
            })
            .collect();

        let mut shape = self.shape_manager.empty_shape();
        {
            let keys = PoolKeys {
                global: self.runtime.global_pool(),
                local: &self.local_pool,
            };
            for (key, _) in &survivors {
                self.shape_manager
                    .add_property(&mut shape, ShapeProperty::new(*key), &keys);
            }
        }
        let data = obj.object_mut();
        data.set_shape(shape);
        let slots: Vec<PropertySlot> = survivors.into_iter().map(|(_, slot)| slot).collect();
        data.replace_slots(slots);
        true
    }

    /// `target[key]` with a computed key.
    pub fn get_computed(&mut self, target: &Value, key: &Value) -> Value {
        // Dense array / string index fast path.
        if let Some(idx) = computed_index(key) {
            if let Some(obj) = target.as_object() {
                if let Some(array) = obj.as_array() {
                    return array
                        .elements
                        .get(idx)
                        .cloned()
                        .unwrap_or_default();
                }
            }
            if let Some(s) = target.as_string() {
                return match s.as_str().chars().nth(idx) {
                    Some(c) => Value::str(&c.to_string()),
                    None => Value::undefined(),
                };
            }
        }
        match self.to_property_key(key) {
            Ok(key) => self.get_property(target, key),
            Err(exc) => exc,
        }
    }

    /// `target[key] = value` with a computed key.
    pub fn set_computed(&mut self, target: &Value, key: &Value, value: Value) -> Value {
        if let Some(idx) = computed_index(key) {
            if let Some(obj) = target.as_object() {
                if let Some(array) = obj.as_array() {
                    if array.base.flags().is_frozen() {
                        return Value::undefined();
                    }
                    if idx >= array.elements.len() {
                        if !array.base.flags().is_extensible() {
                            return Value::undefined();
                        }
                        array.elements.resize(idx + 1, Value::undefined());
                    }
                    self.record_write(obj, &value);
                    obj.as_array().unwrap().elements[idx] = value;
                    return Value::undefined();
                }
            }
        }
        match self.to_property_key(key) {
            Ok(key) => self.set_property(target, key, value),
            Err(exc) => exc,
        }
    }

    /// Convert a computed key to an interned pool index.
    ///
    /// Strings and symbols intern directly, numbers through their string
    /// form; objects are a type error.
    pub fn to_property_key(&mut self, key: &Value) -> Result<ConstIndex, Value> {
        match key.kind() {
            ValueKind::String(_) | ValueKind::Symbol(_) => Ok(self.intern_value(key.clone())),
            ValueKind::Int64(_) | ValueKind::Float64(_) | ValueKind::Boolean(_) => {
                let text = key.to_display_string();
                Ok(self.intern_string(&text))
            }
            _ => Err(self.throw_error(ErrorKind::Type, "invalid property key")),
        }
    }

    // ==================== Errors ====================

    /// Build an error object (`name`, `message`, `stack`) flagged as an
    /// in-flight exception.
    pub fn new_error(&mut self, kind: ErrorKind, message: &str) -> Value {
        let stack_text = self.capture_stack_trace(kind, message);
        let error = self.new_plain_object();
        let obj = error.as_object().unwrap();
        let name_key = self.runtime.keys().name;
        let message_key = self.runtime.keys().message;
        let stack_key = self.runtime.keys().stack;
        let name_val = Value::str(kind.name());
        let message_val = Value::str(message);
        let stack_val = Value::str(&stack_text);
        self.define_property(obj, name_key, name_val, PropertyFlags::DEFAULT);
        self.define_property(obj, message_key, message_val, PropertyFlags::DEFAULT);
        self.define_property(obj, stack_key, stack_val, PropertyFlags::DEFAULT);
        error
    }

    /// Build and flag an error in one step.
    pub fn throw_error(&mut self, kind: ErrorKind, message: &str) -> Value {
        self.new_error(kind, message).with_exception()
    }

    /// Reconstruct a stack trace from the registered frames' debug tables.
    fn capture_stack_trace(&self, kind: ErrorKind, message: &str) -> String {
        let mut text = format!("{}: {}", kind.name(), message);
        for &frame in self.frame_roots.iter().rev() {
            // SAFETY: registered frames are live for the duration of their
            // call.
            let frame = unsafe { &*frame };
            let Some(frame_def) = frame.func_def.as_ref() else {
                continue;
            };
            let def = frame_def.def();
            match def.debug_table.find(frame.pc.saturating_sub(1)) {
                Some(offset) => {
                    text.push_str(&format!(
                        "\n    at {} (source offset {})",
                        def.display_name(),
                        offset
                    ));
                }
                None => text.push_str(&format!("\n    at {}", def.display_name())),
            }
        }
        text
    }

    // ==================== Calls, microtasks, modules ====================

    /// Call `func` with `this` and `args`; the result carries the exception
    /// bit when the call threw.
    pub fn call_function(&mut self, func: &Value, this: Value, args: &[Value]) -> Value {
        Vm::new(self).call(func.clone(), this, args)
    }

    /// Construct an object via `New` semantics.
    pub fn construct(&mut self, ctor: &Value, args: &[Value]) -> Value {
        Vm::new(self).construct(ctor.clone(), args)
    }

    /// Drain the microtask queue FIFO; jobs enqueued while draining run in
    /// the same drain.
    pub fn run_microtasks(&mut self) {
        while let Some(job) = self.microtasks.pop_front() {
            let (func, this, argv) = job.into_parts();
            // A job's failure is routed to its child promise by the job's
            // own thunk; the drain never stops early.
            let _ = self.call_function(&func, this, &argv);
        }
    }

    /// Resolve a module through the runtime's module manager.
    pub fn get_module(&mut self, path: &str) -> Value {
        let Some(manager) = self.runtime.module_manager() else {
            return self.throw_error(ErrorKind::Type, "no module manager installed");
        };
        manager.get_module(self, path)
    }

    /// Resolve a module as a promise.
    pub fn get_module_async(&mut self, path: &str) -> Value {
        let Some(manager) = self.runtime.module_manager() else {
            return self.throw_error(ErrorKind::Type, "no module manager installed");
        };
        manager.get_module_async(self, path)
    }

    /// Instantiate a compiled module: create its namespace object, run the
    /// body (exported locals write through the export cells), and return
    /// `(namespace, completion)`.
    pub fn instantiate_module(&mut self, def: Arc<ModuleDef>) -> (Value, Value) {
        let scope = self.open_handle_scope();
        let module = self.new_module_object(def.clone());
        let module_h = self.handle(module);
        let module_val = self.handle_value(module_h);
        let completion = Vm::new(self).call_module(def, module_val);
        let module = self.handle_value(module_h);
        let _ = self.close_handle_scope(scope, Value::undefined());
        (module, completion)
    }

    /// The JIT manager.
    pub fn jit(&mut self) -> &mut crate::jit::JitManager {
        &mut self.jit
    }
}

/// Does the cell currently hold a reference into the young generation?
fn cell_holds_young(heap: &GcHeap, cell: &ValueCell) -> bool {
    let mut young = false;
    let mut probe = cell.get();
    probe.trace(&mut |slot| {
        if heap.is_young(*slot) {
            young = true;
        }
    });
    young
}

/// Index form of a computed key usable for dense storage.
fn computed_index(key: &Value) -> Option<usize> {
    match key.kind() {
        ValueKind::Int64(i) if *i >= 0 => Some(*i as usize),
        ValueKind::Float64(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as usize),
        _ => None,
    }
}

/// Root provider assembled from disjoint context fields at collection time.
struct ContextRoots<'a> {
    stack: &'a mut Stack,
    microtasks: &'a mut JobQueue,
    handle_stack: &'a mut Vec<Value>,
    frame_roots: &'a [*mut StackFrame],
    global_roots: &'a [*mut Value],
    payload_roots: Vec<*mut dyn GcTrace>,
    dirty_cells: &'a mut Vec<ValueCell>,
    runtime: &'a Runtime,
}

impl RootSet for ContextRoots<'_> {
    fn for_each_root(&mut self, f: &mut dyn FnMut(&mut *mut GcHeader)) {
        for value in self.stack.values_mut() {
            value.trace(f);
        }
        for value in self.handle_stack.iter_mut() {
            value.trace(f);
        }
        self.microtasks.trace(f);
        for &frame in self.frame_roots {
            // SAFETY: frames are registered for exactly the duration of
            // their call on this thread.
            unsafe { (*frame).trace(f) };
        }
        for &root in self.global_roots {
            // SAFETY: embedder roots are pinned until removed.
            unsafe { (*root).trace(f) };
        }
        for &payload in &self.payload_roots {
            // SAFETY: payload roots live on the allocating call's stack.
            unsafe { (*payload).trace(f) };
        }
        for cell in self.dirty_cells.iter() {
            cell.trace(f);
        }
        self.runtime.trace_roots(f);
    }
}
