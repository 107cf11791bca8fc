//! The runtime: process-wide owners
//!
//! A [`Runtime`] holds everything shared across contexts: the global
//! constant pool (the only component with cross-thread access), the root of
//! the shape tree, the built-in class table, the global `this` object, the
//! well-known symbols and the module manager. One default [`crate::context::Context`]
//! exists per runtime; its construction populates the class table and the
//! global object.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use marten_vm_bytecode::ConstIndex;
use marten_vm_gc::GcHeader;

use crate::class_def::ClassDefTable;
use crate::const_pool::GlobalConstPool;
use crate::shape::Shape;
use crate::value::Value;

/// In-core contract of the module manager collaborator.
///
/// Loading and compiling live outside the core; the core only needs cached
/// module values and native-module registration. Implementations use
/// interior mutability (`&self` receivers) so module bodies can import
/// their own dependencies re-entrantly, and must report their cached
/// values through [`trace`](Self::trace) — they are GC roots.
pub trait ModuleManager {
    /// Register a native module up-front.
    fn add_native_module(&self, path: &str, module: Value);
    /// Resolve `path` to a module value, loading/compiling/caching on miss.
    fn get_module(&self, ctx: &mut crate::context::Context, path: &str) -> Value;
    /// Like `get_module` but returns a promise of the module value.
    fn get_module_async(&self, ctx: &mut crate::context::Context, path: &str) -> Value;
    /// Drop all cached modules.
    fn clear_module_cache(&self);
    /// Visit every GC reference the manager caches.
    fn trace(&self, visitor: &mut dyn FnMut(&mut *mut GcHeader));
}

/// Frequently used interned keys, resolved once at runtime construction.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedKeys {
    /// `"value"`
    pub value: ConstIndex,
    /// `"done"`
    pub done: ConstIndex,
    /// `"length"`
    pub length: ConstIndex,
    /// `"prototype"`
    pub prototype: ConstIndex,
    /// `"constructor"`
    pub constructor: ConstIndex,
    /// `"name"`
    pub name: ConstIndex,
    /// `"message"`
    pub message: ConstIndex,
    /// `"stack"`
    pub stack: ConstIndex,
    /// `"__proto__"`
    pub proto: ConstIndex,
    /// `"then"`
    pub then: ConstIndex,
    /// `"next"`
    pub next: ConstIndex,
    /// `"iterator"` (the well-known symbol's description)
    pub iterator: ConstIndex,
}

impl EmbeddedKeys {
    fn intern(pool: &GlobalConstPool) -> Self {
        let key = |s: &str| pool.insert(Value::str(s));
        Self {
            value: key("value"),
            done: key("done"),
            length: key("length"),
            prototype: key("prototype"),
            constructor: key("constructor"),
            name: key("name"),
            message: key("message"),
            stack: key("stack"),
            proto: key("__proto__"),
            then: key("then"),
            next: key("next"),
            iterator: key("iterator"),
        }
    }
}

/// Process-wide engine state.
pub struct Runtime {
    global_pool: GlobalConstPool,
    shape_root: Arc<Shape>,
    keys: EmbeddedKeys,
    class_defs: RefCell<ClassDefTable>,
    global_this: RefCell<Value>,
    symbol_iterator: RefCell<Value>,
    next_symbol_id: AtomicU64,
    module_manager: RefCell<Option<Arc<dyn ModuleManager>>>,
}

// SAFETY: only the global constant pool is touched from more than one
// thread (it is internally synchronized); every RefCell field is confined
// to the single VM thread of the default context.
unsafe impl Send for Runtime {}
unsafe impl Sync for Runtime {}

impl Runtime {
    /// Create a runtime with no module manager.
    pub fn new() -> Arc<Self> {
        let global_pool = GlobalConstPool::new();
        let keys = EmbeddedKeys::intern(&global_pool);
        Arc::new(Self {
            global_pool,
            shape_root: Shape::root(),
            keys,
            class_defs: RefCell::new(ClassDefTable::new()),
            global_this: RefCell::new(Value::undefined()),
            symbol_iterator: RefCell::new(Value::undefined()),
            next_symbol_id: AtomicU64::new(1),
            module_manager: RefCell::new(None),
        })
    }

    /// Create a runtime with a module manager.
    pub fn with_module_manager(manager: Arc<dyn ModuleManager>) -> Arc<Self> {
        let runtime = Self::new();
        *runtime.module_manager.borrow_mut() = Some(manager);
        runtime
    }

    /// Install (or replace) the module manager.
    pub fn set_module_manager(&self, manager: Arc<dyn ModuleManager>) {
        *self.module_manager.borrow_mut() = Some(manager);
    }

    /// The shared constant pool.
    pub fn global_pool(&self) -> &GlobalConstPool {
        &self.global_pool
    }

    /// Intern a constant into the global pool.
    pub fn intern(&self, value: Value) -> ConstIndex {
        self.global_pool.insert(value)
    }

    /// The root of every shape tree.
    pub fn shape_root(&self) -> Arc<Shape> {
        self.shape_root.clone()
    }

    /// Pre-interned hot keys.
    pub fn keys(&self) -> &EmbeddedKeys {
        &self.keys
    }

    /// The built-in class table.
    pub fn class_defs(&self) -> &RefCell<ClassDefTable> {
        &self.class_defs
    }

    /// The global `this` object.
    pub fn global_this(&self) -> Value {
        self.global_this.borrow().clone()
    }

    /// Install the global `this` object (runtime initialization).
    pub fn set_global_this(&self, value: Value) {
        *self.global_this.borrow_mut() = value;
    }

    /// The well-known `Symbol.iterator`.
    pub fn symbol_iterator(&self) -> Value {
        self.symbol_iterator.borrow().clone()
    }

    /// Install `Symbol.iterator` (runtime initialization).
    pub fn set_symbol_iterator(&self, value: Value) {
        *self.symbol_iterator.borrow_mut() = value;
    }

    /// Mint a fresh symbol id.
    pub fn next_symbol_id(&self) -> u64 {
        self.next_symbol_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The installed module manager, if any.
    pub fn module_manager(&self) -> Option<Arc<dyn ModuleManager>> {
        self.module_manager.borrow().clone()
    }

    /// Visit the runtime-owned GC roots (global this, class table, well-
    /// known symbols, module caches).
    pub fn trace_roots(&self, visitor: &mut dyn FnMut(&mut *mut GcHeader)) {
        self.global_this.borrow_mut().trace(visitor);
        self.symbol_iterator.borrow_mut().trace(visitor);
        self.class_defs.borrow_mut().trace(visitor);
        if let Some(manager) = self.module_manager.borrow().as_ref() {
            manager.trace(visitor);
        }
    }
}
