//! Module loading
//!
//! Implements the core's module-manager contract: resolve a path to a
//! module value, loading and caching on miss. Compilation is external — a
//! [`ModuleProvider`] supplies compiled [`ModuleDef`]s (the test suites and
//! embedders register them up front); native modules are plain values
//! registered by path.

use std::cell::RefCell;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use marten_vm_bytecode::ModuleDef;
use marten_vm_core::error::ErrorKind;
use marten_vm_core::{Context, ModuleManager, Value};
use marten_vm_gc::GcHeader;

/// Source of compiled modules.
pub trait ModuleProvider {
    /// Compiled module for `path`, if this provider knows it.
    fn load(&self, path: &str) -> Option<Arc<ModuleDef>>;
}

/// A provider over a fixed path → definition map.
#[derive(Default)]
pub struct MapProvider {
    modules: FxHashMap<String, Arc<ModuleDef>>,
}

impl MapProvider {
    /// Empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled module under `path`.
    pub fn insert(&mut self, path: impl Into<String>, def: Arc<ModuleDef>) {
        self.modules.insert(path.into(), def);
    }
}

impl ModuleProvider for MapProvider {
    fn load(&self, path: &str) -> Option<Arc<ModuleDef>> {
        self.modules.get(path).cloned()
    }
}

struct LoaderState {
    provider: Option<Box<dyn ModuleProvider>>,
    native_modules: FxHashMap<String, Value>,
    module_cache: FxHashMap<String, Value>,
}

/// Caching module manager over a pluggable provider.
pub struct ModuleLoader {
    state: RefCell<LoaderState>,
}

// SAFETY: the loader is only touched from the single VM thread of its
// runtime's context.
unsafe impl Send for ModuleLoader {}
unsafe impl Sync for ModuleLoader {}

impl ModuleLoader {
    /// Loader without a provider (native modules only).
    pub fn new() -> Arc<Self> {
        Self::with_provider_opt(None)
    }

    /// Loader over `provider`.
    pub fn with_provider(provider: Box<dyn ModuleProvider>) -> Arc<Self> {
        Self::with_provider_opt(Some(provider))
    }

    fn with_provider_opt(provider: Option<Box<dyn ModuleProvider>>) -> Arc<Self> {
        Arc::new(Self {
            state: RefCell::new(LoaderState {
                provider,
                native_modules: FxHashMap::default(),
                module_cache: FxHashMap::default(),
            }),
        })
    }

    /// Number of cached JS modules (test hook).
    pub fn cached_modules(&self) -> usize {
        self.state.borrow().module_cache.len()
    }
}

impl ModuleManager for ModuleLoader {
    fn add_native_module(&self, path: &str, module: Value) {
        self.state
            .borrow_mut()
            .native_modules
            .insert(path.to_string(), module);
    }

    fn get_module(&self, ctx: &mut Context, path: &str) -> Value {
        if let Some(module) = self.state.borrow().native_modules.get(path) {
            return module.clone();
        }
        if let Some(module) = self.state.borrow().module_cache.get(path) {
            return module.clone();
        }

        // The provider borrow is transient so a module body can import its
        // own dependencies through this loader re-entrantly.
        let def = self
            .state
            .borrow()
            .provider
            .as_ref()
            .and_then(|p| p.load(path));
        let Some(def) = def else {
            return ctx.throw_error(
                ErrorKind::Reference,
                &format!("module not found: {path}"),
            );
        };

        let (module, completion) = ctx.instantiate_module(def);
        if completion.is_exception() {
            return completion;
        }
        self.state
            .borrow_mut()
            .module_cache
            .insert(path.to_string(), module.clone());
        module
    }

    fn get_module_async(&self, ctx: &mut Context, path: &str) -> Value {
        let module = self.get_module(ctx, path);
        if module.is_exception() {
            marten_vm_core::promise::rejected_with(ctx, module.clear_exception())
        } else {
            marten_vm_core::promise::resolved_with(ctx, module)
        }
    }

    fn clear_module_cache(&self) {
        self.state.borrow_mut().module_cache.clear();
    }

    fn trace(&self, visitor: &mut dyn FnMut(&mut *mut GcHeader)) {
        let mut state = self.state.borrow_mut();
        for module in state.native_modules.values_mut() {
            module.trace(visitor);
        }
        for module in state.module_cache.values_mut() {
            module.trace(visitor);
        }
    }
}
