//! Module loading, caching and live export linkage

use std::sync::Arc;

use marten_vm_bytecode::{FunctionDef, ModuleDef, Opcode};
use marten_vm_core::{ModuleManager, PromiseState, Value};
use marten_vm_runtime::{MapProvider, Marten, ModuleLoader};

/// `export let x = 1;` as a compiled module.
fn module_with_export(runtime: &marten_vm_core::Runtime) -> Arc<ModuleDef> {
    let c1 = runtime.intern(Value::int(1));
    let x_key = runtime.intern(Value::str("x"));

    let mut module = ModuleDef::new("m", "export let x = 1;\n");
    let x_slot = module.function.var_def_table.add_export_var("x");
    module.export_var_def_table.add_export_var(x_key, x_slot);
    let bc = &mut module.function.bytecode;
    bc.emit_const_load(c1);
    bc.emit_var_store(x_slot);
    bc.emit_opcode(Opcode::Undefined);
    bc.emit_opcode(Opcode::Return);
    Arc::new(module)
}

fn engine_with(modules: Vec<(&str, Arc<ModuleDef>)>) -> (Marten, Arc<ModuleLoader>) {
    let mut provider = MapProvider::new();
    for (path, def) in modules {
        provider.insert(path, def);
    }
    let loader = ModuleLoader::with_provider(Box::new(provider));
    let marten = Marten::with_module_manager(loader.clone());
    (marten, loader)
}

#[test]
fn exports_read_through_live_cells() {
    let mut marten = Marten::new();
    let runtime = marten.runtime().clone();
    let module_def = module_with_export(&runtime);
    let x_key = runtime.intern(Value::str("x"));

    let (module, completion) = marten.run_module(module_def);
    assert!(!completion.is_exception());

    let ctx = marten.context();
    let scope = ctx.open_handle_scope();
    let module_h = ctx.handle(module);

    let module = ctx.handle_value(module_h);
    assert_eq!(ctx.get_property(&module, x_key).as_int(), Some(1));

    // A store through the namespace is import-visible immediately.
    let module = ctx.handle_value(module_h);
    ctx.set_property(&module, x_key, Value::int(2));
    let module = ctx.handle_value(module_h);
    assert_eq!(ctx.get_property(&module, x_key).as_int(), Some(2));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

#[test]
fn loader_caches_modules() {
    let mut marten = Marten::new();
    let runtime = marten.runtime().clone();
    let module_def = module_with_export(&runtime);

    let mut provider = MapProvider::new();
    provider.insert("m", module_def);
    let loader = ModuleLoader::with_provider(Box::new(provider));
    runtime.set_module_manager(loader.clone());

    let ctx = marten.context();
    let scope = ctx.open_handle_scope();
    let first = ctx.get_module("m");
    assert!(!first.is_exception());
    let first_h = ctx.handle(first);
    let second = ctx.get_module("m");
    let second_h = ctx.handle(second);

    assert_eq!(loader.cached_modules(), 1);
    let first = ctx.handle_value(first_h);
    let second = ctx.handle_value(second_h);
    assert!(first.as_object() == second.as_object(), "cache returns one instance");

    loader.clear_module_cache();
    assert_eq!(loader.cached_modules(), 0);
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

#[test]
fn get_module_opcode_resolves_imports() {
    // Build the engine first so the module can intern against its runtime.
    let (mut marten, _loader) = engine_with(vec![]);
    let runtime = marten.runtime().clone();
    let module_def = module_with_export(&runtime);

    let mut provider = MapProvider::new();
    provider.insert("m", module_def);
    let loader = ModuleLoader::with_provider(Box::new(provider));
    runtime.set_module_manager(loader);

    let path_key = runtime.intern(Value::str("m"));
    let x_key = runtime.intern(Value::str("x"));

    // function f() { return import("m").x; }
    let mut def = FunctionDef::new("f", 0);
    let bc = &mut def.bytecode;
    bc.emit_opcode(Opcode::GetModule);
    bc.emit_u32(path_key.to_wire());
    bc.emit_property_load(x_key);
    bc.emit_opcode(Opcode::Return);

    let result = marten.call(&Arc::new(def), &[]);
    assert!(!result.is_exception());
    assert_eq!(result.as_int(), Some(1));
}

#[test]
fn get_module_async_wraps_in_promise() {
    let (mut marten, _loader) = engine_with(vec![]);
    let runtime = marten.runtime().clone();
    let module_def = module_with_export(&runtime);

    let mut provider = MapProvider::new();
    provider.insert("m", module_def);
    runtime.set_module_manager(ModuleLoader::with_provider(Box::new(provider)));

    let ctx = marten.context();
    let scope = ctx.open_handle_scope();
    let promise = ctx.get_module_async("m");
    let promise_h = ctx.handle(promise);

    let promise = ctx.handle_value(promise_h);
    let data = promise.as_object().unwrap().as_promise().unwrap();
    assert_eq!(data.state, PromiseState::Fulfilled);
    assert!(data.result_or_reason.is_object());
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

#[test]
fn missing_module_is_an_error() {
    let (mut marten, _loader) = engine_with(vec![]);
    let runtime = marten.runtime().clone();
    let name_key = runtime.keys().name;

    let ctx = marten.context();
    let result = ctx.get_module("nowhere");
    assert!(result.is_exception());
    let error = result.clear_exception();
    assert_eq!(
        ctx.get_property(&error, name_key).as_string().unwrap().as_str(),
        "ReferenceError"
    );
}

#[test]
fn native_modules_resolve_without_a_provider() {
    let loader = ModuleLoader::new();
    let mut marten = Marten::with_module_manager(loader.clone());
    let runtime = marten.runtime().clone();
    let answer_key = runtime.intern(Value::str("answer"));

    let ctx = marten.context();
    let scope = ctx.open_handle_scope();
    let native = ctx.new_plain_object();
    ctx.set_property(&native, answer_key, Value::int(42));
    loader.add_native_module("host:config", native);

    let module = ctx.get_module("host:config");
    assert!(!module.is_exception());
    assert_eq!(ctx.get_property(&module, answer_key).as_int(), Some(42));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}
