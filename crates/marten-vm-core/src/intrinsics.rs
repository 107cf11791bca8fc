//! Built-in classes and the global object
//!
//! Populates the runtime's class-def table at construction of the first
//! context: `Object`, `Array`, `String`, `Promise`, `Generator`, `Symbol`
//! and `Function`, plus the global `this` object carrying the constructors.
//! Everything here is a host callable with the trampoline signature; the
//! only non-function builtin value is the generator prototype's `next`,
//! which is the bound [`Value::generator_next`] builtin.

use crate::class_def::{ClassDef, ClassId};
use crate::context::{Context, Handle};
use crate::error::ErrorKind;
use crate::interpreter::StackFrame;
use crate::object::{ObjectRef, PropertyFlags};
use crate::value::{CppFunction, Value};

/// Install the built-ins into `ctx`'s runtime.
pub fn install(ctx: &mut Context) {
    let scope = ctx.open_handle_scope();

    // Prototypes first. `Object.prototype` is the chain root: its own
    // `__proto__` is an explicit null. Every other prototype is a plain
    // object and reaches the root through the class fallback.
    let object_proto = new_plain_held(ctx);
    {
        let obj = obj_of(ctx, object_proto);
        obj.object_mut().set_prototype(Value::null());
    }
    let function_proto = new_plain_held(ctx);
    let string_proto = new_plain_held(ctx);
    let array_proto = new_plain_held(ctx);
    let generator_proto = new_plain_held(ctx);
    let promise_proto = new_plain_held(ctx);
    let async_proto = new_plain_held(ctx);
    let symbol_proto = new_plain_held(ctx);
    let module_proto = new_plain_held(ctx);

    // Constructors.
    let object_ctor = new_native_held(ctx, object_constructor);
    let array_ctor = new_native_held(ctx, array_constructor);
    let string_ctor = new_native_held(ctx, string_constructor);
    let promise_ctor = new_native_held(ctx, promise_constructor);
    let symbol_ctor = new_native_held(ctx, symbol_constructor);

    // Constructor ↔ prototype linkage.
    link(ctx, object_ctor, object_proto);
    link(ctx, array_ctor, array_proto);
    link(ctx, string_ctor, string_proto);
    link(ctx, promise_ctor, promise_proto);
    link(ctx, symbol_ctor, symbol_proto);

    // Object statics.
    add_method(ctx, object_ctor, "freeze", object_freeze);
    add_method(ctx, object_ctor, "seal", object_seal);
    add_method(ctx, object_ctor, "preventExtensions", object_prevent_extensions);
    add_method(ctx, object_ctor, "defineProperty", object_define_property);

    // Array statics and methods.
    add_method(ctx, array_ctor, "of", array_of);
    add_method(ctx, array_proto, "push", array_push);
    add_method(ctx, array_proto, "pop", array_pop);
    add_method(ctx, array_proto, "forEach", array_for_each);
    add_method(ctx, array_proto, "map", array_map);
    add_method(ctx, array_proto, "filter", array_filter);
    add_method(ctx, array_proto, "reduce", array_reduce);

    // String methods.
    add_method(ctx, string_proto, "split", string_split);
    add_method(ctx, string_proto, "substring", string_substring);
    add_method(ctx, string_proto, "indexOf", string_index_of);
    add_method(ctx, string_proto, "toLowerCase", string_to_lower_case);
    add_method(ctx, string_proto, "toUpperCase", string_to_upper_case);
    add_method(ctx, string_proto, "trim", string_trim);
    add_method(ctx, string_proto, "replace", string_replace);

    // Promise statics and methods.
    add_method(ctx, promise_ctor, "resolve", promise_resolve_static);
    add_method(ctx, promise_ctor, "reject", promise_reject_static);
    add_method(ctx, promise_proto, "then", promise_then);

    // Generator / async prototypes expose the bound resume builtin.
    define_value(
        ctx,
        generator_proto,
        "next",
        Value::generator_next(),
        PropertyFlags::WRITABLE.union(PropertyFlags::CONFIGURABLE),
    );
    define_value(
        ctx,
        async_proto,
        "next",
        Value::generator_next(),
        PropertyFlags::WRITABLE.union(PropertyFlags::CONFIGURABLE),
    );

    // Symbol statics: the registry entry point and the well-known iterator
    // symbol.
    add_method(ctx, symbol_ctor, "for", symbol_for_static);
    let iterator_symbol = ctx.new_symbol(Some("Symbol.iterator".to_string()));
    ctx.runtime().set_symbol_iterator(iterator_symbol.clone());
    define_value(
        ctx,
        symbol_ctor,
        "iterator",
        iterator_symbol,
        PropertyFlags::NONE,
    );

    // Class table.
    let register = |ctx: &mut Context, id: ClassId, ctor: Option<Handle>, proto: Handle| {
        let name = ctx.runtime().intern(Value::str(id.name()));
        let def = ClassDef {
            id,
            name,
            constructor: ctor.map(|h| ctx.handle_value(h)).unwrap_or_default(),
            prototype: ctx.handle_value(proto),
        };
        ctx.runtime().class_defs().borrow_mut().register(def);
    };
    register(ctx, ClassId::Object, Some(object_ctor), object_proto);
    register(ctx, ClassId::FunctionObject, None, function_proto);
    register(ctx, ClassId::NativeFunction, None, function_proto);
    register(ctx, ClassId::StringObject, Some(string_ctor), string_proto);
    register(ctx, ClassId::ArrayObject, Some(array_ctor), array_proto);
    register(ctx, ClassId::GeneratorObject, None, generator_proto);
    register(ctx, ClassId::PromiseObject, Some(promise_ctor), promise_proto);
    register(ctx, ClassId::AsyncObject, None, async_proto);
    register(ctx, ClassId::ModuleObject, None, module_proto);
    register(ctx, ClassId::Symbol, Some(symbol_ctor), symbol_proto);

    // Global `this`.
    let global = new_plain_held(ctx);
    define_handle(ctx, global, "Object", object_ctor);
    define_handle(ctx, global, "Array", array_ctor);
    define_handle(ctx, global, "String", string_ctor);
    define_handle(ctx, global, "Promise", promise_ctor);
    define_handle(ctx, global, "Symbol", symbol_ctor);
    define_handle(ctx, global, "globalThis", global);
    ctx.runtime().set_global_this(ctx.handle_value(global));

    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

// ==================== install helpers ====================

fn new_plain_held(ctx: &mut Context) -> Handle {
    let value = ctx.new_plain_object();
    ctx.handle(value)
}

fn new_native_held(ctx: &mut Context, func: CppFunction) -> Handle {
    let value = ctx.new_native_function(func);
    ctx.handle(value)
}

fn obj_of(ctx: &Context, handle: Handle) -> ObjectRef {
    ctx.handle_value(handle).as_object().unwrap()
}

/// `ctor.prototype = proto` and `proto.constructor = ctor`.
fn link(ctx: &mut Context, ctor: Handle, proto: Handle) {
    let prototype_key = ctx.runtime().keys().prototype;
    let constructor_key = ctx.runtime().keys().constructor;
    let proto_val = ctx.handle_value(proto);
    let ctor_val = ctx.handle_value(ctor);
    ctx.define_property(obj_of(ctx, ctor), prototype_key, proto_val, PropertyFlags::NONE);
    ctx.define_property(
        obj_of(ctx, proto),
        constructor_key,
        ctor_val,
        PropertyFlags::WRITABLE.union(PropertyFlags::CONFIGURABLE),
    );
}

/// Install a native method on the object behind `target`.
fn add_method(ctx: &mut Context, target: Handle, name: &str, func: CppFunction) {
    let key = ctx.runtime().intern(Value::str(name));
    let func_val = ctx.new_native_function(func);
    ctx.define_property(
        obj_of(ctx, target),
        key,
        func_val,
        PropertyFlags::WRITABLE.union(PropertyFlags::CONFIGURABLE),
    );
}

/// Install a plain value property on the object behind `target`.
fn define_value(ctx: &mut Context, target: Handle, name: &str, value: Value, flags: PropertyFlags) {
    let key = ctx.runtime().intern(Value::str(name));
    ctx.define_property(obj_of(ctx, target), key, value, flags);
}

/// Install a handle's value under `name`.
fn define_handle(ctx: &mut Context, target: Handle, name: &str, value: Handle) {
    let v = ctx.handle_value(value);
    define_value(
        ctx,
        target,
        name,
        v,
        PropertyFlags::WRITABLE.union(PropertyFlags::CONFIGURABLE),
    );
}

fn this_array(ctx: &mut Context, frame: &StackFrame) -> Result<ObjectRef, Value> {
    frame
        .this_val()
        .as_object()
        .filter(|obj| obj.as_array().is_some())
        .ok_or_else(|| ctx.throw_error(ErrorKind::Type, "receiver is not an array"))
}

fn this_string(ctx: &mut Context, frame: &StackFrame) -> Result<String, Value> {
    frame
        .this_val()
        .as_string()
        .map(|s| s.as_str().to_string())
        .ok_or_else(|| ctx.throw_error(ErrorKind::Type, "receiver is not a string"))
}

// ==================== Object ====================

fn object_constructor(ctx: &mut Context, argc: u32, frame: &StackFrame) -> Value {
    let arg = frame.arg(0);
    if argc >= 1 && arg.is_object() {
        arg
    } else {
        ctx.new_plain_object()
    }
}

fn object_freeze(_ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let target = frame.arg(0);
    if let Some(obj) = target.as_object() {
        obj.object_mut().freeze();
    }
    target
}

fn object_seal(_ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let target = frame.arg(0);
    if let Some(obj) = target.as_object() {
        obj.object_mut().seal();
    }
    target
}

fn object_prevent_extensions(_ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let target = frame.arg(0);
    if let Some(obj) = target.as_object() {
        obj.object_mut().prevent_extensions();
    }
    target
}

fn object_define_property(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let target = frame.arg(0);
    if target.as_object().is_none() {
        return ctx.throw_error(ErrorKind::Type, "defineProperty target must be an object");
    }
    let key = match ctx.to_property_key(&frame.arg(1)) {
        Ok(key) => key,
        Err(exc) => return exc,
    };
    let descriptor = frame.arg(2);
    if descriptor.as_object().is_none() {
        return ctx.throw_error(ErrorKind::Type, "property descriptor must be an object");
    }

    let scope = ctx.open_handle_scope();
    let read = |ctx: &mut Context, name: &str| -> Value {
        let k = ctx.runtime().intern(Value::str(name));
        ctx.get_property(&frame.arg(2), k)
    };
    let value = read(ctx, "value");
    let value_h = ctx.handle(value);
    let getter = read(ctx, "get");
    let getter_h = ctx.handle(getter);
    let setter = read(ctx, "set");
    let setter_h = ctx.handle(setter);
    let writable = read(ctx, "writable").is_truthy();
    let enumerable = read(ctx, "enumerable").is_truthy();
    let configurable = read(ctx, "configurable").is_truthy();

    let mut flags = PropertyFlags::NONE;
    if writable {
        flags = flags.union(PropertyFlags::WRITABLE);
    }
    if enumerable {
        flags = flags.union(PropertyFlags::ENUMERABLE);
    }
    if configurable {
        flags = flags.union(PropertyFlags::CONFIGURABLE);
    }

    let getter = ctx.handle_value(getter_h);
    let setter = ctx.handle_value(setter_h);
    let (slot_value, flags) = if !getter.is_undefined() {
        (getter, flags.union(PropertyFlags::IS_GETTER))
    } else if !setter.is_undefined() {
        (setter, flags.union(PropertyFlags::IS_SETTER))
    } else {
        (ctx.handle_value(value_h), flags)
    };

    // Re-read the (possibly moved) target after the descriptor reads.
    let target = frame.arg(0);
    let obj = target.as_object().unwrap();
    ctx.define_property(obj, key, slot_value, flags);
    ctx.close_handle_scope(scope, target)
}

// ==================== Array ====================

fn array_constructor(ctx: &mut Context, argc: u32, frame: &StackFrame) -> Value {
    if argc == 1 && frame.arg(0).is_number() {
        let n = frame.arg(0).as_f64().unwrap();
        if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
            return ctx.throw_error(ErrorKind::Range, "invalid array length");
        }
        return ctx.new_array(vec![Value::undefined(); n as usize]);
    }
    let elements: Vec<Value> = (0..argc).map(|i| frame.arg(i)).collect();
    ctx.new_array(elements)
}

fn array_of(ctx: &mut Context, argc: u32, frame: &StackFrame) -> Value {
    let elements: Vec<Value> = (0..argc).map(|i| frame.arg(i)).collect();
    ctx.new_array(elements)
}

fn array_push(ctx: &mut Context, argc: u32, frame: &StackFrame) -> Value {
    let array = match this_array(ctx, frame) {
        Ok(array) => array,
        Err(exc) => return exc,
    };
    if array.object().flags().is_frozen() || !array.object().flags().is_extensible() {
        return Value::int(array.as_array().unwrap().elements.len() as i64);
    }
    for i in 0..argc {
        let value = frame.arg(i);
        ctx.record_write(array, &value);
        array.as_array().unwrap().elements.push(value);
    }
    Value::int(array.as_array().unwrap().elements.len() as i64)
}

fn array_pop(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let array = match this_array(ctx, frame) {
        Ok(array) => array,
        Err(exc) => return exc,
    };
    if array.object().flags().is_frozen() || array.object().flags().is_sealed() {
        // Length cannot change; the last element still reads.
        return array
            .as_array()
            .unwrap()
            .elements
            .last()
            .cloned()
            .unwrap_or_default();
    }
    array
        .as_array()
        .unwrap()
        .elements
        .pop()
        .unwrap_or_default()
}

fn array_for_each(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    if let Err(exc) = this_array(ctx, frame) {
        return exc;
    }
    let callback = frame.arg(0);
    let mut index = 0usize;
    loop {
        // Re-resolve through the frame every round: the callback can move
        // or mutate the array.
        let this = frame.this_val();
        let array = this.as_object().unwrap().as_array().unwrap();
        if index >= array.elements.len() {
            break;
        }
        let element = array.elements[index].clone();
        let outcome = ctx.call_function(
            &callback,
            Value::undefined(),
            &[element, Value::int(index as i64), this],
        );
        if outcome.is_exception() {
            return outcome;
        }
        index += 1;
    }
    Value::undefined()
}

fn array_map(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    if let Err(exc) = this_array(ctx, frame) {
        return exc;
    }
    let callback = frame.arg(0);
    let scope = ctx.open_handle_scope();
    let out = ctx.new_array(Vec::new());
    let out_h = ctx.handle(out);

    let mut index = 0usize;
    loop {
        let this = frame.this_val();
        let array = this.as_object().unwrap().as_array().unwrap();
        if index >= array.elements.len() {
            break;
        }
        let element = array.elements[index].clone();
        let outcome = ctx.call_function(
            &callback,
            Value::undefined(),
            &[element, Value::int(index as i64), this],
        );
        if outcome.is_exception() {
            return ctx.close_handle_scope(scope, outcome);
        }
        let out_obj = ctx.handle_value(out_h).as_object().unwrap();
        ctx.record_write(out_obj, &outcome);
        out_obj.as_array().unwrap().elements.push(outcome);
        index += 1;
    }
    let result = ctx.handle_value(out_h);
    ctx.close_handle_scope(scope, result)
}

fn array_filter(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    if let Err(exc) = this_array(ctx, frame) {
        return exc;
    }
    let callback = frame.arg(0);
    let scope = ctx.open_handle_scope();
    let out = ctx.new_array(Vec::new());
    let out_h = ctx.handle(out);

    let mut index = 0usize;
    loop {
        let this = frame.this_val();
        let array = this.as_object().unwrap().as_array().unwrap();
        if index >= array.elements.len() {
            break;
        }
        let element = array.elements[index].clone();
        let keep = ctx.call_function(
            &callback,
            Value::undefined(),
            &[element.clone(), Value::int(index as i64), this],
        );
        if keep.is_exception() {
            return ctx.close_handle_scope(scope, keep);
        }
        if keep.is_truthy() {
            // Re-read the element: the callback may have moved the array.
            let this = frame.this_val();
            let array = this.as_object().unwrap().as_array().unwrap();
            let element = array
                .elements
                .get(index)
                .cloned()
                .unwrap_or(element);
            let out_obj = ctx.handle_value(out_h).as_object().unwrap();
            ctx.record_write(out_obj, &element);
            out_obj.as_array().unwrap().elements.push(element);
        }
        index += 1;
    }
    let result = ctx.handle_value(out_h);
    ctx.close_handle_scope(scope, result)
}

fn array_reduce(ctx: &mut Context, argc: u32, frame: &StackFrame) -> Value {
    if let Err(exc) = this_array(ctx, frame) {
        return exc;
    }
    let callback = frame.arg(0);
    let scope = ctx.open_handle_scope();

    let mut index = 0usize;
    let acc = if argc >= 2 {
        frame.arg(1)
    } else {
        let this = frame.this_val();
        let array = this.as_object().unwrap().as_array().unwrap();
        if array.elements.is_empty() {
            let exc = ctx.throw_error(ErrorKind::Type, "reduce of empty array with no initial value");
            return ctx.close_handle_scope(scope, exc);
        }
        index = 1;
        array.elements[0].clone()
    };
    let acc_h = ctx.handle(acc);

    loop {
        let this = frame.this_val();
        let array = this.as_object().unwrap().as_array().unwrap();
        if index >= array.elements.len() {
            break;
        }
        let element = array.elements[index].clone();
        let acc = ctx.handle_value(acc_h);
        let outcome = ctx.call_function(
            &callback,
            Value::undefined(),
            &[acc, element, Value::int(index as i64), this],
        );
        if outcome.is_exception() {
            return ctx.close_handle_scope(scope, outcome);
        }
        ctx.replace_handle(acc_h, outcome);
        index += 1;
    }
    let result = ctx.handle_value(acc_h);
    ctx.close_handle_scope(scope, result)
}

// ==================== String ====================

fn string_constructor(_ctx: &mut Context, argc: u32, frame: &StackFrame) -> Value {
    if argc == 0 {
        Value::str("")
    } else {
        Value::str(&frame.arg(0).to_display_string())
    }
}

fn string_split(ctx: &mut Context, argc: u32, frame: &StackFrame) -> Value {
    let text = match this_string(ctx, frame) {
        Ok(text) => text,
        Err(exc) => return exc,
    };
    let parts: Vec<Value> = if argc == 0 {
        vec![Value::str(&text)]
    } else {
        let separator = frame.arg(0).to_display_string();
        if separator.is_empty() {
            text.chars().map(|c| Value::str(&c.to_string())).collect()
        } else {
            text.split(separator.as_str()).map(Value::str).collect()
        }
    };
    ctx.new_array(parts)
}

fn string_substring(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let text = match this_string(ctx, frame) {
        Ok(text) => text,
        Err(exc) => return exc,
    };
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len() as i64;
    let clamp = |v: &Value| -> i64 {
        let f = v.to_number().unwrap_or(f64::NAN);
        if f.is_nan() { 0 } else { (f as i64).clamp(0, len) }
    };
    let mut start = clamp(&frame.arg(0));
    let mut end = if frame.arg(1).is_undefined() {
        len
    } else {
        clamp(&frame.arg(1))
    };
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    let result: String = chars[start as usize..end as usize].iter().collect();
    Value::str(&result)
}

fn string_index_of(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let text = match this_string(ctx, frame) {
        Ok(text) => text,
        Err(exc) => return exc,
    };
    let needle = frame.arg(0).to_display_string();
    match text.find(&needle) {
        Some(byte_idx) => Value::int(text[..byte_idx].chars().count() as i64),
        None => Value::int(-1),
    }
}

fn string_to_lower_case(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    match this_string(ctx, frame) {
        Ok(text) => Value::str(&text.to_lowercase()),
        Err(exc) => exc,
    }
}

fn string_to_upper_case(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    match this_string(ctx, frame) {
        Ok(text) => Value::str(&text.to_uppercase()),
        Err(exc) => exc,
    }
}

fn string_trim(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    match this_string(ctx, frame) {
        Ok(text) => Value::str(text.trim()),
        Err(exc) => exc,
    }
}

fn string_replace(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let text = match this_string(ctx, frame) {
        Ok(text) => text,
        Err(exc) => return exc,
    };
    let pattern = frame.arg(0).to_display_string();
    let replacement = frame.arg(1).to_display_string();
    Value::str(&text.replacen(pattern.as_str(), replacement.as_str(), 1))
}

// ==================== Promise ====================

fn promise_constructor(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    crate::promise::new_promise_with_executor(ctx, frame.arg(0))
}

fn promise_resolve_static(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    crate::promise::resolved_with(ctx, frame.arg(0))
}

fn promise_reject_static(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    crate::promise::rejected_with(ctx, frame.arg(0))
}

fn promise_then(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    crate::promise::then(ctx, frame.this_val(), frame.arg(0), frame.arg(1))
}

// ==================== Symbol ====================

fn symbol_constructor(ctx: &mut Context, argc: u32, frame: &StackFrame) -> Value {
    let description = if argc >= 1 && !frame.arg(0).is_undefined() {
        Some(frame.arg(0).to_display_string())
    } else {
        None
    };
    ctx.new_symbol(description)
}

fn symbol_for_static(ctx: &mut Context, _argc: u32, frame: &StackFrame) -> Value {
    let name = frame.arg(0).to_display_string();
    ctx.symbol_for(&name)
}
