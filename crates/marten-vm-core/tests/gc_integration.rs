//! GC integration: collections under real object graphs

use std::sync::Arc;

use marten_vm_core::{Context, Runtime, Value};

fn engine() -> (Arc<Runtime>, Context) {
    let runtime = Runtime::new();
    let ctx = Context::new(runtime.clone());
    (runtime, ctx)
}

/// `let a = []; for (...) a.push({i}); a.length` — everything survives a
/// forced major collection with its contents intact.
#[test]
fn mass_allocation_survives_major_gc() {
    const COUNT: i64 = 100_000;

    let (runtime, mut ctx) = engine();
    let i_key = runtime.intern(Value::str("i"));

    let scope = ctx.open_handle_scope();
    let arr = ctx.new_array(Vec::new());
    let arr_h = ctx.handle(arr);

    for i in 0..COUNT {
        // Allocation may collect; the array handle is rewritten for us.
        let obj = ctx.new_plain_object();
        ctx.set_property(&obj, i_key, Value::int(i));
        let arr = ctx.handle_value(arr_h);
        let arr_obj = arr.as_object().unwrap();
        ctx.record_write(arr_obj, &obj);
        arr_obj.as_array().unwrap().elements.push(obj);
    }

    let stats = ctx.heap().stats();
    assert!(stats.scavenge_count > 0, "the loop must have scavenged");

    ctx.collect_garbage(true);

    let arr = ctx.handle_value(arr_h);
    let arr_obj = arr.as_object().unwrap();
    assert_eq!(arr_obj.as_array().unwrap().elements.len(), COUNT as usize);
    for i in 0..COUNT {
        let element = arr_obj.as_array().unwrap().elements[i as usize].clone();
        assert_eq!(
            ctx.get_property(&element, i_key).as_int(),
            Some(i),
            "element {i} lost its payload"
        );
    }
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// A linked chain stays intact and ordered across minor and major
/// collections.
#[test]
fn object_graph_survives_collections() {
    let (runtime, mut ctx) = engine();
    let next_key = runtime.intern(Value::str("link"));
    let tag_key = runtime.intern(Value::str("tag"));

    let scope = ctx.open_handle_scope();
    let head = ctx.new_plain_object();
    ctx.set_property(&head, tag_key, Value::int(0));
    let head_h = ctx.handle(head);

    let mut prev_h = head_h;
    for i in 1..1000i64 {
        let node = ctx.new_plain_object();
        ctx.set_property(&node, tag_key, Value::int(i));
        let node_h = ctx.handle(node);
        let prev = ctx.handle_value(prev_h);
        let node = ctx.handle_value(node_h);
        ctx.set_property(&prev, next_key, node);
        prev_h = node_h;
    }

    ctx.collect_garbage(false);
    ctx.collect_garbage(true);
    ctx.collect_garbage(false);

    let mut cursor = ctx.handle_value(head_h);
    for expected in 0..1000i64 {
        assert_eq!(ctx.get_property(&cursor, tag_key).as_int(), Some(expected));
        cursor = ctx.get_property(&cursor, next_key);
    }
    assert!(cursor.is_undefined(), "chain ends after the last node");
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Unreferenced objects are reclaimed; rooted ones are not.
#[test]
fn unrooted_objects_are_collected() {
    let (_runtime, mut ctx) = engine();

    let scope = ctx.open_handle_scope();
    let keeper = ctx.new_plain_object();
    let keeper_h = ctx.handle(keeper);

    for _ in 0..10_000 {
        let _garbage = ctx.new_plain_object();
    }
    ctx.collect_garbage(true);

    let used_after = ctx.heap().young_used() + ctx.heap().old_used();
    // The live set is one object plus the runtime's built-ins; ten
    // thousand garbage objects would dwarf it.
    assert!(
        used_after < 512 * 1024,
        "garbage was not reclaimed: {used_after} bytes live"
    );
    assert!(ctx.handle_value(keeper_h).is_object());
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// A suspended generator's saved stack is traced: its values survive
/// collections between resumptions.
#[test]
fn suspended_generator_state_survives_gc() {
    use marten_vm_bytecode::{FunctionDef, Opcode};

    let (runtime, mut ctx) = engine();
    let c1 = runtime.intern(Value::int(41));

    // function* g(seed) { yield seed; yield seed + 1; }
    let mut def = FunctionDef::new("g", 1);
    def.flags.is_generator = true;
    def.var_def_table.add_var("seed");
    let bc = &mut def.bytecode;
    bc.emit_var_load(0);
    bc.emit_opcode(Opcode::Yield);
    bc.emit_opcode(Opcode::Pop);
    bc.emit_var_load(0);
    bc.emit_const_load(c1);
    bc.emit_opcode(Opcode::Add);
    bc.emit_opcode(Opcode::Yield);
    bc.emit_opcode(Opcode::Pop);
    bc.emit_opcode(Opcode::Undefined);
    bc.emit_opcode(Opcode::GeneratorReturn);
    let def = Arc::new(def);

    let scope = ctx.open_handle_scope();
    let func = Value::function_def(def);
    let r#gen = ctx.call_function(&func, Value::undefined(), &[Value::int(1)]);
    let gen_h = ctx.handle(r#gen);

    let next_key = runtime.keys().next;
    let value_key = runtime.keys().value;

    let r#gen = ctx.handle_value(gen_h);
    let next_fn = ctx.get_property(&r#gen, next_key);
    let r#gen = ctx.handle_value(gen_h);
    let first = ctx.call_function(&next_fn, r#gen, &[]);
    assert_eq!(ctx.get_property(&first, value_key).as_int(), Some(1));

    // Churn the heap while the generator sleeps.
    for _ in 0..5_000 {
        let _ = ctx.new_plain_object();
    }
    ctx.collect_garbage(true);

    let r#gen = ctx.handle_value(gen_h);
    let next_fn = ctx.get_property(&r#gen, next_key);
    let r#gen = ctx.handle_value(gen_h);
    let second = ctx.call_function(&next_fn, r#gen, &[]);
    assert_eq!(ctx.get_property(&second, value_key).as_int(), Some(42));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}

/// Values queued as microtask arguments are roots.
#[test]
fn queued_jobs_keep_their_values_alive() {
    use marten_vm_core::promise;

    let (runtime, mut ctx) = engine();
    let tag_key = runtime.intern(Value::str("tag"));

    let scope = ctx.open_handle_scope();
    let p = promise::new_promise(&mut ctx);
    let p_h = ctx.handle(p);

    fn read_tag(ctx: &mut Context, _argc: u32, frame: &marten_vm_core::StackFrame) -> Value {
        let tag_key = ctx.runtime().intern(Value::str("tag"));
        ctx.get_property(&frame.arg(0), tag_key)
    }

    let p = ctx.handle_value(p_h);
    let child = promise::then(&mut ctx, p, Value::cpp_function(read_tag), Value::undefined());
    let child_h = ctx.handle(child);

    // Resolve with a fresh object, then drop every direct reference to it
    // except the queued job's argument.
    let payload = ctx.new_plain_object();
    ctx.set_property(&payload, tag_key, Value::int(7));
    let p = ctx.handle_value(p_h);
    promise::resolve(&mut ctx, p, payload);

    ctx.collect_garbage(true);
    ctx.run_microtasks();

    let child = ctx.handle_value(child_h);
    let data = child.as_object().unwrap().as_promise().unwrap();
    assert_eq!(data.result_or_reason.as_int(), Some(7));
    let _ = ctx.close_handle_scope(scope, Value::undefined());
}
