//! Hotness-driven tiering: the baseline stub tier must be observationally
//! identical to the interpreter.

use std::sync::Arc;

use marten_vm_bytecode::{ExecutionState, FunctionDef, HotnessCounter, Opcode};
use marten_vm_core::Value;
use marten_vm_runtime::Marten;

/// `function sum3(a, b, c) { return a + b * c; }`
fn arith_def() -> Arc<FunctionDef> {
    let mut def = FunctionDef::new("sum3", 3);
    def.var_def_table.add_var("a");
    def.var_def_table.add_var("b");
    def.var_def_table.add_var("c");
    let bc = &mut def.bytecode;
    bc.emit_var_load(0);
    bc.emit_var_load(1);
    bc.emit_var_load(2);
    bc.emit_opcode(Opcode::Mul);
    bc.emit_opcode(Opcode::Add);
    bc.emit_opcode(Opcode::Return);
    Arc::new(def)
}

#[test]
fn functions_warm_up_and_compile() {
    let mut marten = Marten::new();
    marten.set_jit_enabled(true);
    let def = arith_def();

    for _ in 0..HotnessCounter::BASELINE_THRESHOLD {
        let result = marten.call(&def, &[Value::int(1), Value::int(2), Value::int(3)]);
        assert_eq!(result.as_int(), Some(7));
    }
    // The warmup call compiled and installed baseline code.
    assert_eq!(def.hotness.state(), ExecutionState::Baseline);
    assert!(marten.context().jit().cached_functions() >= 1);

    // Baseline execution computes the same results.
    let result = marten.call(&def, &[Value::int(10), Value::int(4), Value::int(5)]);
    assert_eq!(result.as_int(), Some(30));
}

#[test]
fn interpreter_and_baseline_agree() {
    let inputs: &[(i64, i64, i64)] = &[(0, 0, 0), (1, 2, 3), (-5, 7, 2), (1000, -3, 9)];

    // Interpreter-only run.
    let mut cold = Marten::new();
    let cold_def = arith_def();
    let expected: Vec<Value> = inputs
        .iter()
        .map(|&(a, b, c)| cold.call(&cold_def, &[Value::int(a), Value::int(b), Value::int(c)]))
        .collect();

    // Hot run through the baseline tier.
    let mut hot = Marten::new();
    hot.set_jit_enabled(true);
    let hot_def = arith_def();
    hot_def.hotness.set_state(ExecutionState::Warmup);
    for (i, &(a, b, c)) in inputs.iter().enumerate() {
        let result = hot.call(&hot_def, &[Value::int(a), Value::int(b), Value::int(c)]);
        assert!(
            result.loose_equals(&expected[i]),
            "baseline diverged on input {i}"
        );
    }
    assert_eq!(hot_def.hotness.state(), ExecutionState::Baseline);
}

#[test]
fn counting_without_jit_never_compiles() {
    let mut marten = Marten::new();
    let def = arith_def();
    for _ in 0..HotnessCounter::BASELINE_THRESHOLD + 10 {
        marten.call(&def, &[Value::int(1), Value::int(1), Value::int(1)]);
    }
    // The counter advanced to warmup, but nothing was installed.
    assert_eq!(def.hotness.state(), ExecutionState::Warmup);
    assert_eq!(marten.context().jit().cached_functions(), 0);
}
