//! Baseline JIT surface
//!
//! The interpreter is complete without this module; it is the optional
//! upgrade path driven by the per-function hotness counter. "Compilation"
//! translates a function's bytecode into a table of per-opcode **stubs** —
//! functions with the fixed signature `(context, frame, imm)` that perform
//! exactly the interpreter's effect for that opcode. Data-flow opcodes have
//! real stubs; control flow, calls and suspensions bail out to the
//! interpreter, which continues at the frame's current PC.
//!
//! Compiled tables are cached per function definition, size-accounted, and
//! pruned least-recently-used past a byte threshold.

use std::collections::VecDeque;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use marten_vm_bytecode::{ExecutionState, FunctionDef, Opcode, Pc};

use crate::context::Context;
use crate::interpreter::{StackFrame, Vm};

/// What a stub did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubOutcome {
    /// Effect applied; proceed to the next instruction.
    Continue,
    /// Not handled here; the interpreter resumes at the frame's PC.
    Bailout,
}

/// Per-opcode stub: performs one instruction's effect.
pub type OpcodeStub = fn(&mut Context, &mut StackFrame, u32) -> StubOutcome;

macro_rules! simple_stub {
    ($name:ident, $op:expr) => {
        fn $name(ctx: &mut Context, frame: &mut StackFrame, imm: u32) -> StubOutcome {
            Vm::step_simple(ctx, frame, $op, imm)
        }
    };
}

simple_stub!(stub_cload, Opcode::CLoad);
simple_stub!(stub_vload, Opcode::VLoad);
simple_stub!(stub_vstore, Opcode::VStore);
simple_stub!(stub_pop, Opcode::Pop);
simple_stub!(stub_dump, Opcode::Dump);
simple_stub!(stub_swap, Opcode::Swap);
simple_stub!(stub_undefined, Opcode::Undefined);
simple_stub!(stub_add, Opcode::Add);
simple_stub!(stub_inc, Opcode::Inc);
simple_stub!(stub_sub, Opcode::Sub);
simple_stub!(stub_mul, Opcode::Mul);
simple_stub!(stub_div, Opcode::Div);
simple_stub!(stub_mod, Opcode::Mod);
simple_stub!(stub_eq, Opcode::Eq);
simple_stub!(stub_ne, Opcode::Ne);
simple_stub!(stub_lt, Opcode::Lt);
simple_stub!(stub_le, Opcode::Le);
simple_stub!(stub_gt, Opcode::Gt);
simple_stub!(stub_ge, Opcode::Ge);

/// Everything the baseline tier does not handle inline.
fn stub_bailout(_ctx: &mut Context, _frame: &mut StackFrame, _imm: u32) -> StubOutcome {
    StubOutcome::Bailout
}

/// The stub for one opcode (bailout for the complex ones).
pub fn stub_for(opcode: Opcode) -> OpcodeStub {
    match opcode {
        Opcode::CLoad0
        | Opcode::CLoad1
        | Opcode::CLoad2
        | Opcode::CLoad3
        | Opcode::CLoad4
        | Opcode::CLoad5
        | Opcode::CLoad
        | Opcode::CLoadW
        | Opcode::CLoadD => stub_cload,
        Opcode::VLoad | Opcode::VLoad0 | Opcode::VLoad1 | Opcode::VLoad2 | Opcode::VLoad3 => {
            stub_vload
        }
        Opcode::VStore | Opcode::VStore0 | Opcode::VStore1 | Opcode::VStore2 | Opcode::VStore3 => {
            stub_vstore
        }
        Opcode::Pop => stub_pop,
        Opcode::Dump => stub_dump,
        Opcode::Swap => stub_swap,
        Opcode::Undefined => stub_undefined,
        Opcode::Add => stub_add,
        Opcode::Inc => stub_inc,
        Opcode::Sub => stub_sub,
        Opcode::Mul => stub_mul,
        Opcode::Div => stub_div,
        Opcode::Mod => stub_mod,
        Opcode::Eq => stub_eq,
        Opcode::Ne => stub_ne,
        Opcode::Lt => stub_lt,
        Opcode::Le => stub_le,
        Opcode::Gt => stub_gt,
        Opcode::Ge => stub_ge,
        _ => stub_bailout,
    }
}

/// One translated instruction.
#[derive(Clone, Copy)]
struct StubEntry {
    stub: OpcodeStub,
    imm: u32,
    next_pc: Pc,
}

/// A baseline-compiled function: PC-indexed stub table.
pub struct JitCode {
    entries: FxHashMap<Pc, StubEntry>,
    size_bytes: usize,
}

impl JitCode {
    /// Approximate memory footprint (cache accounting).
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// Translate a function's bytecode into its stub table.
pub fn compile_baseline(def: &FunctionDef) -> JitCode {
    let bc = &def.bytecode;
    let mut entries = FxHashMap::default();
    let mut pc: Pc = 0;
    while pc < bc.len() {
        let opcode = bc.opcode(pc);
        let imm: u32 = match opcode {
            Opcode::CLoad0 => 0,
            Opcode::CLoad1 => 1,
            Opcode::CLoad2 => 2,
            Opcode::CLoad3 => 3,
            Opcode::CLoad4 => 4,
            Opcode::CLoad5 => 5,
            Opcode::CLoad | Opcode::VLoad | Opcode::VStore => bc.get_u8(pc + 1) as u32,
            Opcode::CLoadW => bc.get_u16(pc + 1) as u32,
            Opcode::CLoadD => bc.get_u32(pc + 1),
            Opcode::VLoad0 | Opcode::VStore0 => 0,
            Opcode::VLoad1 | Opcode::VStore1 => 1,
            Opcode::VLoad2 | Opcode::VStore2 => 2,
            Opcode::VLoad3 | Opcode::VStore3 => 3,
            _ => 0,
        };
        let next_pc = pc + opcode.encoded_size();
        entries.insert(
            pc,
            StubEntry {
                stub: stub_for(opcode),
                imm,
                next_pc,
            },
        );
        pc = next_pc;
    }
    let size_bytes = entries.len() * std::mem::size_of::<(Pc, StubEntry)>();
    JitCode {
        entries,
        size_bytes,
    }
}

/// Default cache prune threshold (bytes of translated code).
const DEFAULT_PRUNE_THRESHOLD: usize = 256 * 1024;

/// Cache of baseline-compiled functions, keyed by definition identity.
pub struct JitManager {
    enabled: bool,
    cache: FxHashMap<usize, JitCode>,
    lru: VecDeque<usize>,
    total_bytes: usize,
    prune_threshold: usize,
}

impl JitManager {
    /// Disabled-by-default manager.
    pub fn new() -> Self {
        Self {
            enabled: false,
            cache: FxHashMap::default(),
            lru: VecDeque::new(),
            total_bytes: 0,
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
        }
    }

    /// Is the baseline tier active?
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Turn the baseline tier on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Bytes of translated code currently cached.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of cached functions.
    pub fn cached_functions(&self) -> usize {
        self.cache.len()
    }

    /// Install translated code for the function identified by `key`.
    pub fn install(&mut self, key: usize, code: JitCode) {
        self.total_bytes += code.size_bytes();
        if self.cache.insert(key, code).is_none() {
            self.lru.push_back(key);
        }
        self.prune();
    }

    fn touch(&mut self, key: usize) {
        if let Some(pos) = self.lru.iter().position(|&k| k == key) {
            self.lru.remove(pos);
            self.lru.push_back(key);
        }
    }

    fn lookup_entry(&mut self, key: usize, pc: Pc) -> Option<StubEntry> {
        let entry = self.cache.get(&key)?.entries.get(&pc).copied();
        if entry.is_some() {
            self.touch(key);
        }
        entry
    }

    /// Evict least-recently-used translations past the size threshold.
    fn prune(&mut self) {
        while self.total_bytes > self.prune_threshold {
            let Some(oldest) = self.lru.pop_front() else {
                break;
            };
            if let Some(code) = self.cache.remove(&oldest) {
                self.total_bytes -= code.size_bytes();
            }
        }
    }
}

impl Default for JitManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile a function when its counter crossed the warmup threshold.
pub fn maybe_compile(ctx: &mut Context, def: &Arc<FunctionDef>) {
    if def.hotness.state() != ExecutionState::Warmup {
        return;
    }
    let code = compile_baseline(def);
    let key = Arc::as_ptr(def) as usize;
    ctx.jit().install(key, code);
    def.hotness.set_state(ExecutionState::Baseline);
}

/// Run baseline stubs from the frame's PC until the first bailout.
///
/// The interpreter resumes seamlessly: stubs leave the frame exactly as the
/// equivalent interpreter case would.
pub fn run_baseline(ctx: &mut Context, frame: &mut StackFrame, def: &FunctionDef) {
    if def.hotness.state() != ExecutionState::Baseline {
        return;
    }
    let key = def as *const FunctionDef as usize;
    loop {
        let Some(entry) = ctx.jit().lookup_entry(key, frame.pc) else {
            return;
        };
        match (entry.stub)(ctx, frame, entry.imm) {
            StubOutcome::Continue => frame.pc = entry.next_pc,
            StubOutcome::Bailout => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_vm_bytecode::ConstIndex;

    fn add_function() -> FunctionDef {
        let mut def = FunctionDef::new("adder", 2);
        def.var_def_table.add_var("a");
        def.var_def_table.add_var("b");
        def.bytecode.emit_var_load(0);
        def.bytecode.emit_var_load(1);
        def.bytecode.emit_opcode(Opcode::Add);
        def.bytecode.emit_opcode(Opcode::Return);
        def
    }

    #[test]
    fn compile_covers_every_instruction() {
        let def = add_function();
        let code = compile_baseline(&def);
        assert_eq!(code.entries.len(), 4);
        assert!(code.size_bytes() > 0);
    }

    #[test]
    fn unsupported_opcodes_get_bailout_stub() {
        let mut def = FunctionDef::new("jumpy", 0);
        def.bytecode.emit_jump(Opcode::Goto);
        let code = compile_baseline(&def);
        let entry = code.entries.get(&0).unwrap();
        assert!(std::ptr::fn_addr_eq(
            entry.stub,
            stub_bailout as OpcodeStub
        ));
    }

    #[test]
    fn cache_prunes_least_recently_used() {
        let mut manager = JitManager::new();
        manager.prune_threshold = 1;
        let def_a = add_function();
        let def_b = add_function();
        manager.install(1, compile_baseline(&def_a));
        manager.install(2, compile_baseline(&def_b));
        // Threshold of one byte keeps at most the newest entry.
        assert!(manager.cached_functions() <= 1);
    }

    #[test]
    fn const_load_imm_decoding() {
        let mut def = FunctionDef::new("consts", 0);
        def.bytecode.emit_const_load(ConstIndex::new(3));
        def.bytecode.emit_const_load(ConstIndex::new(300));
        let code = compile_baseline(&def);
        assert_eq!(code.entries.get(&0).unwrap().imm, 3);
        assert_eq!(code.entries.get(&1).unwrap().imm, 300);
    }
}
