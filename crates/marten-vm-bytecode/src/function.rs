//! Function definitions
//!
//! A `FunctionDef` is the compiler's output for one function: its bytecode
//! plus the side tables the interpreter needs (locals, captured variables,
//! protected regions, debug spans) and the tiering counter. Definitions are
//! immutable once built and shared behind `Arc`.

use serde::{Deserialize, Serialize};

use crate::debug::DebugTable;
use crate::exception::ExceptionTable;
use crate::hotness::HotnessCounter;
use crate::operand::VarIndex;
use crate::table::BytecodeTable;

/// Function-kind flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionFlags {
    /// Ordinary function (own `this` binding).
    pub is_normal: bool,
    /// Module body function.
    pub is_module: bool,
    /// Arrow function (lexical `this`).
    pub is_arrow: bool,
    /// Generator function.
    pub is_generator: bool,
    /// Async function.
    pub is_async: bool,
}

impl FunctionFlags {
    /// Flags for an ordinary function.
    pub fn normal() -> Self {
        Self {
            is_normal: true,
            ..Default::default()
        }
    }

    /// Flags for an arrow function.
    pub fn arrow() -> Self {
        Self {
            is_arrow: true,
            ..Default::default()
        }
    }

    /// Flags for a module body.
    pub fn module() -> Self {
        Self {
            is_module: true,
            ..Default::default()
        }
    }
}

/// One declared local variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDef {
    /// Source name of the variable.
    pub name: String,
    /// True when the variable is a module export binding.
    pub is_export: bool,
}

/// Declaration table of a function's frame locals.
///
/// Slot order is declaration order: parameters first, then body locals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VarDefTable {
    var_defs: Vec<VarDef>,
}

impl VarDefTable {
    /// Declare a variable; returns its slot index.
    pub fn add_var(&mut self, name: impl Into<String>) -> VarIndex {
        self.var_defs.push(VarDef {
            name: name.into(),
            is_export: false,
        });
        (self.var_defs.len() - 1) as VarIndex
    }

    /// Declare an exported variable; returns its slot index.
    pub fn add_export_var(&mut self, name: impl Into<String>) -> VarIndex {
        let idx = self.add_var(name);
        self.var_defs[idx as usize].is_export = true;
        idx
    }

    /// Declaration for slot `idx`.
    pub fn var_info(&self, idx: VarIndex) -> &VarDef {
        &self.var_defs[idx as usize]
    }

    /// Number of declared locals.
    pub fn var_count(&self) -> u32 {
        self.var_defs.len() as u32
    }

    /// All declarations in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (VarIndex, &VarDef)> {
        self.var_defs
            .iter()
            .enumerate()
            .map(|(i, def)| (i as VarIndex, def))
    }
}

/// Where one captured variable comes from when a closure is built.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClosureVarDef {
    /// Slot of this capture in the closure environment.
    pub env_slot: u32,
    /// Variable index in the *enclosing* frame to capture, or
    /// [`crate::INVALID_VAR_INDEX`] when the cell is filled elsewhere.
    pub parent_var_index: VarIndex,
}

/// Capture table: frame-local index → closure environment slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClosureVarTable {
    defs: Vec<(VarIndex, ClosureVarDef)>,
}

impl ClosureVarTable {
    /// Record that local `var_idx` is backed by a captured cell pulled from
    /// `parent_var_index` in the enclosing frame.
    pub fn add_closure_var(&mut self, var_idx: VarIndex, parent_var_index: VarIndex) {
        let env_slot = self.defs.len() as u32;
        self.defs.push((
            var_idx,
            ClosureVarDef {
                env_slot,
                parent_var_index,
            },
        ));
    }

    /// Capture description for local `var_idx`, if it is captured.
    pub fn find(&self, var_idx: VarIndex) -> Option<&ClosureVarDef> {
        self.defs
            .iter()
            .find(|(idx, _)| *idx == var_idx)
            .map(|(_, def)| def)
    }

    /// Number of captured variables (== closure environment size).
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// True when nothing is captured.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Captures in environment-slot order.
    pub fn iter(&self) -> impl Iterator<Item = (VarIndex, &ClosureVarDef)> {
        self.defs.iter().map(|(idx, def)| (*idx, def))
    }
}

/// A compiled function: bytecode plus side tables.
#[derive(Debug, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Function name (empty for anonymous).
    pub name: String,
    /// Number of declared parameters.
    pub param_count: u32,
    /// True when the function observes a `this` binding.
    pub has_this: bool,
    /// Kind flags.
    pub flags: FunctionFlags,
    /// Encoded instructions.
    pub bytecode: BytecodeTable,
    /// Frame-local declarations (parameters first).
    pub var_def_table: VarDefTable,
    /// Captured-variable table.
    pub closure_var_table: ClosureVarTable,
    /// Protected regions.
    pub exception_table: ExceptionTable,
    /// PC-to-source spans.
    pub debug_table: DebugTable,
    /// Tiering counter.
    #[serde(skip, default)]
    pub hotness: HotnessCounter,
}

impl FunctionDef {
    /// Fresh definition with empty tables.
    pub fn new(name: impl Into<String>, param_count: u32) -> Self {
        Self {
            name: name.into(),
            param_count,
            has_this: false,
            flags: FunctionFlags::normal(),
            bytecode: BytecodeTable::new(),
            var_def_table: VarDefTable::default(),
            closure_var_table: ClosureVarTable::default(),
            exception_table: ExceptionTable::new(),
            debug_table: DebugTable::new(),
            hotness: HotnessCounter::new(),
        }
    }

    /// Function name or `<anonymous>`.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "<anonymous>"
        } else {
            &self.name
        }
    }

    /// Number of frame locals (parameters included).
    pub fn var_count(&self) -> u32 {
        self.var_def_table.var_count()
    }

    /// True for generator functions.
    #[inline]
    pub fn is_generator(&self) -> bool {
        self.flags.is_generator
    }

    /// True for async functions.
    #[inline]
    pub fn is_async(&self) -> bool {
        self.flags.is_async
    }

    /// True for arrow functions.
    #[inline]
    pub fn is_arrow(&self) -> bool {
        self.flags.is_arrow
    }

    /// True for module bodies.
    #[inline]
    pub fn is_module(&self) -> bool {
        self.flags.is_module
    }

    /// Disassemble the function's bytecode.
    pub fn disassembly(&self) -> String {
        format!(
            "function {} (params: {}, locals: {})\n{}",
            self.display_name(),
            self.param_count,
            self.var_count(),
            self.bytecode.disassemble()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_table_assigns_slots_in_order() {
        let mut table = VarDefTable::default();
        assert_eq!(table.add_var("a"), 0);
        assert_eq!(table.add_var("b"), 1);
        assert_eq!(table.add_export_var("c"), 2);
        assert_eq!(table.var_count(), 3);
        assert!(table.var_info(2).is_export);
        assert!(!table.var_info(0).is_export);
    }

    #[test]
    fn closure_table_env_slots_are_dense() {
        let mut table = ClosureVarTable::default();
        table.add_closure_var(2, 0);
        table.add_closure_var(3, 5);
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(2).unwrap().env_slot, 0);
        assert_eq!(table.find(3).unwrap().env_slot, 1);
        assert_eq!(table.find(3).unwrap().parent_var_index, 5);
        assert!(table.find(0).is_none());
    }

    #[test]
    fn display_name_for_anonymous() {
        let def = FunctionDef::new("", 0);
        assert_eq!(def.display_name(), "<anonymous>");
        let def = FunctionDef::new("add", 2);
        assert_eq!(def.display_name(), "add");
    }
}
