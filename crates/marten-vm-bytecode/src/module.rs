//! Module definitions
//!
//! A `ModuleDef` is a [`FunctionDef`] for the module body plus the export
//! linkage table and a line table for its source. Property stores that hit an
//! exported binding are routed through the module object's export slots, so
//! importers observe live values.

use serde::{Deserialize, Serialize};

use crate::debug::LineTable;
use crate::function::{FunctionDef, FunctionFlags};
use crate::operand::{ConstIndex, VarIndex};

/// Linkage of one exported binding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExportVarDef {
    /// Slot in the module object's export vector.
    pub export_slot: u32,
    /// Frame-local slot of the binding inside the module body.
    pub var_slot: VarIndex,
}

/// Export table: interned export name → slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportVarDefTable {
    defs: Vec<(ConstIndex, ExportVarDef)>,
}

impl ExportVarDefTable {
    /// Register an export; returns its export slot.
    pub fn add_export_var(&mut self, name: ConstIndex, var_slot: VarIndex) -> u32 {
        let export_slot = self.defs.len() as u32;
        self.defs.push((
            name,
            ExportVarDef {
                export_slot,
                var_slot,
            },
        ));
        export_slot
    }

    /// Linkage for the export named by `name`, if any.
    pub fn find(&self, name: ConstIndex) -> Option<&ExportVarDef> {
        self.defs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, def)| def)
    }

    /// Number of exports.
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// True when the module exports nothing.
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Exports in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ConstIndex, &ExportVarDef)> {
        self.defs.iter().map(|(name, def)| (*name, def))
    }
}

/// A compiled module: body function, export linkage and line mapping.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleDef {
    /// The module body function.
    pub function: FunctionDef,
    /// Export linkage table.
    pub export_var_def_table: ExportVarDefTable,
    /// Source line boundaries (for lazy stack traces).
    pub line_table: LineTable,
}

impl ModuleDef {
    /// Create a module definition, building the line table from `source`.
    pub fn new(name: impl Into<String>, source: &str) -> Self {
        let mut function = FunctionDef::new(name, 0);
        function.flags = FunctionFlags::module();
        Self {
            function,
            export_var_def_table: ExportVarDefTable::default(),
            line_table: LineTable::build(source),
        }
    }

    /// Module name (the body function's name).
    pub fn name(&self) -> &str {
        &self.function.name
    }
}
