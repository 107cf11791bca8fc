//! Debug tables: PC-to-source mapping
//!
//! `DebugTable` records which source span produced each PC range; `LineTable`
//! converts source byte offsets to 1-based line numbers. Stack traces are
//! reconstructed lazily from the two.

use serde::{Deserialize, Serialize};

use crate::operand::Pc;

/// One PC range and the source offset it was compiled from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DebugEntry {
    /// First PC of the range.
    pub pc_start: Pc,
    /// One past the last PC of the range.
    pub pc_end: Pc,
    /// Byte offset of the originating source position.
    pub source_offset: u32,
}

/// Maps PC ranges back to source positions.
///
/// Entries are appended in increasing `pc_start` order by the compiler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugTable {
    entries: Vec<DebugEntry>,
}

impl DebugTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `[pc_start, pc_end)` came from `source_offset`.
    pub fn add_entry(&mut self, pc_start: Pc, pc_end: Pc, source_offset: u32) {
        self.entries.push(DebugEntry {
            pc_start,
            pc_end,
            source_offset,
        });
    }

    /// Source offset for `pc`, if recorded.
    pub fn find(&self, pc: Pc) -> Option<u32> {
        // Entries are sorted by pc_start; the last entry starting at or
        // before pc wins.
        let idx = self.entries.partition_point(|e| e.pc_start <= pc);
        if idx == 0 {
            return None;
        }
        let entry = &self.entries[idx - 1];
        (pc < entry.pc_end).then_some(entry.source_offset)
    }

    /// All entries in emission order.
    pub fn entries(&self) -> &[DebugEntry] {
        &self.entries
    }
}

/// Source line boundaries for one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineTable {
    /// Byte offset of the start of each line, line 1 first.
    line_starts: Vec<u32>,
}

impl LineTable {
    /// Build from source text.
    pub fn build(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self { line_starts }
    }

    /// 1-based line number containing `offset`.
    pub fn line_of(&self, offset: u32) -> u32 {
        self.line_starts.partition_point(|&start| start <= offset) as u32
    }

    /// 1-based column of `offset` within its line.
    pub fn column_of(&self, offset: u32) -> u32 {
        let line = self.line_of(offset);
        let start = self.line_starts[line as usize - 1];
        offset - start + 1
    }

    /// Number of lines.
    pub fn line_count(&self) -> u32 {
        self.line_starts.len() as u32
    }
}
