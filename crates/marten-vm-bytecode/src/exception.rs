//! Per-function exception tables
//!
//! Structured exception flow is table-driven: each `try`/`catch`/`finally`
//! construct compiles to one [`ExceptionEntry`] describing its PC regions.
//! The interpreter consults the table when an exception-flagged value
//! surfaces (or when a `return` leaves a protected region with a pending
//! finally).

use serde::{Deserialize, Serialize};

use crate::operand::{INVALID_PC, INVALID_VAR_INDEX, Pc, VarIndex};

/// One protected region: try/catch/finally PC ranges plus the catch binding.
///
/// Absent regions are marked with [`INVALID_PC`]; a catch without an error
/// binding uses [`INVALID_VAR_INDEX`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExceptionEntry {
    /// First PC of the try region.
    pub try_start: Pc,
    /// One past the last PC of the try region.
    pub try_end: Pc,
    /// First PC of the catch region, or `INVALID_PC`.
    pub catch_start: Pc,
    /// One past the last PC of the catch region, or `INVALID_PC`.
    pub catch_end: Pc,
    /// Frame-local the caught exception binds to, or `INVALID_VAR_INDEX`.
    pub catch_err_var: VarIndex,
    /// First PC of the finally region, or `INVALID_PC`.
    pub finally_start: Pc,
    /// One past the last PC of the finally region, or `INVALID_PC`.
    pub finally_end: Pc,
}

impl ExceptionEntry {
    /// Entry with no catch and no finally; fill the fields that apply.
    pub fn new(try_start: Pc, try_end: Pc) -> Self {
        Self {
            try_start,
            try_end,
            catch_start: INVALID_PC,
            catch_end: INVALID_PC,
            catch_err_var: INVALID_VAR_INDEX,
            finally_start: INVALID_PC,
            finally_end: INVALID_PC,
        }
    }

    /// Whole span covered by this entry (`try_start` up to the last region's
    /// end).
    pub fn contains(&self, pc: Pc) -> bool {
        pc >= self.try_start && pc < self.end()
    }

    /// One past the last PC this entry protects.
    pub fn end(&self) -> Pc {
        if self.has_finally() {
            self.finally_end
        } else if self.has_catch() {
            self.catch_end
        } else {
            self.try_end
        }
    }

    /// True if a catch region exists.
    pub fn has_catch(&self) -> bool {
        self.catch_start != INVALID_PC
    }

    /// True if a finally region exists.
    pub fn has_finally(&self) -> bool {
        self.finally_start != INVALID_PC
    }

    /// True when `pc` falls inside the try region.
    pub fn located_in_try(&self, pc: Pc) -> bool {
        pc >= self.try_start && pc < self.try_end
    }

    /// True when `pc` falls inside the catch region.
    pub fn located_in_catch(&self, pc: Pc) -> bool {
        self.has_catch() && pc >= self.catch_start && pc < self.catch_end
    }

    /// True when `pc` falls inside the finally region.
    pub fn located_in_finally(&self, pc: Pc) -> bool {
        self.has_finally() && pc >= self.finally_start && pc < self.finally_end
    }
}

/// Ordered collection of a function's protected regions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExceptionTable {
    entries: Vec<ExceptionEntry>,
}

impl ExceptionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; returns its index.
    pub fn add_entry(&mut self, entry: ExceptionEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Entry by index.
    pub fn entry(&self, idx: usize) -> &ExceptionEntry {
        &self.entries[idx]
    }

    /// Innermost entry whose span contains `pc`.
    ///
    /// Nested regions have strictly smaller spans, so the containing entry
    /// with the narrowest try range is the innermost handler.
    pub fn find_entry(&self, pc: Pc) -> Option<&ExceptionEntry> {
        self.entries
            .iter()
            .filter(|e| e.contains(pc))
            .min_by_key(|e| e.end() - e.try_start)
    }

    /// Innermost entry fully contained in `[start_pc, end_pc)`.
    pub fn find_innermost_entry(&self, start_pc: Pc, end_pc: Pc) -> Option<&ExceptionEntry> {
        self.entries
            .iter()
            .filter(|e| e.try_start >= start_pc && e.try_end <= end_pc)
            .min_by_key(|e| e.try_end - e.try_start)
    }

    /// All entries, in emission order.
    pub fn entries(&self) -> &[ExceptionEntry] {
        &self.entries
    }

    /// True when the function has no protected regions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(try_start: Pc, try_end: Pc, catch: Option<(Pc, Pc)>, finally: Option<(Pc, Pc)>) -> ExceptionEntry {
        let mut e = ExceptionEntry::new(try_start, try_end);
        if let Some((cs, ce)) = catch {
            e.catch_start = cs;
            e.catch_end = ce;
            e.catch_err_var = 0;
        }
        if let Some((fs, fe)) = finally {
            e.finally_start = fs;
            e.finally_end = fe;
        }
        e
    }

    #[test]
    fn find_prefers_innermost() {
        let mut table = ExceptionTable::new();
        table.add_entry(entry(0, 100, Some((100, 120)), None));
        table.add_entry(entry(10, 20, Some((20, 30)), None));

        let found = table.find_entry(15).unwrap();
        assert_eq!(found.try_start, 10);
    }

    #[test]
    fn span_covers_catch_and_finally() {
        let e = entry(0, 10, Some((10, 20)), Some((20, 30)));
        assert!(e.contains(0));
        assert!(e.contains(25));
        assert!(!e.contains(30));
        assert!(e.located_in_catch(12));
        assert!(e.located_in_finally(22));
        assert!(!e.located_in_try(12));
    }

    #[test]
    fn entry_without_handlers() {
        let e = ExceptionEntry::new(5, 9);
        assert!(!e.has_catch());
        assert!(!e.has_finally());
        assert_eq!(e.end(), 9);
    }
}
