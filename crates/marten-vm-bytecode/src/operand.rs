//! Bytecode operand types

use serde::{Deserialize, Serialize};

/// Program counter: a byte offset into a function's bytecode table.
pub type Pc = u32;

/// Sentinel for "no PC" (unset jump targets, absent table entries).
pub const INVALID_PC: Pc = 0xffff_ffff;

/// Index of a frame-local variable.
pub type VarIndex = u16;

/// Sentinel for "no variable" (e.g. a catch clause without an error binding).
pub const INVALID_VAR_INDEX: VarIndex = 0xffff;

/// Signed index into a constant pool.
///
/// The sign discriminates the pool: positive indices address the process-wide
/// global pool, negative indices the per-context local pool. Zero is invalid.
/// In bytecode the index is stored as a `u32` bit-cast, so the full 32-bit
/// range round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ConstIndex(pub i32);

impl ConstIndex {
    /// The invalid (zero) index.
    pub const INVALID: ConstIndex = ConstIndex(0);

    /// Create a new constant index.
    #[inline]
    pub const fn new(index: i32) -> Self {
        Self(index)
    }

    /// Raw signed value.
    #[inline]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// True for the zero sentinel.
    #[inline]
    pub const fn is_invalid(self) -> bool {
        self.0 == 0
    }

    /// True if this index addresses the global pool.
    #[inline]
    pub const fn is_global(self) -> bool {
        self.0 > 0
    }

    /// True if this index addresses a context-local pool.
    #[inline]
    pub const fn is_local(self) -> bool {
        self.0 < 0
    }

    /// Slot number inside the local pool (`-index`, 0-based from 1).
    ///
    /// Only meaningful when [`is_local`](Self::is_local) holds.
    #[inline]
    pub const fn local_slot(self) -> usize {
        debug_assert!(self.0 < 0);
        (-(self.0 as i64)) as usize
    }

    /// Bit-cast to the unsigned on-wire form.
    #[inline]
    pub const fn to_wire(self) -> u32 {
        self.0 as u32
    }

    /// Bit-cast from the unsigned on-wire form.
    #[inline]
    pub const fn from_wire(raw: u32) -> Self {
        Self(raw as i32)
    }
}

impl std::fmt::Display for ConstIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_discriminates_pool() {
        assert!(ConstIndex::new(1).is_global());
        assert!(ConstIndex::new(-1).is_local());
        assert!(ConstIndex::new(0).is_invalid());
        assert!(!ConstIndex::new(0).is_global());
        assert!(!ConstIndex::new(0).is_local());
    }

    #[test]
    fn wire_round_trip() {
        for idx in [i32::MIN, -1024, -1, 1, 5, i32::MAX] {
            let c = ConstIndex::new(idx);
            assert_eq!(ConstIndex::from_wire(c.to_wire()), c);
        }
    }

    #[test]
    fn local_slot_is_negated_index() {
        assert_eq!(ConstIndex::new(-1).local_slot(), 1);
        assert_eq!(ConstIndex::new(-42).local_slot(), 42);
    }
}
