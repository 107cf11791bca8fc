//! Bytecode error types

use thiserror::Error;

/// Errors surfaced while decoding or validating bytecode.
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// An opcode byte outside the defined set.
    #[error("invalid opcode byte {0:#04x} at pc {1}")]
    InvalidOpcode(u8, u32),

    /// A PC outside the function's bytecode.
    #[error("pc {0} out of range (size {1})")]
    PcOutOfRange(u32, u32),

    /// A constant index that no pool can resolve.
    #[error("invalid constant index {0}")]
    InvalidConstIndex(i32),
}
