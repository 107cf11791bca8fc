//! # Marten VM Bytecode
//!
//! This crate defines the bytecode format for the Marten JavaScript engine:
//! the opcode set, the variable-length instruction buffer, and the function
//! and module definition tables the interpreter executes against.
//!
//! ## Design Principles
//!
//! - **Stack-based**: opcodes push and pop a shared operand stack
//! - **Compact**: narrow encodings for small constant/variable indices
//! - **Pool-addressed**: property keys and constants are signed pool indices
//!   (positive = process-global pool, negative = per-context pool)

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod debug;
pub mod error;
pub mod exception;
pub mod function;
pub mod hotness;
pub mod module;
pub mod opcode;
pub mod operand;
pub mod table;

pub use debug::{DebugEntry, DebugTable, LineTable};
pub use error::BytecodeError;
pub use exception::{ExceptionEntry, ExceptionTable};
pub use function::{ClosureVarDef, ClosureVarTable, FunctionDef, FunctionFlags, VarDef, VarDefTable};
pub use hotness::{ExecutionState, HotnessCounter};
pub use module::{ExportVarDef, ExportVarDefTable, ModuleDef};
pub use opcode::{Opcode, OperandWidth};
pub use operand::{ConstIndex, Pc, VarIndex, INVALID_PC, INVALID_VAR_INDEX};
pub use table::BytecodeTable;
