//! Error types
//!
//! Two layers: JavaScript-level errors are ordinary [`crate::value::Value`]s
//! carrying the exception bit, built through
//! [`crate::context::Context::new_error`]; host-facing fallible APIs return
//! [`VmError`].

use thiserror::Error;

/// JavaScript error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong type for an operation.
    Type,
    /// Free variable that is not defined.
    Reference,
    /// Invalid numeric range.
    Range,
    /// Surfaced by the compiler collaborator, re-thrown as a value.
    Syntax,
    /// Engine invariant violation reaching user code.
    Internal,
}

impl ErrorKind {
    /// The JS-visible constructor name.
    pub const fn name(self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Range => "RangeError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

/// Host-facing engine errors.
#[derive(Debug, Error)]
pub enum VmError {
    /// An uncaught JS exception escaped a top-level invocation.
    #[error("uncaught exception: {0}")]
    Uncaught(String),

    /// A module path could not be resolved.
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    /// The engine ran out of heap even after a full collection.
    #[error("out of memory")]
    OutOfMemory,

    /// Engine invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result alias for host-facing operations.
pub type VmResult<T> = Result<T, VmError>;
