//! # Marten VM Core
//!
//! The execution core of the Marten JavaScript engine: the tagged value
//! model, the object model with hidden-class property layout, the two-tier
//! constant pools, the generational GC glue, the promise/generator runtime
//! and the bytecode interpreter.
//!
//! Entry points: build a [`runtime::Runtime`], create its default
//! [`context::Context`] (which installs the built-ins), then drive compiled
//! [`marten_vm_bytecode::FunctionDef`]s through [`context::Context::call_function`].

#![warn(clippy::all)]

pub mod class_def;
pub mod const_pool;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod intrinsics;
pub mod jit;
pub mod job;
pub mod object;
pub mod promise;
pub mod runtime;
pub mod shape;
pub mod string;
pub mod value;

pub use class_def::{ClassDef, ClassDefTable, ClassId};
pub use const_pool::{ConstKey, GlobalConstPool, LocalConstPool};
pub use context::{Context, Handle, HandleScope};
pub use error::{ErrorKind, VmError, VmResult};
pub use interpreter::{Stack, StackFrame, Vm};
pub use job::{Job, JobQueue};
pub use object::{
    ArrayData, ClosureEnv, FunctionData, GeneratorData, GeneratorState, ModuleData, ObjectData,
    ObjectRef, PromiseData, PromiseState, PropertyFlags, PropertySlot,
};
pub use runtime::{EmbeddedKeys, ModuleManager, Runtime};
pub use shape::{KeyResolver, PoolKeys, Shape, ShapeManager, ShapeProperty};
pub use string::{JsString, JsSymbol};
pub use value::{CppFunction, Value, ValueCell, ValueKind};
