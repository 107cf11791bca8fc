//! # Marten VM Runtime
//!
//! The embedder-facing shell around the core: the [`Marten`] facade owning
//! a runtime and its default context, and the module loader implementing
//! the core's module-manager contract over a pluggable provider (the
//! compiler is a collaborator; providers hand in compiled `ModuleDef`s).

#![warn(clippy::all)]

pub mod marten_runtime;
pub mod module_loader;

pub use marten_runtime::Marten;
pub use module_loader::{MapProvider, ModuleLoader, ModuleProvider};
