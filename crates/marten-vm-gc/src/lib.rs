//! # Marten VM Garbage Collector
//!
//! Precise, generational, moving collector.
//!
//! ## Design
//!
//! - **Young generation**: two equal semispaces, bump allocation, Cheney
//!   copying collection ("Scavenge"); survivors promote to the old
//!   generation after a fixed number of collections
//! - **Old generation**: one contiguous region collected by mark-compact
//!   (slide live objects left), grown by doubling when exhausted
//! - **Large objects** (≥ ¼ semispace) bypass the young generation
//! - **Roots** are discovered on demand by the embedder through the
//!   [`RootSet`] trait; the heap stores no root list of its own
//! - **Write barrier**: a remembered set of old-generation objects that may
//!   reference young objects, consulted as extra roots during Scavenge

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod heap;
pub mod object;
pub mod space;

pub use heap::{GcConfig, GcHeap, GcStats, NoRoots, RootSet};
pub use object::{
    ChildVisitor, GC_ALIGNMENT, GcGeneration, GcHeader, GcKind, GcTrace, GcVTable, HEADER_SIZE,
    align_size, drop_thunk, total_size, trace_thunk,
};
