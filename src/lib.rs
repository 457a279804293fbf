//! # Calamus
//!
//! Merge selection for segment-based search indexes.
//!
//! A segment index accumulates immutable on-disk segments as documents are
//! flushed, and recovers space and search parallelism by merging them back
//! together. Calamus is the decision half of that loop: given a snapshot of
//! the current segments and a [`MergeContext`] view of live engine state, it
//! answers "which segments should be combined, and when", leaving the
//! merge I/O to the engine.
//!
//! ## Features
//!
//! - Tiered merge selection bounding both read and write amplification
//! - Deleted-document reclamation, routine and forced
//! - Forced merging down to a target segment count
//! - Flush-time annealing of many small segments
//! - Pure, synchronous decision calls; no I/O, no locks
// Core modules
pub mod context;
mod error;
pub mod plan;
pub mod policy;
pub mod segment;
pub mod size;

// Re-exports for the public API
pub use context::{InMemoryMergeContext, MergeContext};
pub use error::{CalamusError, Result};
pub use plan::{MergeOperation, MergePlan, MergeTrigger};
pub use policy::config::{TieredMergeConfig, TieredMergeConfigBuilder};
pub use policy::tiered::TieredMergePolicy;
pub use policy::{MergePolicy, NoMergePolicy};
pub use segment::{SegmentDescriptor, SegmentSource};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
