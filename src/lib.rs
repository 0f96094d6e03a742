//! Human-gated checkpoint pipelines.
//!
//! A pipeline is an ordered list of checkpoints. Each run of a pipeline is a
//! versioned attempt that walks the checkpoints through an approval state
//! machine, stages and promotes artifacts, and can be rolled back to an
//! earlier checkpoint or an earlier run with everything removed kept in an
//! archive.
//!
//! Operations are methods on [`context::PipelineContext`], which owns the
//! SQLite store and the file store for one caller.

pub mod artifacts;
pub mod config;
pub mod context;
pub mod db;
pub mod definitions;
pub mod errors;
pub mod events;
pub mod execution;
pub mod logging;
pub mod models;
pub mod rollback;
pub mod runs;

pub use context::{ContextHandle, PipelineContext};
pub use errors::{PipelineError, Result};
pub use rollback::RollbackRequest;
