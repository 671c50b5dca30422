//! `bloodwork-core` — domain foundation for the analysis pipeline.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the job record and its lifecycle, and the pipeline error
//! taxonomy with transient/permanent classification.

pub mod error;
pub mod id;
pub mod job;

pub use error::{ErrorClass, PipelineError, PipelineResult};
pub use id::{JobId, TaskId};
pub use job::{Job, JobStatus, TaskState};
