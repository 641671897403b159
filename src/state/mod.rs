//! State module for job and pipeline outcomes
//!
//! This module provides the persisted state records and policy enums shared by
//! the compute and pipeline executors.
//!
//! # Components
//!
//! - `JobStatus` / `JobState`: the persisted lifecycle record of a named job
//! - `RunPolicy`: which nodes run a job, and whether only once ever
//! - `PipelineOutcome`: the terminal result of a pipeline run

mod job_state;
mod outcome;

// Re-export main types
pub use job_state::{JobState, JobStatus, RunPolicy};
pub use outcome::PipelineOutcome;
