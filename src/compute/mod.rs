//! Compute module for running named jobs across grid nodes
//!
//! A job's persisted `JobState` is both its election record and its outcome:
//! nodes claim a job through an atomic update on that record, the winner runs
//! the task and everyone else waits for the terminal state.

mod cancel;
mod executor;
mod job;

pub use cancel::CancelToken;
pub use executor::{ComputeExecutor, JOB_STATES_COLLECTION};
pub use job::{Job, JobTask};
