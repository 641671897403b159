//! Pipeline module for ordered multi-stage runs
//!
//! A pipeline is a list of stages executed in order, each as a compute job.
//! A failure or a stop request lets only the stages marked `always` run from
//! then on; the run ends as completed, failed or stopped.

mod executor;
mod stage;

pub use executor::{PipelineExecutor, ACTIVE_STAGE_COLLECTION, STOP_REQUEST_COLLECTION};
pub use stage::Stage;
