//! Job definitions

use crate::compute::CancelToken;
use crate::state::RunPolicy;
use std::fmt;

/// Body of a job
pub type JobTask = Box<dyn FnOnce(&CancelToken) -> anyhow::Result<()> + Send>;

/// A named unit of work with a run policy
///
/// Jobs are built fresh on every invocation; only their `JobState` is
/// persisted.
pub struct Job {
    pub name: String,
    pub policy: RunPolicy,
    pub task: JobTask,
}

impl Job {
    pub fn new<F>(name: impl Into<String>, policy: RunPolicy, task: F) -> Self
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            policy,
            task: Box::new(task),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
