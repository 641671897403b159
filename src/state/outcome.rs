use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal result of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Every non-skipped stage completed
    Completed,

    /// A non-`always` stage failed
    Failed,

    /// A stop request halted the run at a stage boundary
    Stopped,
}

impl PipelineOutcome {
    /// Returns true only if the pipeline ran to completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true only if a stage failed. A stopped run is not a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
