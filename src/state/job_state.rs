/// Job state definitions for tracking job execution
///
/// A `JobState` is the only part of a job that is ever persisted. Once-policy
/// records are permanent; other records only carry meaning for the duration
/// of a single run call.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is known but nobody claimed it yet
    NotStarted,

    /// A node claimed the job and is executing its task
    Running,

    /// Task finished without error
    Completed,

    /// Task returned an error or panicked
    Failed,
}

impl JobStatus {
    /// Returns true if no further transition is expected within a run
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which nodes execute a job and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPolicy {
    /// Exactly one participating node executes the task per call
    One,

    /// Every participating node executes the task, every call
    All,

    /// Like `One`, but the task body runs at most once for the job name
    OneOnce,

    /// Like `All`, but each node runs the task body at most once
    AllOnce,
}

impl RunPolicy {
    pub fn is_once(&self) -> bool {
        matches!(self, Self::OneOnce | Self::AllOnce)
    }

    /// Returns true if each node keeps its own record for the job
    pub fn is_per_node(&self) -> bool {
        matches!(self, Self::All | Self::AllOnce)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::One => "one",
            Self::All => "all",
            Self::OneOnce => "one_once",
            Self::AllOnce => "all_once",
        }
    }
}

impl fmt::Display for RunPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persisted execution record of a named job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub job_name: String,
    pub status: JobStatus,

    /// Error message of the last failed execution
    pub error: Option<String>,

    /// Node that claimed the job
    pub node: Option<String>,

    /// Storage engine session in which the job was claimed
    pub session: Option<String>,

    /// Call number of a non-once `One` job; 0 for other policies
    #[serde(default)]
    pub generation: u64,

    pub updated_at: DateTime<Utc>,
}

impl JobState {
    /// Creates a record claimed by the given node within the given session
    pub fn running(job_name: impl Into<String>, node: &str, session: &str) -> Self {
        Self {
            job_name: job_name.into(),
            status: JobStatus::Running,
            error: None,
            node: Some(node.to_string()),
            session: Some(session.to_string()),
            generation: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Returns this record moved back to NOT_STARTED, forgetting its outcome
    pub fn reset(mut self) -> Self {
        self.status = JobStatus::NotStarted;
        self.error = None;
        self.node = None;
        self.session = None;
        self.updated_at = Utc::now();
        self
    }

    /// Returns this record moved to a terminal status
    pub fn finish(mut self, error: Option<String>) -> Self {
        self.status = if error.is_some() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        self.error = error;
        self.updated_at = Utc::now();
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == JobStatus::Failed
    }

    /// Returns true if this record is a claim left running by another
    /// engine session (i.e. a process that is gone)
    pub fn is_abandoned(&self, current_session: &str) -> bool {
        self.status == JobStatus::Running && self.session.as_deref() != Some(current_session)
    }
}
