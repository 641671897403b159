//! Compute executor
//!
//! Jobs run synchronously on the calling thread. Election between nodes is
//! leaderless: every node tries to move the job's record to RUNNING through
//! `GridMap::compute`, and the store's per-key atomicity guarantees a single
//! winner.
//!
//! A non-once `One` job runs once per call, and nodes reach the same call at
//! different times. Every node counts its own calls of such a job; the shared
//! record carries the generation of the call it belongs to, so a node arriving
//! late at a call sees that call's outcome instead of starting it again.

use crate::compute::{CancelToken, Job};
use crate::state::{JobState, JobStatus, RunPolicy};
use crate::storage::{GridMap, GridStorage};
use crate::GridResult;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Collection holding every job's persisted state
pub const JOB_STATES_COLLECTION: &str = "grid_job_states";

/// Collection holding each node's last call generation of non-once `One` jobs
pub const JOB_GENERATIONS_COLLECTION: &str = "grid_job_generations";

/// Result of an attempt to claim a job
enum Claim {
    /// This node owns the job and must run it
    Won(JobState),
    /// The job is already resolved for good
    Resolved(JobState),
    /// Another caller is running the job
    Busy,
}

type TokenRegistry = Arc<Mutex<HashMap<u64, CancelToken>>>;

/// Runs named jobs under run policies
#[derive(Clone)]
pub struct ComputeExecutor {
    storage: GridStorage,
    states: GridMap<JobState>,
    generations: GridMap<u64>,
    node_name: String,
    session_id: String,
    poll_interval: Duration,
    tokens: TokenRegistry,
    next_token: Arc<AtomicU64>,
}

impl ComputeExecutor {
    /// Creates an executor for the given node
    ///
    /// # Arguments
    ///
    /// * `storage` - Grid storage holding the job states
    /// * `node_name` - Name of this node, used for per-node job records
    /// * `poll_interval` - How often a waiting caller checks a job's state
    pub fn new(
        storage: &GridStorage,
        node_name: impl Into<String>,
        poll_interval: Duration,
    ) -> GridResult<Self> {
        Ok(Self {
            storage: storage.clone(),
            states: storage.get_map(JOB_STATES_COLLECTION)?,
            generations: storage.get_map(JOB_GENERATIONS_COLLECTION)?,
            node_name: node_name.into(),
            session_id: storage.engine().session_id().to_string(),
            poll_interval,
            tokens: Arc::new(Mutex::new(HashMap::new())),
            next_token: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Recreates the job state collection after the store was cleaned
    pub(crate) fn reopen(&self) -> GridResult<()> {
        self.storage.get_map::<JobState>(JOB_STATES_COLLECTION)?;
        self.storage.get_map::<u64>(JOB_GENERATIONS_COLLECTION)?;
        Ok(())
    }

    /// Runs a job under the given policy and returns its terminal state
    ///
    /// A task error or panic is recorded as FAILED and returned in the state,
    /// never as an `Err`; `Err` means the grid itself failed. Failed jobs are
    /// never retried automatically.
    pub fn run<F>(&self, job_name: &str, policy: RunPolicy, task: F) -> GridResult<JobState>
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()>,
    {
        let key = self.record_key(job_name, policy);
        let call = self.next_generation(job_name, policy)?;

        let state = loop {
            match self.try_claim(&key, job_name, policy, call)? {
                Claim::Won(running) => break self.execute(&key, running, task)?,
                Claim::Resolved(state) => {
                    tracing::debug!("Job '{}' already {}, not running it", key, state.status);
                    break state;
                }
                Claim::Busy => {
                    // An earlier call may still be running; contend again once it ends
                    if let Some(state) = self.await_outcome(&key)? {
                        if state.generation >= call {
                            break state;
                        }
                    }
                }
            }
        };

        if policy == RunPolicy::One {
            self.generations
                .put(&self.generation_key(job_name), &state.generation.max(call))?;
        }
        Ok(state)
    }

    pub fn run_on_one<F>(&self, job_name: &str, task: F) -> GridResult<JobState>
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()>,
    {
        self.run(job_name, RunPolicy::One, task)
    }

    pub fn run_on_all<F>(&self, job_name: &str, task: F) -> GridResult<JobState>
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()>,
    {
        self.run(job_name, RunPolicy::All, task)
    }

    pub fn run_on_one_once<F>(&self, job_name: &str, task: F) -> GridResult<JobState>
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()>,
    {
        self.run(job_name, RunPolicy::OneOnce, task)
    }

    pub fn run_on_all_once<F>(&self, job_name: &str, task: F) -> GridResult<JobState>
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()>,
    {
        self.run(job_name, RunPolicy::AllOnce, task)
    }

    /// Runs a prepared job
    pub fn submit(&self, job: Job) -> GridResult<JobState> {
        self.run(&job.name, job.policy, job.task)
    }

    /// Gets the persisted state of a job as seen by this node
    pub fn get_job_state(&self, job_name: &str, policy: RunPolicy) -> GridResult<Option<JobState>> {
        self.states.get(&self.record_key(job_name, policy))
    }

    /// Moves every record of a job (all nodes) back to NOT_STARTED, so a
    /// once-job may run again
    ///
    /// Returns the number of records reset.
    pub fn reset_job(&self, job_name: &str) -> GridResult<usize> {
        let node_prefix = format!("{}@", job_name);
        let mut reset = 0;
        for key in self.states.keys()? {
            if key != job_name && !key.starts_with(&node_prefix) {
                continue;
            }
            let mut changed = false;
            self.states.compute(&key, |current| {
                changed = current.is_some();
                current.map(JobState::reset)
            })?;
            if changed {
                reset += 1;
            }
        }
        tracing::info!("Reset job '{}' ({} records)", job_name, reset);
        Ok(reset)
    }

    /// Lists every persisted job record, keyed by record key
    pub fn list_job_states(&self) -> GridResult<Vec<(String, JobState)>> {
        self.states.entries()
    }

    /// Signals cancellation to every task currently running on this executor
    pub fn cancel_all(&self) {
        let tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
        for token in tokens.values() {
            token.cancel();
        }
        if !tokens.is_empty() {
            tracing::info!("Cancellation requested for {} running jobs", tokens.len());
        }
    }

    fn record_key(&self, job_name: &str, policy: RunPolicy) -> String {
        if policy.is_per_node() {
            format!("{}@{}", job_name, self.node_name)
        } else {
            job_name.to_string()
        }
    }

    fn generation_key(&self, job_name: &str) -> String {
        format!("{}@{}", job_name, self.node_name)
    }

    /// Generation of this node's next call of a job; 0 unless the policy is `One`
    fn next_generation(&self, job_name: &str, policy: RunPolicy) -> GridResult<u64> {
        if policy != RunPolicy::One {
            return Ok(0);
        }
        let last = self.generations.get(&self.generation_key(job_name))?;
        Ok(last.unwrap_or(0) + 1)
    }

    /// Atomically claims the job record if this caller may run it
    fn try_claim(
        &self,
        key: &str,
        job_name: &str,
        policy: RunPolicy,
        call: u64,
    ) -> GridResult<Claim> {
        let mut claim = Claim::Busy;

        self.states.compute(key, |current| {
            let claimable = match &current {
                None => true,
                Some(state) => match state.status {
                    JobStatus::NotStarted => true,
                    JobStatus::Running => state.is_abandoned(&self.session_id),
                    JobStatus::Completed | JobStatus::Failed => match policy {
                        RunPolicy::One => state.generation < call,
                        _ => !policy.is_once(),
                    },
                },
            };

            if claimable {
                if let Some(state) = current.as_ref().filter(|s| s.is_abandoned(&self.session_id)) {
                    tracing::warn!(
                        "Job '{}' was left running by node {:?} in an earlier session, reclaiming",
                        key,
                        state.node
                    );
                }
                // An abandoned claim is finished under its own generation
                let generation = current.as_ref().map_or(call, |s| s.generation.max(call));
                let running = JobState::running(job_name, &self.node_name, &self.session_id)
                    .with_generation(generation);
                claim = Claim::Won(running.clone());
                return Some(running);
            }

            if let Some(state) = current.as_ref().filter(|s| s.status.is_terminal()) {
                claim = Claim::Resolved(state.clone());
            }
            current
        })?;

        Ok(claim)
    }

    /// Polls the job's record until the running claim resolves
    ///
    /// Returns `None` when the caller should contend for the job again.
    fn await_outcome(&self, key: &str) -> GridResult<Option<JobState>> {
        loop {
            std::thread::sleep(self.poll_interval);
            match self.states.get(key)? {
                Some(state) if state.status.is_terminal() => return Ok(Some(state)),
                Some(state) if !state.is_abandoned(&self.session_id)
                    && state.status == JobStatus::Running => {}
                _ => return Ok(None),
            }
        }
    }

    fn execute<F>(&self, key: &str, running: JobState, task: F) -> GridResult<JobState>
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()>,
    {
        tracing::info!("Running job '{}' on node {}", key, self.node_name);
        let token = self.register_token();

        let result = panic::catch_unwind(AssertUnwindSafe(|| task(&token.token)));
        drop(token);

        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(payload) => Some(panic_message(payload.as_ref())),
        };

        let finished = running.finish(error);
        self.states.put(key, &finished)?;

        match &finished.error {
            Some(error) => tracing::error!("Job '{}' failed: {}", key, error),
            None => tracing::info!("Job '{}' completed", key),
        }
        Ok(finished)
    }

    fn register_token(&self) -> TokenGuard {
        let id = self.next_token.fetch_add(1, Ordering::SeqCst);
        let token = CancelToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token.clone());
        TokenGuard {
            id,
            token,
            tokens: self.tokens.clone(),
        }
    }
}

/// Keeps a running task's token registered until the task returns
struct TokenGuard {
    id: u64,
    token: CancelToken,
    tokens: TokenRegistry,
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("task panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("task panicked: {}", msg)
    } else {
        "task panicked".to_string()
    }
}
