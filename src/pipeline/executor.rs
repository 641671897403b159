//! Pipeline executor
//!
//! Runs an ordered list of stages, each as a compute job. The active stage and
//! the stop flag of every pipeline are persisted so that other nodes (and other
//! processes) can observe and steer a run.

use crate::compute::ComputeExecutor;
use crate::pipeline::Stage;
use crate::state::PipelineOutcome;
use crate::storage::{GridMap, GridStorage};
use crate::{GridError, GridResult};
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

/// Collection mapping pipeline name to its most recently entered stage
pub const ACTIVE_STAGE_COLLECTION: &str = "grid_pipeline_active_stage";

/// Collection mapping pipeline name to its stop request flag
pub const STOP_REQUEST_COLLECTION: &str = "grid_pipeline_stop_requested";

/// Runs multi-stage pipelines on top of a compute executor
#[derive(Clone)]
pub struct PipelineExecutor {
    compute: ComputeExecutor,
    storage: GridStorage,
    active_stages: GridMap<String>,
    stop_requests: GridMap<bool>,
    running: Arc<Mutex<HashSet<String>>>,
}

impl PipelineExecutor {
    pub fn new(storage: &GridStorage, compute: ComputeExecutor) -> GridResult<Self> {
        Ok(Self {
            compute,
            storage: storage.clone(),
            active_stages: storage.get_map(ACTIVE_STAGE_COLLECTION)?,
            stop_requests: storage.get_map(STOP_REQUEST_COLLECTION)?,
            running: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Recreates the pipeline state collections after the store was cleaned
    pub(crate) fn reopen(&self) -> GridResult<()> {
        self.storage.get_map::<String>(ACTIVE_STAGE_COLLECTION)?;
        self.storage.get_map::<bool>(STOP_REQUEST_COLLECTION)?;
        Ok(())
    }

    /// Starts a pipeline run on a blocking worker thread
    ///
    /// Must be called from within a tokio runtime. The run starts immediately;
    /// the returned future resolves to its outcome.
    pub fn run<C>(
        &self,
        name: impl Into<String>,
        stages: Vec<Stage<C>>,
        context: Arc<C>,
    ) -> impl Future<Output = GridResult<PipelineOutcome>> + Send + 'static
    where
        C: Send + Sync + 'static,
    {
        let executor = self.clone();
        let name = name.into();
        let handle = tokio::task::spawn_blocking(move || {
            executor.run_blocking(&name, &stages, context.as_ref())
        });

        async move {
            handle
                .await
                .map_err(|e| GridError::Join(e.to_string()))?
        }
    }

    /// Runs a pipeline to completion on the calling thread
    ///
    /// Every run starts at the first stage; stages that must not repeat after
    /// a restart use a once-policy.
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineOutcome)` - How the run ended
    /// * `Err(GridError::InvalidPipeline)` - No stages, duplicate stage names,
    ///   or the pipeline is already running in this process
    /// * `Err(GridError)` - The grid's storage failed
    pub fn run_blocking<C>(
        &self,
        name: &str,
        stages: &[Stage<C>],
        context: &C,
    ) -> GridResult<PipelineOutcome> {
        validate_stages(name, stages)?;
        let _running = self.enter(name)?;

        self.stop_requests.remove(name)?;
        self.active_stages.remove(name)?;
        tracing::info!("Pipeline '{}' started with {} stages", name, stages.len());

        let mut failed = false;
        let mut stopped = false;

        for stage in stages {
            if !stopped && self.is_stop_requested(name)? {
                tracing::info!(
                    "Stop requested for pipeline '{}', only 'always' stages will run",
                    name
                );
                stopped = true;
            }

            if (stopped || failed) && !stage.is_always() {
                tracing::debug!("Skipping stage '{}' of pipeline '{}'", stage.name(), name);
                continue;
            }
            if !stage.should_run(context) {
                tracing::debug!(
                    "Stage '{}' of pipeline '{}' skipped by its condition",
                    stage.name(),
                    name
                );
                continue;
            }

            self.active_stages.put(name, &stage.name().to_string())?;
            tracing::info!("Pipeline '{}' entering stage '{}'", name, stage.name());

            let job_name = format!("{}.{}", name, stage.name());
            let state = self
                .compute
                .run(&job_name, stage.policy(), |token| stage.execute(context, token))?;

            if state.is_failed() {
                let error = state.error.as_deref().unwrap_or("unknown error");
                if stage.is_always() {
                    tracing::warn!(
                        "Stage '{}' of pipeline '{}' failed: {}",
                        stage.name(),
                        name,
                        error
                    );
                } else {
                    tracing::error!(
                        "Stage '{}' of pipeline '{}' failed, skipping remaining stages: {}",
                        stage.name(),
                        name,
                        error
                    );
                    failed = true;
                }
            }
        }

        self.stop_requests.remove(name)?;

        let outcome = if failed {
            PipelineOutcome::Failed
        } else if stopped {
            PipelineOutcome::Stopped
        } else {
            PipelineOutcome::Completed
        };
        tracing::info!("Pipeline '{}' finished: {}", name, outcome);
        Ok(outcome)
    }

    /// Requests a stop at the next stage boundary
    ///
    /// With `None`, every pipeline currently running in this process is
    /// stopped. Returns the names of the pipelines flagged.
    pub fn stop(&self, name: Option<&str>) -> GridResult<Vec<String>> {
        let names = match name {
            Some(name) => vec![name.to_string()],
            None => {
                let running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
                let mut names: Vec<String> = running.iter().cloned().collect();
                names.sort();
                names
            }
        };

        for name in &names {
            self.stop_requests.put(name, &true)?;
            tracing::info!("Stop requested for pipeline '{}'", name);
        }
        Ok(names)
    }

    /// Most recently entered stage of a pipeline, if any
    pub fn get_active_stage(&self, name: &str) -> GridResult<Option<String>> {
        self.active_stages.get(name)
    }

    pub fn is_stop_requested(&self, name: &str) -> GridResult<bool> {
        Ok(self.stop_requests.get(name)?.unwrap_or(false))
    }

    /// True while this process runs the pipeline
    pub fn is_running(&self, name: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub fn compute(&self) -> &ComputeExecutor {
        &self.compute
    }

    fn enter(&self, name: &str) -> GridResult<RunningGuard> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if !running.insert(name.to_string()) {
            return Err(GridError::InvalidPipeline(format!(
                "pipeline '{}' is already running",
                name
            )));
        }
        Ok(RunningGuard {
            name: name.to_string(),
            running: self.running.clone(),
        })
    }
}

/// Marks a pipeline as running in this process until dropped
struct RunningGuard {
    name: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

fn validate_stages<C>(name: &str, stages: &[Stage<C>]) -> GridResult<()> {
    if name.is_empty() {
        return Err(GridError::InvalidPipeline(
            "pipeline name cannot be empty".to_string(),
        ));
    }
    if stages.is_empty() {
        return Err(GridError::InvalidPipeline(format!(
            "pipeline '{}' has no stages",
            name
        )));
    }

    let mut seen = HashSet::new();
    for stage in stages {
        if !seen.insert(stage.name()) {
            return Err(GridError::InvalidPipeline(format!(
                "pipeline '{}' has more than one stage named '{}'",
                name,
                stage.name()
            )));
        }
    }
    Ok(())
}
