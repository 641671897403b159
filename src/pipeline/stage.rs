//! Pipeline stage definitions

use crate::compute::CancelToken;
use crate::state::RunPolicy;
use std::fmt;
use std::sync::Arc;

type StageTask<C> = Arc<dyn Fn(&C, &CancelToken) -> anyhow::Result<()> + Send + Sync>;
type StagePredicate<C> = Arc<dyn Fn(&C) -> bool + Send + Sync>;

/// One step of a pipeline, run as a job named `<pipeline>.<stage>`
///
/// `C` is the context shared by all stages of a run.
pub struct Stage<C> {
    name: String,
    policy: RunPolicy,
    always: bool,
    only_if: Option<StagePredicate<C>>,
    task: StageTask<C>,
}

impl<C> Stage<C> {
    pub fn new<F>(name: impl Into<String>, policy: RunPolicy, task: F) -> Self
    where
        F: Fn(&C, &CancelToken) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            policy,
            always: false,
            only_if: None,
            task: Arc::new(task),
        }
    }

    /// Runs this stage even after a stop request or an earlier failure
    pub fn always(mut self, always: bool) -> Self {
        self.always = always;
        self
    }

    /// Skips this stage when `predicate` returns false
    pub fn only_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.only_if = Some(Arc::new(predicate));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> RunPolicy {
        self.policy
    }

    pub fn is_always(&self) -> bool {
        self.always
    }

    pub(crate) fn should_run(&self, context: &C) -> bool {
        self.only_if.as_ref().map_or(true, |predicate| predicate(context))
    }

    pub(crate) fn execute(&self, context: &C, token: &CancelToken) -> anyhow::Result<()> {
        (self.task)(context, token)
    }
}

impl<C> Clone for Stage<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            policy: self.policy,
            always: self.always,
            only_if: self.only_if.clone(),
            task: self.task.clone(),
        }
    }
}

impl<C> fmt::Debug for Stage<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("always", &self.always)
            .field("only_if", &self.only_if.is_some())
            .finish()
    }
}
