//! All sub-contexts of one job on one node.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use quarry_common::{ContextId, JobId, NodeId, QuarryError, QuarryResult};

use super::sub_context::{CompletionState, ExecutionSubContext};
use crate::completion::Completion;

/// Builder for a [`JobExecutionContext`].
#[derive(Debug)]
pub struct JobExecutionContextBuilder {
    job_id: JobId,
    coordinator: NodeId,
    sub_contexts: Vec<Arc<ExecutionSubContext>>,
}

impl JobExecutionContextBuilder {
    /// Starts a job coordinated by `coordinator`.
    pub fn new(job_id: JobId, coordinator: NodeId) -> Self {
        Self {
            job_id,
            coordinator,
            sub_contexts: Vec::new(),
        }
    }

    /// Returns the job id.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Adds a sub-context. Registration order is the order of `prepare`;
    /// `start` runs in reverse.
    pub fn add_sub_context(mut self, context: Arc<ExecutionSubContext>) -> Self {
        self.sub_contexts.push(context);
        self
    }

    /// Number of sub-contexts added so far.
    pub fn num_sub_contexts(&self) -> usize {
        self.sub_contexts.len()
    }

    /// Builds the job. Fails on an empty job or duplicate sub-context ids.
    pub fn build(self) -> QuarryResult<Arc<JobExecutionContext>> {
        if self.sub_contexts.is_empty() {
            return Err(QuarryError::invalid_argument(format!(
                "job {} has no sub-contexts",
                self.job_id
            )));
        }
        let mut seen = HashSet::new();
        for context in &self.sub_contexts {
            if !seen.insert(context.id()) {
                return Err(QuarryError::DuplicateSubContext {
                    job_id: self.job_id,
                    context_id: context.id(),
                });
            }
        }

        let job = Arc::new(JobExecutionContext {
            job_id: self.job_id,
            coordinator: self.coordinator,
            remaining: AtomicUsize::new(self.sub_contexts.len()),
            sub_contexts: self.sub_contexts,
            outcome: Mutex::new(Outcome::default()),
            completion: Completion::new(),
        });
        for context in &job.sub_contexts {
            let weak = Arc::downgrade(&job);
            let id = context.id();
            context.completion().on_complete(move |result| {
                if let Some(job) = weak.upgrade() {
                    job.on_sub_context_done(id, result);
                }
            });
        }
        tracing::debug!(
            "created job {} with {} sub-contexts",
            job.job_id,
            job.sub_contexts.len()
        );
        Ok(job)
    }
}

#[derive(Debug, Default)]
struct Outcome {
    kill_cause: Option<QuarryError>,
    failure: Option<QuarryError>,
}

/// Owns the sub-contexts of one job on this node and tracks them until all
/// are closed or killed.
///
/// The first sub-context that fails kills the rest of the job. The job
/// completes once every sub-context is terminal: with the first failure
/// that was not a kill, else with the kill cause, else successfully.
pub struct JobExecutionContext {
    job_id: JobId,
    coordinator: NodeId,
    sub_contexts: Vec<Arc<ExecutionSubContext>>,
    remaining: AtomicUsize,
    outcome: Mutex<Outcome>,
    completion: Completion<()>,
}

impl JobExecutionContext {
    /// Starts building a job.
    pub fn builder(job_id: JobId, coordinator: NodeId) -> JobExecutionContextBuilder {
        JobExecutionContextBuilder::new(job_id, coordinator)
    }

    /// Returns the job id.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Returns the node coordinating the job.
    pub fn coordinator(&self) -> NodeId {
        self.coordinator
    }

    /// Number of sub-contexts.
    pub fn num_sub_contexts(&self) -> usize {
        self.sub_contexts.len()
    }

    /// Number of sub-contexts not yet terminal.
    pub fn num_active_sub_contexts(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Ids of all sub-contexts in registration order.
    pub fn sub_context_ids(&self) -> Vec<ContextId> {
        self.sub_contexts.iter().map(|c| c.id()).collect()
    }

    /// Returns the sub-context with `id`.
    pub fn get_sub_context(&self, id: ContextId) -> QuarryResult<Arc<ExecutionSubContext>> {
        self.sub_contexts
            .iter()
            .find(|c| c.id() == id)
            .cloned()
            .ok_or_else(|| QuarryError::SubContextMissing {
                job_id: self.job_id,
                context_id: id,
            })
    }

    /// Resolves once every sub-context is closed or killed.
    pub fn completion(&self) -> Completion<()> {
        self.completion.clone()
    }

    /// Returns true once the job completed.
    pub fn is_done(&self) -> bool {
        self.completion.is_done()
    }

    /// Prepares every sub-context. The first failure kills the job and is
    /// returned.
    pub fn prepare(&self) -> QuarryResult<()> {
        for context in &self.sub_contexts {
            if let Err(e) = context.prepare() {
                self.kill(Some(e.clone()));
                return Err(e);
            }
        }
        Ok(())
    }

    /// Starts every sub-context, downstream phases (registered last) first.
    pub fn start(&self) -> QuarryResult<()> {
        for context in self.sub_contexts.iter().rev() {
            if let Err(e) = context.start() {
                self.kill(Some(e.clone()));
                return Err(e);
            }
        }
        Ok(())
    }

    /// Kills every sub-context; `None` kills with
    /// [`QuarryError::JobKilled`]. Returns how many were still running.
    pub fn kill(&self, cause: Option<QuarryError>) -> usize {
        let cause = cause.unwrap_or(QuarryError::JobKilled);
        {
            let mut outcome = self.outcome.lock();
            if outcome.kill_cause.is_none() {
                outcome.kill_cause = Some(cause.clone());
            }
        }
        tracing::debug!("killing job {}: {}", self.job_id, cause);
        self.sub_contexts
            .iter()
            .filter(|c| c.kill(Some(cause.clone())))
            .count()
    }

    fn on_sub_context_done(&self, id: ContextId, result: &QuarryResult<CompletionState>) {
        if let Err(e) = result {
            let first_failure = {
                let mut outcome = self.outcome.lock();
                let is_kill = e.is_kill() || outcome.kill_cause.as_ref() == Some(e);
                if !is_kill && outcome.failure.is_none() {
                    outcome.failure = Some(e.clone());
                    true
                } else {
                    false
                }
            };
            if first_failure {
                tracing::debug!(
                    "sub-context {} of job {} failed, killing the rest: {}",
                    id,
                    self.job_id,
                    e
                );
                self.kill(Some(e.clone()));
            }
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            let result = {
                let outcome = self.outcome.lock();
                match (&outcome.failure, &outcome.kill_cause) {
                    (Some(failure), _) => Err(failure.clone()),
                    (None, Some(cause)) => Err(cause.clone()),
                    (None, None) => Ok(()),
                }
            };
            tracing::debug!("job {} finished: {:?}", self.job_id, result);
            self.completion.complete(result);
        }
    }
}

impl fmt::Debug for JobExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutionContext")
            .field("job_id", &self.job_id)
            .field("coordinator", &self.coordinator)
            .field("sub_contexts", &self.sub_contexts)
            .field("remaining", &self.num_active_sub_contexts())
            .finish()
    }
}
