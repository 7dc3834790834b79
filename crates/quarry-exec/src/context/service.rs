//! Process-wide registry of running jobs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use quarry_common::config::JobsConfig;
use quarry_common::{JobId, NodeId, QuarryError, QuarryResult};

use super::job::{JobExecutionContext, JobExecutionContextBuilder};

/// Statistics about the job registry.
#[derive(Debug, Default)]
pub struct JobServiceStats {
    /// Jobs registered.
    pub created: AtomicU64,
    /// Jobs that completed successfully.
    pub succeeded: AtomicU64,
    /// Jobs that completed with a failure or kill.
    pub failed: AtomicU64,
    /// Jobs rejected at registration.
    pub rejected: AtomicU64,
}

/// Registry of every [`JobExecutionContext`] on this node, keyed by job id.
///
/// A job is removed as soon as it completes.
#[derive(Debug)]
pub struct JobContextService {
    jobs: Arc<DashMap<JobId, Arc<JobExecutionContext>>>,
    max_concurrent_jobs: usize,
    kill_timeout: Duration,
    stats: Arc<JobServiceStats>,
}

impl JobContextService {
    /// Creates a registry limited by `config`.
    pub fn new(config: &JobsConfig) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            max_concurrent_jobs: config.max_concurrent_jobs,
            kill_timeout: config.kill_timeout,
            stats: Arc::new(JobServiceStats::default()),
        }
    }

    /// Builds and registers a job. Fails if the job id is taken or the
    /// limit of concurrent jobs is reached.
    pub fn create_context(
        &self,
        builder: JobExecutionContextBuilder,
    ) -> QuarryResult<Arc<JobExecutionContext>> {
        let job_id = builder.job_id();
        if self.max_concurrent_jobs > 0 && self.jobs.len() >= self.max_concurrent_jobs {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(QuarryError::TooManyJobs {
                limit: self.max_concurrent_jobs,
            });
        }
        let job = match self.jobs.entry(job_id) {
            Entry::Occupied(_) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(QuarryError::JobContextExists { job_id });
            }
            Entry::Vacant(slot) => {
                let job = builder.build()?;
                slot.insert(Arc::clone(&job));
                job
            }
        };
        self.stats.created.fetch_add(1, Ordering::Relaxed);

        let jobs = Arc::clone(&self.jobs);
        let stats = Arc::clone(&self.stats);
        job.completion().on_complete(move |result| {
            jobs.remove(&job_id);
            match result {
                Ok(()) => stats.succeeded.fetch_add(1, Ordering::Relaxed),
                Err(_) => stats.failed.fetch_add(1, Ordering::Relaxed),
            };
            tracing::debug!("removed job {}", job_id);
        });
        Ok(job)
    }

    /// Returns the job with `job_id`.
    pub fn get_context(&self, job_id: JobId) -> QuarryResult<Arc<JobExecutionContext>> {
        self.jobs
            .get(&job_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(QuarryError::JobContextMissing { job_id })
    }

    /// Kills the given jobs. Unknown ids are skipped. Returns the number of
    /// jobs found.
    pub fn kill_jobs(&self, job_ids: &[JobId], cause: Option<QuarryError>) -> usize {
        let jobs: Vec<_> = job_ids
            .iter()
            .filter_map(|id| self.jobs.get(id).map(|entry| Arc::clone(entry.value())))
            .collect();
        for job in &jobs {
            job.kill(cause.clone());
        }
        tracing::debug!("killed {} of {} requested jobs", jobs.len(), job_ids.len());
        jobs.len()
    }

    /// Kills `job_id` because `node_id` reported a failure for it. Every
    /// sub-context of the job fails with [`QuarryError::RemoteFailure`].
    /// Returns the number of sub-contexts killed.
    pub fn kill_on_remote_failure(
        &self,
        job_id: JobId,
        node_id: NodeId,
        reason: impl Into<String>,
    ) -> QuarryResult<usize> {
        let job = self.get_context(job_id)?;
        let cause = QuarryError::remote_failure(node_id, reason);
        tracing::debug!("job {} failed on node {}: {}", job_id, node_id, cause);
        Ok(job.kill(Some(cause)))
    }

    /// Kills every registered job. Returns the number of jobs killed.
    pub fn kill_all(&self, cause: Option<QuarryError>) -> usize {
        // collect first: a kill may complete a job, which removes it
        let jobs: Vec<_> = self
            .jobs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for job in &jobs {
            job.kill(cause.clone());
        }
        tracing::debug!("killed all {} jobs", jobs.len());
        jobs.len()
    }

    /// Kills every registered job and waits up to the configured kill
    /// timeout for all of them to terminate. Returns the number of jobs
    /// killed.
    pub async fn kill_all_and_wait(&self, cause: Option<QuarryError>) -> QuarryResult<usize> {
        let jobs: Vec<_> = self
            .jobs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let completions: Vec<_> = jobs.iter().map(|job| job.completion()).collect();
        for job in &jobs {
            job.kill(cause.clone());
        }
        let waits = completions.iter().map(|completion| completion.wait());
        tokio::time::timeout(self.kill_timeout, futures::future::join_all(waits))
            .await
            .map_err(|_| {
                tracing::warn!(
                    "{} killed jobs did not terminate within {:?}",
                    self.num_active_jobs(),
                    self.kill_timeout
                );
                QuarryError::Timeout {
                    duration_ms: self.kill_timeout.as_millis() as u64,
                }
            })?;
        Ok(jobs.len())
    }

    /// Number of registered jobs.
    pub fn num_active_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Returns the registry statistics.
    pub fn stats(&self) -> &JobServiceStats {
        &self.stats
    }
}

impl Default for JobContextService {
    fn default() -> Self {
        Self::new(&JobsConfig::default())
    }
}
