//! Execution of a single job run against a batch of work items.

use super::error::SchedulerError;
use super::migrator::ItemMigrator;
use crate::job_store::{
    ItemFailure, JobResult, JobStore, MigrationStore, ResultStatus, RunStart, ScheduledJob,
};
use crate::metrics;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Upper bound on item failures kept in a single result.
pub const MAX_RECORDED_ERRORS: usize = 50;

/// Claim on a job id. The id is released when the guard is dropped,
/// whichever way the holder exits.
pub(crate) struct RunningGuard<'a> {
    running_jobs: &'a Mutex<HashSet<String>>,
    job_id: String,
    counted: bool,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock_running(self.running_jobs).remove(&self.job_id);
        if self.counted {
            metrics::execution_finished();
        }
    }
}

// The set is only ever touched by single insert/remove calls.
fn lock_running(running_jobs: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    running_jobs.lock().unwrap_or_else(|e| e.into_inner())
}

/// Tally of a batch run through the migrator.
#[derive(Debug, Default)]
struct BatchOutcome {
    migrated: u64,
    failed: u64,
    errors: Vec<ItemFailure>,
}

/// Runs jobs while guaranteeing at most one in-flight execution per job id.
///
/// Within a process the claim set rejects a second execution before the
/// store is touched. Across processes sharing a backend, the store's
/// check-and-set on the job status does the same.
pub struct ExecutionEngine {
    store: Arc<dyn MigrationStore>,
    migrator: Arc<dyn ItemMigrator>,
    running_jobs: Mutex<HashSet<String>>,
}

impl ExecutionEngine {
    pub fn new(store: Arc<dyn MigrationStore>, migrator: Arc<dyn ItemMigrator>) -> Self {
        Self {
            store,
            migrator,
            running_jobs: Mutex::new(HashSet::new()),
        }
    }

    /// Whether an execution (or a deletion) in this process currently holds the job.
    pub fn is_running(&self, job_id: &str) -> bool {
        lock_running(&self.running_jobs).contains(job_id)
    }

    /// Atomically claim a job id, failing if someone else holds it.
    pub(crate) fn claim(&self, job_id: &str) -> Result<RunningGuard<'_>, SchedulerError> {
        if !lock_running(&self.running_jobs).insert(job_id.to_string()) {
            return Err(SchedulerError::AlreadyRunning(job_id.to_string()));
        }
        Ok(RunningGuard {
            running_jobs: &self.running_jobs,
            job_id: job_id.to_string(),
            counted: false,
        })
    }

    /// Execute a job against `items` and record the outcome.
    ///
    /// Only an unknown id, a concurrent execution of the same job, or a
    /// store failure produce an error. Item failures are part of the result.
    pub fn execute(&self, job_id: &str, items: &[JsonValue]) -> Result<JobResult, SchedulerError> {
        if self.store.get_job(job_id)?.is_none() {
            return Err(SchedulerError::NotFound(job_id.to_string()));
        }

        let mut guard = self.claim(job_id).map_err(|e| {
            warn!("Rejected execution of job {}: already running", job_id);
            metrics::record_rejection();
            e
        })?;

        let start_time = Utc::now();
        let job = match self.store.start_run(job_id, start_time)? {
            RunStart::Started(job) => job,
            RunStart::NotFound => return Err(SchedulerError::NotFound(job_id.to_string())),
            RunStart::AlreadyRunning => {
                warn!(
                    "Rejected execution of job {}: already running in another process",
                    job_id
                );
                metrics::record_rejection();
                return Err(SchedulerError::AlreadyRunning(job_id.to_string()));
            }
        };
        guard.counted = true;
        metrics::execution_started();

        self.run_started(job, start_time, items).map_err(|e| {
            self.fail_after_error(job_id);
            e
        })
    }

    fn run_started(
        &self,
        job: ScheduledJob,
        start_time: DateTime<Utc>,
        items: &[JsonValue],
    ) -> Result<JobResult, SchedulerError> {
        info!(
            "Starting job: {} ({}) with {} items, strategy {}",
            job.id,
            job.name,
            items.len(),
            job.strategy.as_str()
        );

        let outcome = self.migrate_batch(&job, items);

        let mut end_time = Utc::now();
        if end_time - start_time < Duration::milliseconds(1) {
            end_time = start_time + Duration::milliseconds(1);
        }
        let duration = end_time - start_time;

        let total_tasks = items.len() as u64;
        let status = ResultStatus::classify(total_tasks, outcome.migrated);
        let result = JobResult {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job.id.clone(),
            start_time,
            end_time,
            duration_ms: duration.num_milliseconds(),
            status,
            total_tasks,
            migrated_tasks: outcome.migrated,
            failed_tasks: outcome.failed,
            errors: outcome.errors,
        };

        // Stored together with the job update, against the job's current
        // schedule rather than the snapshot taken at start
        if self.store.finish_run(&result)?.is_none() {
            warn!("Job {} vanished before its run was recorded", job.id);
        }

        metrics::record_execution(
            status.as_str(),
            duration.to_std().unwrap_or_default(),
            result.migrated_tasks,
            result.failed_tasks,
        );
        info!(
            "Job {} finished with status {} in {}ms: {}/{} items migrated",
            job.id,
            status.as_str(),
            result.duration_ms,
            result.migrated_tasks,
            result.total_tasks
        );

        Ok(result)
    }

    fn migrate_batch(&self, job: &ScheduledJob, items: &[JsonValue]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for (index, item) in items.iter().enumerate() {
            let migrated = catch_unwind(AssertUnwindSafe(|| {
                self.migrator.migrate(item, job.strategy)
            }));
            let message = match migrated {
                Ok(Ok(())) => {
                    debug!("Job {}: item {} migrated", job.id, index);
                    outcome.migrated += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "migrator panicked".to_string(),
            };

            warn!("Job {}: item {} failed: {}", job.id, index, message);
            outcome.failed += 1;
            if outcome.errors.len() < MAX_RECORDED_ERRORS {
                outcome.errors.push(ItemFailure { index, message });
            }
        }

        outcome
    }

    /// Leave the job in a non-running state after the run itself errored out.
    fn fail_after_error(&self, job_id: &str) {
        if let Err(e) = self.store.fail_run(job_id, Utc::now()) {
            error!("Failed to reset status of job {}: {}", job_id, e);
        }
    }
}
