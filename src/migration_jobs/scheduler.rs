use super::engine::ExecutionEngine;
use super::error::SchedulerError;
use super::migrator::{ItemMigrator, RequiredFieldsMigrator};
use crate::job_store::{
    InMemoryJobStore, JobHistoryEntry, JobResult, JobStatistics, JobStatus, JobStore,
    MigrationStore, NewJob, ResultLedger, Schedule, ScheduledJob,
};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{info, warn};

/// Public entry point of the job runner.
///
/// The scheduler owns no timer. A trigger source polls
/// [`get_pending_jobs`](Self::get_pending_jobs) and calls
/// [`execute`](Self::execute) with the batch to migrate.
pub struct MigrationScheduler {
    store: Arc<dyn MigrationStore>,
    engine: ExecutionEngine,
}

impl MigrationScheduler {
    pub fn new(store: Arc<dyn MigrationStore>, migrator: Arc<dyn ItemMigrator>) -> Self {
        let engine = ExecutionEngine::new(store.clone(), migrator);
        Self { store, engine }
    }

    /// Process-local scheduler using the default required-fields migrator.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryJobStore::new()),
            Arc::new(RequiredFieldsMigrator::default()),
        )
    }

    /// Reset jobs left `running` by a process that died mid-run, so they
    /// become due again. Returns the number of jobs reset.
    ///
    /// Call at startup, before any scheduler sharing the backend executes
    /// jobs: a run still in flight elsewhere would be reset as well.
    pub fn recover_interrupted_jobs(&self) -> Result<usize, SchedulerError> {
        let count = self.store.mark_stale_running_failed()?;
        if count > 0 {
            warn!("Marked {} interrupted jobs as failed", count);
        }
        Ok(count)
    }

    pub fn create_job(&self, new_job: NewJob) -> Result<ScheduledJob, SchedulerError> {
        if new_job.name.trim().is_empty() {
            return Err(SchedulerError::InvalidInput(
                "job name must not be empty".to_string(),
            ));
        }
        if new_job.farm_id.trim().is_empty() {
            return Err(SchedulerError::InvalidInput(
                "farm id must not be empty".to_string(),
            ));
        }

        let job = self.store.create_job(new_job)?;
        info!(
            "Created {} job {} ({}) for farm {}",
            job.schedule.as_str(),
            job.id,
            job.name,
            job.farm_id
        );
        Ok(job)
    }

    pub fn list_jobs(&self, farm_id: &str) -> Result<Vec<ScheduledJob>, SchedulerError> {
        Ok(self.store.list_jobs(farm_id)?)
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>, SchedulerError> {
        Ok(self.store.get_job(job_id)?)
    }

    /// Replace a job's schedule. Returns `None` for unknown ids.
    pub fn update_schedule(
        &self,
        job_id: &str,
        schedule: Schedule,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>, SchedulerError> {
        let updated = self.store.update_schedule(job_id, schedule, scheduled_time)?;
        if let Some(job) = &updated {
            info!(
                "Rescheduled job {} as {} from {}",
                job.id,
                job.schedule.as_str(),
                job.scheduled_time
            );
        }
        Ok(updated)
    }

    /// Delete a job and its stored results.
    ///
    /// Returns false for unknown ids. A job that is executing cannot be deleted.
    pub fn delete_job(&self, job_id: &str) -> Result<bool, SchedulerError> {
        let _guard = self.engine.claim(job_id)?;

        match self.store.get_job(job_id)? {
            None => return Ok(false),
            Some(job) if job.status == JobStatus::Running => {
                return Err(SchedulerError::AlreadyRunning(job_id.to_string()));
            }
            Some(_) => {}
        }
        if !self.store.delete_job(job_id)? {
            return Ok(false);
        }
        let removed = self.store.remove_results(job_id)?;
        info!("Deleted job {} and {} stored results", job_id, removed);
        Ok(true)
    }

    pub fn execute(&self, job_id: &str, items: &[JsonValue]) -> Result<JobResult, SchedulerError> {
        self.engine.execute(job_id, items)
    }

    /// Jobs due to run now.
    pub fn get_pending_jobs(&self) -> Result<Vec<ScheduledJob>, SchedulerError> {
        self.get_pending_jobs_at(Utc::now())
    }

    /// Jobs due at `now`, earliest due first. Running jobs are never included.
    pub fn get_pending_jobs_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScheduledJob>, SchedulerError> {
        let mut pending: Vec<(DateTime<Utc>, ScheduledJob)> = self
            .store
            .list_all_jobs()?
            .into_iter()
            .filter(|job| job.status != JobStatus::Running && !self.engine.is_running(&job.id))
            .filter_map(|job| job.due_at().filter(|due| *due <= now).map(|due| (due, job)))
            .collect();

        pending.sort_by(|(a_due, a), (b_due, b)| {
            a_due
                .cmp(b_due)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(pending.into_iter().map(|(_, job)| job).collect())
    }

    /// Results across a farm's jobs, newest first.
    pub fn get_job_history(
        &self,
        farm_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<JobHistoryEntry>, SchedulerError> {
        let jobs = self.store.list_jobs(farm_id)?;
        Ok(self.store.history_for_farm(&jobs, limit)?)
    }

    /// Aggregates over a job's stored results. `None` for unknown jobs and
    /// jobs without stored results.
    pub fn get_statistics(&self, job_id: &str) -> Result<Option<JobStatistics>, SchedulerError> {
        let Some(job) = self.store.get_job(job_id)? else {
            return Ok(None);
        };
        Ok(self.store.statistics(&job)?)
    }

    /// Trim a job's stored results to the `max_results` most recent.
    pub fn cleanup_results(&self, job_id: &str, max_results: usize) -> Result<usize, SchedulerError> {
        let removed = self.store.cleanup_results(job_id, max_results)?;
        if removed > 0 {
            info!(
                "Removed {} old results of job {}, keeping {}",
                removed, job_id, max_results
            );
        }
        Ok(removed)
    }

    pub fn get_job_results(&self, job_id: &str) -> Result<Vec<JobResult>, SchedulerError> {
        Ok(self.store.list_results(job_id)?)
    }

    pub fn is_job_running(&self, job_id: &str) -> bool {
        self.engine.is_running(job_id)
    }
}
