mod memory_store;
mod models;
mod schema;
mod sqlite_job_store;

pub use memory_store::InMemoryJobStore;
pub use models::*;
pub use schema::JOB_STORE_VERSIONED_SCHEMAS;
pub use sqlite_job_store::SqliteJobStore;

use crate::migration_jobs::next_run_after;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Keyed storage of job definitions and their run state.
///
/// Run-state transitions are field-scoped and atomic in the backend, so they
/// never overwrite a concurrent schedule edit and hold across every scheduler
/// sharing the same backend.
pub trait JobStore: Send + Sync {
    /// Persist a new job with a fresh id, `pending` status and computed `next_run`.
    fn create_job(&self, new_job: NewJob) -> Result<ScheduledJob>;

    /// Jobs owned by `farm_id`, ordered by creation time.
    fn list_jobs(&self, farm_id: &str) -> Result<Vec<ScheduledJob>>;

    /// Jobs across all farms, ordered by creation time.
    fn list_all_jobs(&self) -> Result<Vec<ScheduledJob>>;

    fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>>;

    /// Replace schedule and scheduled time, recomputing `next_run`.
    /// Returns `None` for unknown ids.
    fn update_schedule(
        &self,
        job_id: &str,
        schedule: Schedule,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>>;

    /// Move a job to `running` unless it already is (check-and-set).
    fn start_run(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<RunStart>;

    /// Move a `running` job to `failed`. Returns false if the job is gone or
    /// was not running.
    fn fail_run(&self, job_id: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Mark every job still flagged `running` as `failed`.
    ///
    /// Only meaningful while nothing executes against the backend, i.e. at
    /// startup after an unclean shutdown. Returns the number of jobs reset.
    fn mark_stale_running_failed(&self) -> Result<usize>;

    /// Returns true if a record was removed.
    fn delete_job(&self, job_id: &str) -> Result<bool>;
}

/// Append-only log of execution results with bounded retention.
pub trait ResultLedger: Send + Sync {
    fn append_result(&self, result: &JobResult) -> Result<()>;

    /// All stored results of a job in insertion order.
    fn list_results(&self, job_id: &str) -> Result<Vec<JobResult>>;

    /// Keep only the `max_results` most recent results of a job.
    /// Returns the number of results removed.
    fn cleanup_results(&self, job_id: &str, max_results: usize) -> Result<usize>;

    /// Drop every stored result of a job. Returns the number removed.
    fn remove_results(&self, job_id: &str) -> Result<usize>;

    /// Results of the given jobs merged newest first (by end time).
    fn history_for_farm(
        &self,
        jobs: &[ScheduledJob],
        limit: Option<usize>,
    ) -> Result<Vec<JobHistoryEntry>> {
        let mut history = Vec::new();
        for job in jobs {
            for result in self.list_results(&job.id)? {
                history.push(JobHistoryEntry {
                    job_name: job.name.clone(),
                    result,
                });
            }
        }
        Ok(sort_history(history, limit))
    }

    /// Aggregates over the stored results of `job`, `None` if nothing is stored.
    fn statistics(&self, job: &ScheduledJob) -> Result<Option<JobStatistics>> {
        let results = self.list_results(&job.id)?;
        Ok(compute_statistics(job, &results))
    }
}

/// A backend holding both jobs and results, able to record a finished run
/// as a single unit.
pub trait MigrationStore: JobStore + ResultLedger {
    /// Append `result` and apply the run to its job atomically: either both
    /// are stored or neither is.
    ///
    /// Returns the updated job, or `None` without storing anything when the
    /// job no longer exists.
    fn finish_run(&self, result: &JobResult) -> Result<Option<ScheduledJob>>;
}

#[cfg(feature = "mock")]
mockall::mock! {
    pub MigrationStore {}

    impl JobStore for MigrationStore {
        fn create_job(&self, new_job: NewJob) -> Result<ScheduledJob>;
        fn list_jobs(&self, farm_id: &str) -> Result<Vec<ScheduledJob>>;
        fn list_all_jobs(&self) -> Result<Vec<ScheduledJob>>;
        fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>>;
        fn update_schedule(
            &self,
            job_id: &str,
            schedule: Schedule,
            scheduled_time: DateTime<Utc>,
        ) -> Result<Option<ScheduledJob>>;
        fn start_run(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<RunStart>;
        fn fail_run(&self, job_id: &str, at: DateTime<Utc>) -> Result<bool>;
        fn mark_stale_running_failed(&self) -> Result<usize>;
        fn delete_job(&self, job_id: &str) -> Result<bool>;
    }

    impl ResultLedger for MigrationStore {
        fn append_result(&self, result: &JobResult) -> Result<()>;
        fn list_results(&self, job_id: &str) -> Result<Vec<JobResult>>;
        fn cleanup_results(&self, job_id: &str, max_results: usize) -> Result<usize>;
        fn remove_results(&self, job_id: &str) -> Result<usize>;
    }

    impl MigrationStore for MigrationStore {
        fn finish_run(&self, result: &JobResult) -> Result<Option<ScheduledJob>>;
    }
}

/// Build the initial record for a new job.
pub(crate) fn build_job(new_job: NewJob, id: String, now: DateTime<Utc>) -> ScheduledJob {
    ScheduledJob {
        id,
        farm_id: new_job.farm_id,
        name: new_job.name,
        description: new_job.description,
        schedule: new_job.schedule,
        strategy: new_job.strategy,
        scheduled_time: new_job.scheduled_time,
        status: JobStatus::Pending,
        total_runs: 0,
        last_run: None,
        next_run: next_run_after(new_job.schedule, new_job.scheduled_time),
        created_at: now,
        updated_at: now,
    }
}

/// Apply a schedule change to a record in place.
pub(crate) fn apply_schedule(
    job: &mut ScheduledJob,
    schedule: Schedule,
    scheduled_time: DateTime<Utc>,
    now: DateTime<Utc>,
) {
    job.schedule = schedule;
    job.scheduled_time = scheduled_time;
    job.next_run = next_run_after(schedule, scheduled_time);
    job.updated_at = now;
}

/// Apply the bookkeeping of a finished run to the job's current record.
///
/// Recurring schedules are re-seeded from the run's end time.
pub(crate) fn apply_finished_run(job: &mut ScheduledJob, result: &JobResult) {
    job.total_runs += 1;
    job.status = result.status.job_status();
    job.last_run = Some(result.end_time);
    job.next_run = if job.schedule.is_recurring() {
        next_run_after(job.schedule, result.end_time)
    } else {
        None
    };
    job.updated_at = result.end_time;
}

/// Sort newest first by end time and apply the optional limit.
pub(crate) fn sort_history(
    mut history: Vec<JobHistoryEntry>,
    limit: Option<usize>,
) -> Vec<JobHistoryEntry> {
    history.sort_by(|a, b| b.result.end_time.cmp(&a.result.end_time));
    if let Some(limit) = limit {
        history.truncate(limit);
    }
    history
}

pub(crate) fn compute_statistics(job: &ScheduledJob, results: &[JobResult]) -> Option<JobStatistics> {
    if results.is_empty() {
        return None;
    }

    let count_status =
        |status: ResultStatus| results.iter().filter(|r| r.status == status).count();
    let successful_runs = count_status(ResultStatus::Success);
    let stored_results = results.len();

    let success_rate = (successful_runs as f64 / stored_results as f64 * 100.0).clamp(0.0, 100.0);
    let average_duration_ms =
        results.iter().map(|r| r.duration_ms as f64).sum::<f64>() / stored_results as f64;

    Some(JobStatistics {
        job_id: job.id.clone(),
        total_runs: job.total_runs,
        stored_results,
        successful_runs,
        partial_runs: count_status(ResultStatus::Partial),
        failed_runs: count_status(ResultStatus::Failed),
        success_rate,
        average_duration_ms,
        last_run: results.iter().map(|r| r.end_time).max(),
    })
}
