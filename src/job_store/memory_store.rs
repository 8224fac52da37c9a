use super::models::{JobResult, JobStatus, NewJob, RunStart, Schedule, ScheduledJob};
use super::{
    apply_finished_run, apply_schedule, build_job, JobStore, MigrationStore, ResultLedger,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Process-local job and result storage.
///
/// Every read hands out clones taken under the lock, so callers never observe
/// a record halfway through an update. When both maps are needed the job map
/// is locked first.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, ScheduledJob>>,
    results: RwLock<HashMap<String, Vec<JobResult>>>,
}

// No mutation can panic halfway through, so a poisoned map is still
// structurally sound and can be used as-is.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut jobs: Vec<ScheduledJob>) -> Vec<ScheduledJob> {
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }
}

impl JobStore for InMemoryJobStore {
    fn create_job(&self, new_job: NewJob) -> Result<ScheduledJob> {
        let job = build_job(new_job, uuid::Uuid::new_v4().to_string(), Utc::now());
        write(&self.jobs).insert(job.id.clone(), job.clone());
        Ok(job)
    }

    fn list_jobs(&self, farm_id: &str) -> Result<Vec<ScheduledJob>> {
        let jobs = read(&self.jobs)
            .values()
            .filter(|job| job.farm_id == farm_id)
            .cloned()
            .collect();
        Ok(Self::sorted(jobs))
    }

    fn list_all_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let jobs = read(&self.jobs).values().cloned().collect();
        Ok(Self::sorted(jobs))
    }

    fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        Ok(read(&self.jobs).get(job_id).cloned())
    }

    fn update_schedule(
        &self,
        job_id: &str,
        schedule: Schedule,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>> {
        let mut jobs = write(&self.jobs);
        Ok(jobs.get_mut(job_id).map(|job| {
            apply_schedule(job, schedule, scheduled_time, Utc::now());
            job.clone()
        }))
    }

    fn start_run(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<RunStart> {
        let mut jobs = write(&self.jobs);
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(RunStart::NotFound);
        };
        if job.status == JobStatus::Running {
            return Ok(RunStart::AlreadyRunning);
        }

        job.status = JobStatus::Running;
        job.updated_at = started_at;
        Ok(RunStart::Started(job.clone()))
    }

    fn fail_run(&self, job_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut jobs = write(&self.jobs);
        match jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Running => {
                job.status = JobStatus::Failed;
                job.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn mark_stale_running_failed(&self) -> Result<usize> {
        let now = Utc::now();
        let mut count = 0;
        for job in write(&self.jobs).values_mut() {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Failed;
                job.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    fn delete_job(&self, job_id: &str) -> Result<bool> {
        Ok(write(&self.jobs).remove(job_id).is_some())
    }
}

impl ResultLedger for InMemoryJobStore {
    fn append_result(&self, result: &JobResult) -> Result<()> {
        write(&self.results)
            .entry(result.job_id.clone())
            .or_default()
            .push(result.clone());
        Ok(())
    }

    fn list_results(&self, job_id: &str) -> Result<Vec<JobResult>> {
        Ok(read(&self.results).get(job_id).cloned().unwrap_or_default())
    }

    fn cleanup_results(&self, job_id: &str, max_results: usize) -> Result<usize> {
        let mut results = write(&self.results);
        let Some(job_results) = results.get_mut(job_id) else {
            return Ok(0);
        };
        if job_results.len() <= max_results {
            return Ok(0);
        }

        // Stable sort keeps insertion order among equal end times
        job_results.sort_by(|a, b| a.end_time.cmp(&b.end_time));
        let excess = job_results.len() - max_results;
        job_results.drain(..excess);
        Ok(excess)
    }

    fn remove_results(&self, job_id: &str) -> Result<usize> {
        Ok(write(&self.results)
            .remove(job_id)
            .map(|removed| removed.len())
            .unwrap_or(0))
    }
}

impl MigrationStore for InMemoryJobStore {
    fn finish_run(&self, result: &JobResult) -> Result<Option<ScheduledJob>> {
        let mut jobs = write(&self.jobs);
        let Some(job) = jobs.get_mut(&result.job_id) else {
            return Ok(None);
        };

        write(&self.results)
            .entry(result.job_id.clone())
            .or_default()
            .push(result.clone());
        apply_finished_run(job, result);
        Ok(Some(job.clone()))
    }
}
