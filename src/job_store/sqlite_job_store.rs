use super::models::{
    JobResult, JobStatus, MigrationStrategy, NewJob, ResultStatus, RunStart, Schedule,
    ScheduledJob,
};
use super::schema::JOB_STORE_VERSIONED_SCHEMAS;
use super::{
    apply_finished_run, apply_schedule, build_job, JobStore, MigrationStore, ResultLedger,
};
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const JOB_COLUMNS: &str = "id, farm_id, name, description, schedule, strategy, scheduled_time, \
     status, total_runs, last_run, next_run, created_at, updated_at";

const RESULT_COLUMNS: &str = "id, job_id, start_time, end_time, duration_ms, status, \
     total_tasks, migrated_tasks, failed_tasks, errors";

#[derive(Debug, thiserror::Error)]
#[error("invalid value '{value}' in column {column}")]
struct InvalidColumnValue {
    column: &'static str,
    value: String,
}

/// SQLite-backed job store and result ledger.
///
/// Several processes may open the same database file. Every read-modify-write
/// runs in an IMMEDIATE transaction, so the write lock is held from the read on.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        if !path.exists() {
            info!("Creating new job store database at {:?}", path);
        }
        let conn = Connection::open(path).context("Failed to open job store database")?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database, mostly useful in tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        open_versioned(&mut conn, JOB_STORE_VERSIONED_SCHEMAS)
            .context("Failed to prepare job store schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // A panic while holding the connection cannot leave a statement half-applied.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        // Fixed width so that text ordering matches time ordering
        dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn parse_datetime(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    }

    fn parse_enum<T>(
        idx: usize,
        column: &'static str,
        value: String,
        parse: fn(&str) -> Option<T>,
    ) -> rusqlite::Result<T> {
        parse(&value).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                Type::Text,
                Box::new(InvalidColumnValue { column, value }),
            )
        })
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ScheduledJob> {
        let last_run: Option<String> = row.get(9)?;
        let next_run: Option<String> = row.get(10)?;
        let total_runs: i64 = row.get(8)?;

        Ok(ScheduledJob {
            id: row.get(0)?,
            farm_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            schedule: Self::parse_enum(4, "schedule", row.get(4)?, Schedule::parse)?,
            strategy: Self::parse_enum(5, "strategy", row.get(5)?, MigrationStrategy::parse)?,
            scheduled_time: Self::parse_datetime(6, &row.get::<_, String>(6)?)?,
            status: Self::parse_enum(7, "status", row.get(7)?, JobStatus::parse)?,
            total_runs: total_runs as u64,
            last_run: last_run
                .map(|s| Self::parse_datetime(9, &s))
                .transpose()?,
            next_run: next_run
                .map(|s| Self::parse_datetime(10, &s))
                .transpose()?,
            created_at: Self::parse_datetime(11, &row.get::<_, String>(11)?)?,
            updated_at: Self::parse_datetime(12, &row.get::<_, String>(12)?)?,
        })
    }

    fn row_to_result(row: &rusqlite::Row) -> rusqlite::Result<JobResult> {
        let errors: String = row.get(9)?;
        let total_tasks: i64 = row.get(6)?;
        let migrated_tasks: i64 = row.get(7)?;
        let failed_tasks: i64 = row.get(8)?;

        Ok(JobResult {
            id: row.get(0)?,
            job_id: row.get(1)?,
            start_time: Self::parse_datetime(2, &row.get::<_, String>(2)?)?,
            end_time: Self::parse_datetime(3, &row.get::<_, String>(3)?)?,
            duration_ms: row.get(4)?,
            status: Self::parse_enum(5, "status", row.get(5)?, ResultStatus::parse)?,
            total_tasks: total_tasks as u64,
            migrated_tasks: migrated_tasks as u64,
            failed_tasks: failed_tasks as u64,
            errors: serde_json::from_str(&errors).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e))
            })?,
        })
    }

    fn select_job(conn: &Connection, job_id: &str) -> Result<Option<ScheduledJob>> {
        let job = conn
            .query_row(
                &format!("SELECT {} FROM scheduled_jobs WHERE id = ?1", JOB_COLUMNS),
                params![job_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn insert_result(conn: &Connection, result: &JobResult) -> Result<()> {
        let errors = serde_json::to_string(&result.errors)?;
        conn.execute(
            &format!(
                "INSERT INTO job_results ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                RESULT_COLUMNS
            ),
            params![
                result.id,
                result.job_id,
                Self::format_datetime(&result.start_time),
                Self::format_datetime(&result.end_time),
                result.duration_ms,
                result.status.as_str(),
                result.total_tasks as i64,
                result.migrated_tasks as i64,
                result.failed_tasks as i64,
                errors,
            ],
        )?;
        Ok(())
    }
}

impl JobStore for SqliteJobStore {
    fn create_job(&self, new_job: NewJob) -> Result<ScheduledJob> {
        let job = build_job(new_job, uuid::Uuid::new_v4().to_string(), Utc::now());
        let conn = self.conn();

        conn.execute(
            &format!(
                "INSERT INTO scheduled_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.farm_id,
                job.name,
                job.description,
                job.schedule.as_str(),
                job.strategy.as_str(),
                Self::format_datetime(&job.scheduled_time),
                job.status.as_str(),
                job.total_runs as i64,
                job.last_run.as_ref().map(Self::format_datetime),
                job.next_run.as_ref().map(Self::format_datetime),
                Self::format_datetime(&job.created_at),
                Self::format_datetime(&job.updated_at),
            ],
        )?;

        Ok(job)
    }

    fn list_jobs(&self, farm_id: &str) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_jobs WHERE farm_id = ?1 ORDER BY created_at, id",
            JOB_COLUMNS
        ))?;

        let jobs = stmt
            .query_map(params![farm_id], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn list_all_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM scheduled_jobs ORDER BY created_at, id",
            JOB_COLUMNS
        ))?;

        let jobs = stmt
            .query_map([], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(jobs)
    }

    fn get_job(&self, job_id: &str) -> Result<Option<ScheduledJob>> {
        Self::select_job(&self.conn(), job_id)
    }

    fn update_schedule(
        &self,
        job_id: &str,
        schedule: Schedule,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Option<ScheduledJob>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut job) = Self::select_job(&tx, job_id)? else {
            return Ok(None);
        };

        apply_schedule(&mut job, schedule, scheduled_time, Utc::now());
        tx.execute(
            "UPDATE scheduled_jobs SET schedule = ?2, scheduled_time = ?3, next_run = ?4,
                updated_at = ?5
             WHERE id = ?1",
            params![
                job.id,
                job.schedule.as_str(),
                Self::format_datetime(&job.scheduled_time),
                job.next_run.as_ref().map(Self::format_datetime),
                Self::format_datetime(&job.updated_at),
            ],
        )?;
        tx.commit()?;
        Ok(Some(job))
    }

    fn start_run(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<RunStart> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let changed = tx.execute(
            "UPDATE scheduled_jobs SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status <> ?2",
            params![
                job_id,
                JobStatus::Running.as_str(),
                Self::format_datetime(&started_at)
            ],
        )?;

        let outcome = match Self::select_job(&tx, job_id)? {
            None => RunStart::NotFound,
            Some(job) if changed > 0 => RunStart::Started(job),
            Some(_) => RunStart::AlreadyRunning,
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn fail_run(&self, job_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE scheduled_jobs SET status = ?2, updated_at = ?3 WHERE id = ?1 AND status = ?4",
            params![
                job_id,
                JobStatus::Failed.as_str(),
                Self::format_datetime(&at),
                JobStatus::Running.as_str()
            ],
        )?;
        Ok(changed > 0)
    }

    fn mark_stale_running_failed(&self) -> Result<usize> {
        let count = self.conn().execute(
            "UPDATE scheduled_jobs SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                JobStatus::Failed.as_str(),
                Self::format_datetime(&Utc::now()),
                JobStatus::Running.as_str()
            ],
        )?;
        Ok(count)
    }

    fn delete_job(&self, job_id: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM scheduled_jobs WHERE id = ?1", params![job_id])?;
        Ok(changed > 0)
    }
}

impl ResultLedger for SqliteJobStore {
    fn append_result(&self, result: &JobResult) -> Result<()> {
        Self::insert_result(&self.conn(), result)
    }

    fn list_results(&self, job_id: &str) -> Result<Vec<JobResult>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM job_results WHERE job_id = ?1 ORDER BY seq",
            RESULT_COLUMNS
        ))?;

        let results = stmt
            .query_map(params![job_id], Self::row_to_result)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(results)
    }

    fn cleanup_results(&self, job_id: &str, max_results: usize) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM job_results
             WHERE job_id = ?1 AND seq NOT IN (
                SELECT seq FROM job_results WHERE job_id = ?1
                ORDER BY end_time DESC, seq DESC LIMIT ?2
             )",
            params![job_id, max_results as i64],
        )?;
        Ok(removed)
    }

    fn remove_results(&self, job_id: &str) -> Result<usize> {
        let removed = self
            .conn()
            .execute("DELETE FROM job_results WHERE job_id = ?1", params![job_id])?;
        Ok(removed)
    }
}

impl MigrationStore for SqliteJobStore {
    fn finish_run(&self, result: &JobResult) -> Result<Option<ScheduledJob>> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let Some(mut job) = Self::select_job(&tx, &result.job_id)? else {
            return Ok(None);
        };

        Self::insert_result(&tx, result)?;
        apply_finished_run(&mut job, result);
        tx.execute(
            "UPDATE scheduled_jobs SET status = ?2, total_runs = ?3, last_run = ?4, next_run = ?5,
                updated_at = ?6
             WHERE id = ?1",
            params![
                job.id,
                job.status.as_str(),
                job.total_runs as i64,
                job.last_run.as_ref().map(Self::format_datetime),
                job.next_run.as_ref().map(Self::format_datetime),
                Self::format_datetime(&job.updated_at),
            ],
        )?;
        tx.commit()?;
        Ok(Some(job))
    }
}
