use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Job definitions
// =============================================================================

/// How often a job recurs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Daily,
    Weekly,
    Monthly,
    /// Runs a single time and is never rescheduled.
    Once,
}

impl Schedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schedule::Daily => "daily",
            Schedule::Weekly => "weekly",
            Schedule::Monthly => "monthly",
            Schedule::Once => "once",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Schedule::Daily),
            "weekly" => Some(Schedule::Weekly),
            "monthly" => Some(Schedule::Monthly),
            "once" => Some(Schedule::Once),
            _ => None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Schedule::Once)
    }
}

/// Conflict reconciliation hint handed to the item migrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStrategy {
    Overwrite,
    Merge,
    SkipExisting,
}

impl MigrationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStrategy::Overwrite => "overwrite",
            MigrationStrategy::Merge => "merge",
            MigrationStrategy::SkipExisting => "skip_existing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "overwrite" => Some(MigrationStrategy::Overwrite),
            "merge" => Some(MigrationStrategy::Merge),
            "skip_existing" => Some(MigrationStrategy::SkipExisting),
            _ => None,
        }
    }
}

/// Job-level status, reflecting the outcome class of the latest execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    /// Only set while an execution is in flight.
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// A recurring or one-off migration job owned by a farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub farm_id: String,
    pub name: String,
    pub description: String,
    pub schedule: Schedule,
    pub strategy: MigrationStrategy,
    /// "Do not run before" time, also the seed of the first next-run computation.
    pub scheduled_time: DateTime<Utc>,
    pub status: JobStatus,
    /// Number of executions ever finished, regardless of result retention.
    pub total_runs: u64,
    pub last_run: Option<DateTime<Utc>>,
    /// Always `None` for `once` jobs.
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// The instant from which this job counts as due.
    ///
    /// Jobs that never ran are due from their scheduled time; afterwards only
    /// `next_run` matters, so a finished `once` job is never due again.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        if self.last_run.is_none() {
            Some(self.scheduled_time)
        } else {
            self.next_run
        }
    }
}

/// Parameters for a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub farm_id: String,
    pub name: String,
    pub description: String,
    pub schedule: Schedule,
    pub scheduled_time: DateTime<Utc>,
    pub strategy: MigrationStrategy,
}

/// Outcome of asking a store to move a job into the `running` state.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStart {
    /// The job was idle and is now `running`; carries the updated record.
    Started(ScheduledJob),
    AlreadyRunning,
    NotFound,
}

// =============================================================================
// Execution results
// =============================================================================

/// Outcome class of a single execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Partial,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Partial => "partial",
            ResultStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ResultStatus::Success),
            "partial" => Some(ResultStatus::Partial),
            "failed" => Some(ResultStatus::Failed),
            _ => None,
        }
    }

    /// Classify a batch from its counters.
    pub fn classify(total_tasks: u64, migrated_tasks: u64) -> Self {
        if migrated_tasks == total_tasks {
            ResultStatus::Success
        } else if migrated_tasks == 0 {
            ResultStatus::Failed
        } else {
            ResultStatus::Partial
        }
    }

    /// Job-level status recorded after an execution with this outcome.
    pub fn job_status(&self) -> JobStatus {
        match self {
            ResultStatus::Success | ResultStatus::Partial => JobStatus::Completed,
            ResultStatus::Failed => JobStatus::Failed,
        }
    }
}

/// Why a single item was counted as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub message: String,
}

/// Immutable record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    pub job_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: ResultStatus,
    pub total_tasks: u64,
    pub migrated_tasks: u64,
    pub failed_tasks: u64,
    pub errors: Vec<ItemFailure>,
}

/// A result tagged with the name of the job that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHistoryEntry {
    pub job_name: String,
    #[serde(flatten)]
    pub result: JobResult,
}

/// Aggregates over the stored results of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatistics {
    pub job_id: String,
    /// Lifetime execution counter from the job record.
    pub total_runs: u64,
    /// Results still retained after cleanup.
    pub stored_results: usize,
    pub successful_runs: usize,
    pub partial_runs: usize,
    pub failed_runs: usize,
    /// Percentage of stored results with `success` status, in `[0, 100]`.
    pub success_rate: f64,
    pub average_duration_ms: f64,
    pub last_run: Option<DateTime<Utc>>,
}
