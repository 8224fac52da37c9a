//! Scheduled migration job runner.
//!
//! Jobs are defined per farm with a daily, weekly, monthly or one-off
//! schedule. A trigger source asks for pending jobs and hands each one a
//! batch of work items; every execution is recorded as a result with
//! bounded per-job retention.

pub mod config;
pub mod job_store;
pub mod metrics;
pub mod migration_jobs;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use job_store::{
    InMemoryJobStore, JobResult, JobStore, MigrationStore, NewJob, ResultLedger, ScheduledJob,
    SqliteJobStore,
};
pub use migration_jobs::{ItemMigrator, MigrationScheduler, RequiredFieldsMigrator, SchedulerError};
