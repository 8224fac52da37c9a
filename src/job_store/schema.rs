//! SQLite schema definitions for the job store database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Scheduled jobs and execution results
// =============================================================================

/// Job definitions and their run-state bookkeeping
const SCHEDULED_JOBS_TABLE_V1: Table = Table {
    name: "scheduled_jobs",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("farm_id", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("description", &SqlType::Text, non_null = true),
        sqlite_column!("schedule", &SqlType::Text, non_null = true),
        sqlite_column!("strategy", &SqlType::Text, non_null = true),
        sqlite_column!("scheduled_time", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("total_runs", &SqlType::Integer, non_null = true),
        sqlite_column!("last_run", &SqlType::Text),
        sqlite_column!("next_run", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_scheduled_jobs_farm_id", "farm_id, created_at")],
};

/// One row per execution; `errors` holds the JSON-encoded item failures
const JOB_RESULTS_TABLE_V1: Table = Table {
    name: "job_results",
    columns: &[
        // Rowid alias; orders rows by insertion
        sqlite_column!("seq", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("id", &SqlType::Text, non_null = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("start_time", &SqlType::Text, non_null = true),
        sqlite_column!("end_time", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("total_tasks", &SqlType::Integer, non_null = true),
        sqlite_column!("migrated_tasks", &SqlType::Integer, non_null = true),
        sqlite_column!("failed_tasks", &SqlType::Integer, non_null = true),
        sqlite_column!("errors", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_job_results_job_id_end", "job_id, end_time DESC")],
};

pub const JOB_STORE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[SCHEDULED_JOBS_TABLE_V1, JOB_RESULTS_TABLE_V1],
    migration: None,
}];
