#![allow(dead_code)]

use chrono::{DateTime, Utc};
use migration_job_runner::job_store::{
    InMemoryJobStore, MigrationStrategy, NewJob, Schedule, SqliteJobStore,
};
use migration_job_runner::migration_jobs::{
    ItemError, ItemMigrator, MigrationScheduler, RequiredFieldsMigrator,
};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tempfile::TempDir;

/// A scheduler plus whatever backing resources must outlive it.
pub struct TestScheduler {
    pub scheduler: MigrationScheduler,
    _temp_dir: Option<TempDir>,
}

impl TestScheduler {
    pub fn in_memory() -> Self {
        Self::in_memory_with(Arc::new(RequiredFieldsMigrator::default()))
    }

    pub fn in_memory_with(migrator: Arc<dyn ItemMigrator>) -> Self {
        Self {
            scheduler: MigrationScheduler::new(Arc::new(InMemoryJobStore::new()), migrator),
            _temp_dir: None,
        }
    }

    pub fn sqlite() -> Self {
        Self::sqlite_with(Arc::new(RequiredFieldsMigrator::default()))
    }

    pub fn sqlite_with(migrator: Arc<dyn ItemMigrator>) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let scheduler = Self::open_sqlite(&temp_dir, migrator);
        Self {
            scheduler,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Another scheduler over the same database file, as a second process
    /// would open it.
    pub fn reopen_with(&self, migrator: Arc<dyn ItemMigrator>) -> MigrationScheduler {
        let temp_dir = self
            ._temp_dir
            .as_ref()
            .expect("only SQLite-backed schedulers can be reopened");
        Self::open_sqlite(temp_dir, migrator)
    }

    fn open_sqlite(temp_dir: &TempDir, migrator: Arc<dyn ItemMigrator>) -> MigrationScheduler {
        let store = SqliteJobStore::new(temp_dir.path().join("jobs.db")).unwrap();
        MigrationScheduler::new(Arc::new(store), migrator)
    }
}

impl std::ops::Deref for TestScheduler {
    type Target = MigrationScheduler;

    fn deref(&self) -> &Self::Target {
        &self.scheduler
    }
}

pub fn new_job(
    farm_id: &str,
    name: &str,
    schedule: Schedule,
    scheduled_time: DateTime<Utc>,
    strategy: MigrationStrategy,
) -> NewJob {
    NewJob {
        farm_id: farm_id.to_string(),
        name: name.to_string(),
        description: format!("{} migration", name),
        schedule,
        scheduled_time,
        strategy,
    }
}

pub fn complete_item(id: u64) -> JsonValue {
    json!({ "id": id, "title": format!("Task {}", id), "status": "open" })
}

pub fn incomplete_item(id: u64) -> JsonValue {
    json!({ "id": id, "status": "open" })
}

/// Migrator that parks the first item of a batch on a barrier, then
/// lingers, so a run stays in flight while other threads act.
pub struct GatedMigrator {
    gate: Arc<Barrier>,
    hold: Duration,
}

impl GatedMigrator {
    pub fn new(gate: Arc<Barrier>, hold: Duration) -> Self {
        Self { gate, hold }
    }
}

impl ItemMigrator for GatedMigrator {
    fn migrate(&self, item: &JsonValue, _strategy: MigrationStrategy) -> Result<(), ItemError> {
        if item.get("gate").is_some() {
            self.gate.wait();
            std::thread::sleep(self.hold);
        }
        Ok(())
    }
}
