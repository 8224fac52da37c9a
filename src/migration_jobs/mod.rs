mod engine;
mod error;
mod migrator;
mod schedule;
mod scheduler;

pub use engine::{ExecutionEngine, MAX_RECORDED_ERRORS};
pub use error::SchedulerError;
pub use migrator::{ItemError, ItemMigrator, RequiredFieldsMigrator, DEFAULT_REQUIRED_FIELDS};
pub use schedule::next_run_after;
pub use scheduler::MigrationScheduler;
