//! End-to-end tests for the scheduler facade over both store backends.

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{
    complete_item, incomplete_item, new_job, t0, GatedMigrator, TestScheduler, FARM_1_ID,
    FARM_2_ID,
};
use migration_job_runner::job_store::{
    JobStatus, JobStore, MigrationStrategy, ResultStatus, Schedule, SqliteJobStore,
};
use migration_job_runner::migration_jobs::{MigrationScheduler, RequiredFieldsMigrator};
use serde_json::json;
use std::sync::{mpsc, Arc, Barrier};
use tempfile::TempDir;

fn backends() -> Vec<(&'static str, TestScheduler)> {
    vec![
        ("memory", TestScheduler::in_memory()),
        ("sqlite", TestScheduler::sqlite()),
    ]
}

#[test]
fn test_partial_run_with_missing_required_field() {
    for (backend, scheduler) in backends() {
        let job = scheduler
            .create_job(new_job(
                FARM_1_ID,
                "Task import",
                Schedule::Once,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();

        let result = scheduler
            .execute(&job.id, &[complete_item(1), incomplete_item(2)])
            .unwrap();

        assert_eq!(result.status, ResultStatus::Partial, "{}", backend);
        assert_eq!(result.total_tasks, 2);
        assert_eq!(result.migrated_tasks, 1);
        assert_eq!(result.failed_tasks, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].index, 1);
        assert!(result.errors[0].message.contains("title"));

        let stored = scheduler.get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed, "{}", backend);
        assert_eq!(stored.total_runs, 1);
        assert!(stored.next_run.is_none());
    }
}

#[test]
fn test_task_counts_always_add_up() {
    let scheduler = TestScheduler::in_memory();
    let job = scheduler
        .create_job(new_job(
            FARM_1_ID,
            "Mixed",
            Schedule::Daily,
            t0(),
            MigrationStrategy::Overwrite,
        ))
        .unwrap();

    let batches = vec![
        vec![],
        vec![complete_item(1)],
        vec![incomplete_item(1), json!(42), json!(null)],
        vec![complete_item(1), incomplete_item(2), complete_item(3)],
    ];
    for items in batches {
        let result = scheduler.execute(&job.id, &items).unwrap();
        assert_eq!(result.total_tasks, items.len() as u64);
        assert_eq!(result.migrated_tasks + result.failed_tasks, result.total_tasks);
        assert!(result.duration_ms > 0);
    }
}

#[test]
fn test_concurrent_executes_only_one_runs() {
    const THREADS: usize = 8;

    let gate = Arc::new(Barrier::new(2));
    let scheduler = Arc::new(TestScheduler::in_memory_with(Arc::new(GatedMigrator::new(
        gate.clone(),
        std::time::Duration::ZERO,
    ))));
    let job = scheduler
        .create_job(new_job(
            FARM_1_ID,
            "Contended",
            Schedule::Weekly,
            t0(),
            MigrationStrategy::Merge,
        ))
        .unwrap();

    let start = Arc::new(Barrier::new(THREADS));
    let (tx, rx) = mpsc::channel();
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let scheduler = scheduler.clone();
            let start = start.clone();
            let tx = tx.clone();
            let job_id = job.id.clone();
            std::thread::spawn(move || {
                start.wait();
                let outcome = scheduler.execute(&job_id, &[json!({ "gate": true })]);
                tx.send(outcome).unwrap();
            })
        })
        .collect();

    // The winner is parked on the gate, so every other thread must bounce off
    for _ in 0..THREADS - 1 {
        let err = rx.recv().unwrap().unwrap_err();
        assert!(err.is_already_running());
        assert!(err.to_string().contains("already running"));
    }
    assert!(scheduler.is_job_running(&job.id));

    gate.wait();
    let result = rx.recv().unwrap().unwrap();
    assert_eq!(result.status, ResultStatus::Success);

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(!scheduler.is_job_running(&job.id));
    let stored = scheduler.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.total_runs, 1);
    assert_eq!(scheduler.get_job_results(&job.id).unwrap().len(), 1);
}

#[test]
fn test_running_job_is_not_pending_and_cannot_be_deleted() {
    let gate = Arc::new(Barrier::new(2));
    let scheduler = Arc::new(TestScheduler::sqlite_with(Arc::new(GatedMigrator::new(
        gate.clone(),
        std::time::Duration::ZERO,
    ))));
    let job = scheduler
        .create_job(new_job(
            FARM_1_ID,
            "Long run",
            Schedule::Daily,
            t0(),
            MigrationStrategy::Merge,
        ))
        .unwrap();

    let runner = {
        let scheduler = scheduler.clone();
        let job_id = job.id.clone();
        std::thread::spawn(move || scheduler.execute(&job_id, &[json!({ "gate": true })]))
    };

    // Spin until the run has claimed the job
    while !scheduler.is_job_running(&job.id) {
        std::thread::yield_now();
    }
    assert!(scheduler.get_pending_jobs_at(t0()).unwrap().is_empty());
    assert!(scheduler.delete_job(&job.id).unwrap_err().is_already_running());

    gate.wait();
    runner.join().unwrap().unwrap();

    assert_eq!(
        scheduler.get_job(&job.id).unwrap().unwrap().status,
        JobStatus::Completed
    );
    assert!(scheduler.delete_job(&job.id).unwrap());
}

#[test]
fn test_schedulers_sharing_a_database_never_run_a_job_twice() {
    let gate = Arc::new(Barrier::new(2));
    let first = Arc::new(TestScheduler::sqlite_with(Arc::new(GatedMigrator::new(
        gate.clone(),
        std::time::Duration::ZERO,
    ))));
    let second = first.reopen_with(Arc::new(RequiredFieldsMigrator::default()));
    let job = first
        .create_job(new_job(
            FARM_1_ID,
            "Shared",
            Schedule::Daily,
            t0(),
            MigrationStrategy::Merge,
        ))
        .unwrap();

    let runner = {
        let first = first.clone();
        let job_id = job.id.clone();
        std::thread::spawn(move || first.execute(&job_id, &[json!({ "gate": true })]))
    };

    // Wait until the first scheduler has persisted the running state
    while second.get_job(&job.id).unwrap().unwrap().status != JobStatus::Running {
        std::thread::yield_now();
    }
    assert!(!second.is_job_running(&job.id));
    let err = second.execute(&job.id, &[complete_item(1)]).unwrap_err();
    assert!(err.is_already_running());
    assert!(second.get_pending_jobs_at(t0()).unwrap().is_empty());
    assert!(second.delete_job(&job.id).unwrap_err().is_already_running());

    gate.wait();
    runner.join().unwrap().unwrap();

    let stored = second.get_job(&job.id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.total_runs, 1);
    assert_eq!(second.get_job_results(&job.id).unwrap().len(), 1);

    second.execute(&job.id, &[complete_item(1)]).unwrap();
    assert_eq!(first.get_job(&job.id).unwrap().unwrap().total_runs, 2);
}

#[test]
fn test_job_interrupted_by_a_crash_is_recovered() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("jobs.db");

    // A process that died after starting the run
    let job_id = {
        let store = SqliteJobStore::new(&db_path).unwrap();
        let job = store
            .create_job(new_job(
                FARM_2_ID,
                "Interrupted",
                Schedule::Once,
                t0(),
                MigrationStrategy::SkipExisting,
            ))
            .unwrap();
        store.start_run(&job.id, t0()).unwrap();
        job.id
    };

    let scheduler = MigrationScheduler::new(
        Arc::new(SqliteJobStore::new(&db_path).unwrap()),
        Arc::new(RequiredFieldsMigrator::default()),
    );
    assert!(scheduler
        .get_pending_jobs_at(t0() + Duration::days(3650))
        .unwrap()
        .is_empty());

    assert_eq!(scheduler.recover_interrupted_jobs().unwrap(), 1);
    let pending = scheduler.get_pending_jobs_at(t0()).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, JobStatus::Failed);

    let result = scheduler.execute(&job_id, &[complete_item(1)]).unwrap();
    assert_eq!(result.status, ResultStatus::Success);
    assert!(scheduler.get_pending_jobs_at(t0()).unwrap().is_empty());
}

#[test]
fn test_unknown_job_ids() {
    for (backend, scheduler) in backends() {
        assert!(scheduler.get_job("missing").unwrap().is_none(), "{}", backend);
        assert!(scheduler.get_statistics("missing").unwrap().is_none());
        assert!(!scheduler.delete_job("missing").unwrap());
        assert!(scheduler.get_job_results("missing").unwrap().is_empty());

        let err = scheduler.execute("missing", &[complete_item(1)]).unwrap_err();
        assert!(err.is_not_found(), "{}", backend);
    }
}

#[test]
fn test_total_runs_and_success_rate() {
    for (backend, scheduler) in backends() {
        let job = scheduler
            .create_job(new_job(
                FARM_1_ID,
                "Counter",
                Schedule::Monthly,
                t0(),
                MigrationStrategy::SkipExisting,
            ))
            .unwrap();

        let batches = [
            vec![complete_item(1)],
            vec![incomplete_item(1)],
            vec![complete_item(1), incomplete_item(2)],
            vec![],
            vec![complete_item(7)],
        ];
        for items in &batches {
            scheduler.execute(&job.id, items).unwrap();
        }

        let stats = scheduler.get_statistics(&job.id).unwrap().unwrap();
        assert_eq!(stats.total_runs, batches.len() as u64, "{}", backend);
        assert_eq!(stats.stored_results, batches.len());
        assert_eq!(stats.successful_runs, 3);
        assert_eq!(stats.partial_runs, 1);
        assert_eq!(stats.failed_runs, 1);
        assert!((0.0..=100.0).contains(&stats.success_rate));
        assert!((stats.success_rate - 60.0).abs() < 1e-9);
        assert!(stats.average_duration_ms >= 1.0);
    }
}

#[test]
fn test_cleanup_keeps_latest_results() {
    for (backend, scheduler) in backends() {
        let job = scheduler
            .create_job(new_job(
                FARM_1_ID,
                "Busy",
                Schedule::Daily,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();

        for _ in 0..150 {
            scheduler.execute(&job.id, &[]).unwrap();
        }
        let before = scheduler.get_job_results(&job.id).unwrap();
        let latest_end = before.iter().map(|r| r.end_time).max().unwrap();

        assert_eq!(scheduler.cleanup_results(&job.id, 100).unwrap(), 50, "{}", backend);
        let after = scheduler.get_job_results(&job.id).unwrap();
        assert_eq!(after.len(), 100);
        assert!(after.iter().any(|r| r.end_time == latest_end));

        // Only the oldest were dropped
        let oldest_kept = after.iter().map(|r| r.end_time).min().unwrap();
        let dropped: Vec<_> = before
            .iter()
            .filter(|r| !after.iter().any(|kept| kept.id == r.id))
            .collect();
        assert_eq!(dropped.len(), 50);
        assert!(dropped.iter().all(|r| r.end_time <= oldest_kept));

        // Idempotent, and the run counter is untouched
        assert_eq!(scheduler.cleanup_results(&job.id, 100).unwrap(), 0);
        assert_eq!(scheduler.get_job(&job.id).unwrap().unwrap().total_runs, 150);
    }
}

#[test]
fn test_history_sorted_newest_first_across_farm_jobs() {
    for (backend, scheduler) in backends() {
        let first = scheduler
            .create_job(new_job(
                FARM_1_ID,
                "First",
                Schedule::Daily,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();
        let second = scheduler
            .create_job(new_job(
                FARM_1_ID,
                "Second",
                Schedule::Weekly,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();
        let other_farm = scheduler
            .create_job(new_job(
                FARM_2_ID,
                "Elsewhere",
                Schedule::Daily,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();

        for job_id in [&first.id, &second.id, &first.id, &other_farm.id, &second.id] {
            scheduler.execute(job_id, &[complete_item(1)]).unwrap();
        }

        let history = scheduler.get_job_history(FARM_1_ID, None).unwrap();
        assert_eq!(history.len(), 4, "{}", backend);
        assert!(history
            .windows(2)
            .all(|pair| pair[0].result.end_time >= pair[1].result.end_time));
        assert_eq!(history[0].job_name, "Second");
        assert!(history.iter().all(|e| e.result.job_id != other_farm.id));

        let limited = scheduler.get_job_history(FARM_1_ID, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].result.id, history[0].result.id);

        let entry = serde_json::to_value(&history[0]).unwrap();
        assert_eq!(entry["job_name"], "Second");
        assert_eq!(entry["status"], "success");
    }
}

#[test]
fn test_once_job_never_pending_after_run() {
    for (backend, scheduler) in backends() {
        let job = scheduler
            .create_job(new_job(
                FARM_1_ID,
                "One shot",
                Schedule::Once,
                t0(),
                MigrationStrategy::Overwrite,
            ))
            .unwrap();
        assert!(job.next_run.is_none());
        assert!(scheduler
            .get_pending_jobs_at(t0() - Duration::seconds(1))
            .unwrap()
            .is_empty());
        assert_eq!(scheduler.get_pending_jobs_at(t0()).unwrap().len(), 1);

        scheduler.execute(&job.id, &[complete_item(1)]).unwrap();

        let far_future = Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap();
        assert!(
            scheduler.get_pending_jobs_at(far_future).unwrap().is_empty(),
            "{}",
            backend
        );
    }
}

#[test]
fn test_daily_job_next_run_and_recurrence() {
    for (backend, scheduler) in backends() {
        let job = scheduler
            .create_job(new_job(
                FARM_1_ID,
                "Nightly",
                Schedule::Daily,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();

        let next_run = job.next_run.unwrap();
        assert!(next_run >= t0() + Duration::hours(23), "{}", backend);
        assert!(next_run <= t0() + Duration::hours(25));

        let first = scheduler.execute(&job.id, &[]).unwrap();
        let after_first = scheduler.get_job(&job.id).unwrap().unwrap();
        assert_eq!(after_first.next_run, Some(first.end_time + Duration::days(1)));

        let due = after_first.next_run.unwrap();
        let pending = scheduler.get_pending_jobs_at(due).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, job.id);

        let second = scheduler.execute(&job.id, &[]).unwrap();
        let after_second = scheduler.get_job(&job.id).unwrap().unwrap();
        assert_eq!(after_second.total_runs, 2);
        assert_eq!(after_second.next_run, Some(second.end_time + Duration::days(1)));
    }
}

#[test]
fn test_monthly_next_run_clamps_to_month_end() {
    let scheduler = TestScheduler::in_memory();
    let jan_31 = Utc.with_ymd_and_hms(2023, 1, 31, 12, 0, 0).unwrap();
    let job = scheduler
        .create_job(new_job(
            FARM_1_ID,
            "Month end",
            Schedule::Monthly,
            jan_31,
            MigrationStrategy::Merge,
        ))
        .unwrap();

    let next_run = job.next_run.unwrap();
    assert_eq!(next_run, Utc.with_ymd_and_hms(2023, 2, 28, 12, 0, 0).unwrap());
    assert!(next_run > jan_31 + Duration::days(20));
    assert!(next_run < jan_31 + Duration::days(32));
}

#[test]
fn test_update_schedule_recomputes_next_run() {
    for (backend, scheduler) in backends() {
        let job = scheduler
            .create_job(new_job(
                FARM_2_ID,
                "Reschedule me",
                Schedule::Daily,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();

        let new_time = t0() + Duration::days(2);
        let updated = scheduler
            .update_schedule(&job.id, Schedule::Weekly, new_time)
            .unwrap()
            .unwrap();
        assert_eq!(updated.schedule, Schedule::Weekly, "{}", backend);
        assert_eq!(updated.scheduled_time, new_time);
        assert_eq!(updated.next_run, Some(new_time + Duration::weeks(1)));

        let once = scheduler
            .update_schedule(&job.id, Schedule::Once, new_time)
            .unwrap()
            .unwrap();
        assert!(once.next_run.is_none());
        assert_eq!(scheduler.get_job(&job.id).unwrap().unwrap(), once);
    }
}

#[test]
fn test_list_and_delete_scoped_by_farm() {
    for (backend, scheduler) in backends() {
        let a = scheduler
            .create_job(new_job(
                FARM_1_ID,
                "A",
                Schedule::Daily,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();
        scheduler
            .create_job(new_job(
                FARM_2_ID,
                "B",
                Schedule::Daily,
                t0(),
                MigrationStrategy::Merge,
            ))
            .unwrap();

        assert_eq!(scheduler.list_jobs(FARM_1_ID).unwrap().len(), 1, "{}", backend);
        assert_eq!(scheduler.list_jobs(FARM_2_ID).unwrap().len(), 1);
        assert!(scheduler.list_jobs("farm-unknown").unwrap().is_empty());

        scheduler.execute(&a.id, &[complete_item(1)]).unwrap();
        assert!(scheduler.delete_job(&a.id).unwrap());
        assert!(!scheduler.delete_job(&a.id).unwrap());
        assert!(scheduler.list_jobs(FARM_1_ID).unwrap().is_empty());
        assert!(scheduler.get_job_history(FARM_1_ID, None).unwrap().is_empty());
        assert!(scheduler.get_job_results(&a.id).unwrap().is_empty());
    }
}
