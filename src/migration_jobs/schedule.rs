//! Next-run computation for job schedules.

use crate::job_store::Schedule;
use chrono::{DateTime, Duration, Months, Utc};

/// Compute the next execution time of a schedule from a reference instant.
///
/// Returns `None` for `once` schedules, which never recur, and for the
/// (theoretical) case where the result would overflow the supported range.
pub fn next_run_after(schedule: Schedule, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule {
        Schedule::Daily => reference.checked_add_signed(Duration::days(1)),
        Schedule::Weekly => reference.checked_add_signed(Duration::weeks(1)),
        // Day of month is clamped, e.g. Jan 31 -> Feb 28/29
        Schedule::Monthly => reference.checked_add_months(Months::new(1)),
        Schedule::Once => None,
    }
}
