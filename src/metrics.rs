use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all job runner metrics
const PREFIX: &str = "migration_job";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Execution Metrics
    pub static ref EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_executions_total"), "Total finished job executions"),
        &["status"]
    ).expect("Failed to create executions_total metric");

    pub static ref EXECUTION_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_duration_seconds"),
            "Job execution duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0])
    ).expect("Failed to create duration_seconds metric");

    pub static ref ITEMS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_items_total"), "Work items processed by outcome"),
        &["outcome"]
    ).expect("Failed to create items_total metric");

    pub static ref RUNNING: Gauge = Gauge::new(
        format!("{PREFIX}_running"),
        "Number of job executions currently in flight"
    ).expect("Failed to create running metric");

    pub static ref REJECTIONS_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_rejections_total"),
        "Executions rejected because the job was already running"
    ).expect("Failed to create rejections_total metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(EXECUTION_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ITEMS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(REJECTIONS_TOTAL.clone()));

    tracing::debug!("Metrics system initialized");
}

/// Record a finished execution
pub fn record_execution(status: &str, duration: Duration, migrated: u64, failed: u64) {
    EXECUTIONS_TOTAL.with_label_values(&[status]).inc();
    EXECUTION_DURATION_SECONDS.observe(duration.as_secs_f64());
    ITEMS_TOTAL
        .with_label_values(&["migrated"])
        .inc_by(migrated as f64);
    ITEMS_TOTAL.with_label_values(&["failed"]).inc_by(failed as f64);
}

pub fn execution_started() {
    RUNNING.inc();
}

pub fn execution_finished() {
    RUNNING.dec();
}

/// Record an execute call rejected by the per-job guard
pub fn record_rejection() {
    REJECTIONS_TOTAL.inc();
}

/// Encode the registry in the Prometheus text exposition format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        // Registering twice must not panic
        init_metrics();

        let metric_families = REGISTRY.gather();
        assert!(!metric_families.is_empty(), "Metrics should be registered");
    }

    #[test]
    fn test_record_execution() {
        init_metrics();

        record_execution("partial", Duration::from_millis(40), 3, 1);

        let metrics = REGISTRY.gather();
        let executions = metrics
            .iter()
            .find(|m| m.get_name() == "migration_job_executions_total");
        assert!(executions.is_some(), "Execution metrics should exist");

        let items = metrics
            .iter()
            .find(|m| m.get_name() == "migration_job_items_total");
        assert!(items.is_some(), "Item metrics should exist");
    }

    #[test]
    fn test_gather_metrics_text() {
        init_metrics();
        record_rejection();

        let text = gather_metrics();
        assert!(text.contains("migration_job_rejections_total"));
    }
}
