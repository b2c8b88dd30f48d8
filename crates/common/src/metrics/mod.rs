//! Metrics and observability utilities
//!
//! Prometheus-style metrics under a shared prefix. Recording is a no-op
//! until a recorder is installed by the binary.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all recommender metrics
pub const METRICS_PREFIX: &str = "diploma";

/// Buckets for a full user synchronization (predictor call included)
pub const SYNC_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    20.00,  // 20s
    60.00,  // 60s, predictor call deadline
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Synchronization
    describe_counter!(
        format!("{}_sync_runs_total", METRICS_PREFIX),
        Unit::Count,
        "User synchronizations by outcome"
    );

    describe_histogram!(
        format!("{}_sync_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "User synchronization latency in seconds"
    );

    describe_counter!(
        format!("{}_recommendation_changes_total", METRICS_PREFIX),
        Unit::Count,
        "Recommendation edges installed, rescored or retired"
    );

    describe_counter!(
        format!("{}_items_skipped_total", METRICS_PREFIX),
        Unit::Count,
        "Predicted items skipped during staging"
    );

    describe_counter!(
        format!("{}_diplomas_deleted_total", METRICS_PREFIX),
        Unit::Count,
        "Diploma nodes deleted after losing their last reference"
    );

    describe_gauge!(
        format!("{}_batch_failed_users", METRICS_PREFIX),
        Unit::Count,
        "Users that failed in the last batch run"
    );

    // Predictor
    describe_counter!(
        format!("{}_predictor_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Predictor calls by endpoint and status"
    );

    describe_histogram!(
        format!("{}_predictor_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Predictor call latency in seconds"
    );

    // Registry
    describe_counter!(
        format!("{}_entities_created_total", METRICS_PREFIX),
        Unit::Count,
        "Reference entities created by kind"
    );

    describe_counter!(
        format!("{}_entity_races_total", METRICS_PREFIX),
        Unit::Count,
        "Concurrent creations resolved by refetching the winner"
    );

    // Feedback
    describe_counter!(
        format!("{}_feedback_writes_total", METRICS_PREFIX),
        Unit::Count,
        "Feedback upserts and deletes"
    );

    tracing::info!("Metrics registered");
}

/// Per-run change counts reported by the synchronizer
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncCounts {
    pub installed: usize,
    pub rescored: usize,
    pub retired: usize,
    pub skipped: usize,
    pub deleted_diplomas: usize,
}

/// Helper to record a finished synchronization
pub fn record_sync(duration_secs: f64, success: bool, counts: SyncCounts) {
    let outcome = if success { "success" } else { "error" };

    counter!(
        format!("{}_sync_runs_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        format!("{}_sync_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome
    )
    .record(duration_secs);

    if !success {
        return;
    }

    for (change, count) in [
        ("installed", counts.installed),
        ("rescored", counts.rescored),
        ("retired", counts.retired),
    ] {
        counter!(
            format!("{}_recommendation_changes_total", METRICS_PREFIX),
            "change" => change
        )
        .increment(count as u64);
    }

    counter!(format!("{}_items_skipped_total", METRICS_PREFIX)).increment(counts.skipped as u64);

    counter!(format!("{}_diplomas_deleted_total", METRICS_PREFIX))
        .increment(counts.deleted_diplomas as u64);
}

/// Helper to record a batch run
pub fn record_batch(failed_users: usize) {
    gauge!(format!("{}_batch_failed_users", METRICS_PREFIX)).set(failed_users as f64);
}

/// Helper to record predictor metrics
pub fn record_predictor(endpoint: &'static str, duration_secs: f64, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_predictor_requests_total", METRICS_PREFIX),
        "endpoint" => endpoint,
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_predictor_duration_seconds", METRICS_PREFIX),
        "endpoint" => endpoint
    )
    .record(duration_secs);
}

/// Helper to record registry metrics
pub fn record_entity(kind: &'static str, created: bool, raced: bool) {
    if created {
        counter!(
            format!("{}_entities_created_total", METRICS_PREFIX),
            "kind" => kind
        )
        .increment(1);
    }
    if raced {
        counter!(
            format!("{}_entity_races_total", METRICS_PREFIX),
            "kind" => kind
        )
        .increment(1);
    }
}

/// Helper to record feedback writes
pub fn record_feedback(op: &'static str) {
    counter!(
        format!("{}_feedback_writes_total", METRICS_PREFIX),
        "op" => op
    )
    .increment(1);
}
