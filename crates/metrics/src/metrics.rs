use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // EVENT PIPELINE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Events accepted by the pipeline, by kind
    pub static ref EVENTS_PUBLISHED: IntCounterVec = register_int_counter_vec!(
        "tcc_events_published_total",
        "Total repository events accepted by the pipeline",
        &["kind"]
    )
    .unwrap();

    /// Events applied to the storage port
    pub static ref EVENTS_PERSISTED: IntCounter = register_int_counter!(
        "tcc_events_persisted_total",
        "Total repository events applied to storage"
    )
    .unwrap();

    /// Events given up on after retries or non-retryable errors
    pub static ref EVENTS_DROPPED: IntCounterVec = register_int_counter_vec!(
        "tcc_events_dropped_total",
        "Total repository events dropped",
        &["reason"]
    )
    .unwrap();

    /// Publish calls refused because the buffer was full
    pub static ref PUBLISH_OVERFLOWS: IntCounter = register_int_counter!(
        "tcc_publish_overflows_total",
        "Total publish calls refused because the buffer was full"
    )
    .unwrap();

    /// Persist attempts that were retried
    pub static ref PERSIST_RETRIES: IntCounter = register_int_counter!(
        "tcc_persist_retries_total",
        "Total storage writes retried after a transient failure"
    )
    .unwrap();

    /// Events buffered but not yet applied
    pub static ref EVENTS_PENDING: IntGauge = register_int_gauge!(
        "tcc_events_pending",
        "Repository events buffered but not yet applied"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // CACHE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cache lookups by outcome (hit, miss)
    pub static ref CACHE_LOOKUPS: IntCounterVec = register_int_counter_vec!(
        "tcc_participant_cache_lookups_total",
        "Participant cache lookups by outcome",
        &["outcome"]
    )
    .unwrap();

    /// Storage loads that failed and degraded to an empty result
    pub static ref CACHE_LOAD_FAILURES: IntCounter = register_int_counter!(
        "tcc_participant_cache_load_failures_total",
        "Participant loads that failed and returned empty"
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Recovery scans executed
    pub static ref RECOVERY_SCANS: IntCounter = register_int_counter!(
        "tcc_recovery_scans_total",
        "Total recovery scans executed"
    )
    .unwrap();

    /// Recovery scan duration in milliseconds
    pub static ref RECOVERY_SCAN_DURATION: Histogram = register_histogram!(
        "tcc_recovery_scan_duration_ms",
        "Recovery scan duration in milliseconds",
        vec![1.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 30000.0]
    )
    .unwrap();

    /// Compensation invocations by action and outcome
    pub static ref COMPENSATIONS: IntCounterVec = register_int_counter_vec!(
        "tcc_compensations_total",
        "Confirm/cancel invocations driven by recovery",
        &["action", "outcome"]
    )
    .unwrap();

    /// Transactions that exhausted their retry budget
    pub static ref DEAD_TRANSACTIONS: IntCounter = register_int_counter!(
        "tcc_dead_transactions_total",
        "Transactions marked dead after exhausting retries"
    )
    .unwrap();

    /// Terminal transactions removed by retention cleanup
    pub static ref TRANSACTIONS_CLEANED: IntCounter = register_int_counter!(
        "tcc_transactions_cleaned_total",
        "Terminal transactions removed past the retention window"
    )
    .unwrap();
}
