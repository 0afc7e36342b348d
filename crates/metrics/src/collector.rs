use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use crate::metrics::*;

/// Handle for recording coordinator metrics.
///
/// Metrics are registered in the process-global Prometheus registry, so every
/// collector instance reports into the same series.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EVENT PIPELINE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record an event accepted by the pipeline
    pub fn record_event_published(&self, kind: &str) {
        EVENTS_PUBLISHED.with_label_values(&[kind]).inc();
        EVENTS_PENDING.inc();
    }

    /// Record an event applied to storage
    pub fn record_event_persisted(&self) {
        EVENTS_PERSISTED.inc();
        EVENTS_PENDING.dec();
    }

    /// Record an event that will never reach storage
    pub fn record_event_dropped(&self, reason: &str) {
        EVENTS_DROPPED.with_label_values(&[reason]).inc();
        EVENTS_PENDING.dec();
    }

    /// Record a publish refused for lack of buffer space
    pub fn record_publish_overflow(&self) {
        PUBLISH_OVERFLOWS.inc();
    }

    /// Record a retried storage write
    pub fn record_persist_retry(&self) {
        PERSIST_RETRIES.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CACHE METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn record_cache_hit(&self) {
        CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
    }

    pub fn record_cache_miss(&self) {
        CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
    }

    pub fn record_cache_load_failure(&self) {
        CACHE_LOAD_FAILURES.inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RECOVERY METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a completed recovery scan
    pub fn record_recovery_scan(&self, duration: Duration) {
        RECOVERY_SCANS.inc();
        RECOVERY_SCAN_DURATION.observe(duration.as_millis() as f64);
    }

    /// Record a confirm/cancel invocation outcome
    pub fn record_compensation(&self, action: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        COMPENSATIONS.with_label_values(&[action, outcome]).inc();
    }

    pub fn record_dead_transaction(&self) {
        DEAD_TRANSACTIONS.inc();
    }

    pub fn record_transactions_cleaned(&self, count: usize) {
        TRANSACTIONS_CLEANED.inc_by(count as u64);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export metrics in Prometheus text format
    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_pipeline_metrics() {
        let collector = MetricsCollector::new();

        collector.record_event_published("create");
        collector.record_event_persisted();
        collector.record_event_published("remove");
        collector.record_event_dropped("exhausted");
        collector.record_publish_overflow();

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("tcc_events_published_total"));
        assert!(metrics.contains("tcc_events_persisted_total"));
        assert!(metrics.contains("tcc_events_dropped_total"));
        assert!(metrics.contains("exhausted"));
    }

    #[test]
    fn test_record_cache_metrics() {
        let collector = MetricsCollector::new();

        collector.record_cache_hit();
        collector.record_cache_miss();
        collector.record_cache_load_failure();

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("tcc_participant_cache_lookups_total"));
        assert!(metrics.contains("tcc_participant_cache_load_failures_total"));
    }

    #[test]
    fn test_record_recovery_metrics() {
        let collector = MetricsCollector::new();

        collector.record_recovery_scan(Duration::from_millis(12));
        collector.record_compensation("confirm", true);
        collector.record_compensation("cancel", false);
        collector.record_dead_transaction();
        collector.record_transactions_cleaned(3);

        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("tcc_recovery_scan_duration_ms"));
        assert!(metrics.contains("tcc_compensations_total"));
        assert!(metrics.contains("tcc_dead_transactions_total"));
        assert!(metrics.contains("tcc_transactions_cleaned_total"));
    }
}
