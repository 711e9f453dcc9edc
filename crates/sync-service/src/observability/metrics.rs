//! Metrics definitions for the Session Sync Service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sync_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: accepted, rejected
//! - `event_type`: bounded by the event enum (~11 values)
//! - `actor_type`: manager, session, connection

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used by the
/// `/metrics` route.
///
/// Must be called before any metrics are recorded. Event latency buckets
/// target p99 < 50ms for a reduction plus broadcast.
///
/// # Errors
///
/// Returns an error if the recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("sync_event_latency_seconds".to_string()),
            &[
                0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500,
            ],
        )
        .map_err(|e| format!("Failed to set event latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Gauges
// ============================================================================

/// Metric: `sync_sessions_active`
pub fn set_sessions_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sync_sessions_active").set(count as f64);
}

/// Metric: `sync_connections_active`
///
/// Incremented on attach and decremented on detach by each session actor,
/// since no single task sees every connection.
pub fn connection_attached() {
    gauge!("sync_connections_active").increment(1.0);
}

/// See [`connection_attached`].
pub fn connection_detached() {
    gauge!("sync_connections_active").decrement(1.0);
}

/// Metric: `sync_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sync_actor_mailbox_depth", "actor_type" => actor_type.to_string()).set(depth as f64);
}

// ============================================================================
// Event pipeline
// ============================================================================

/// Metric: `sync_events_total`
/// Labels: `outcome` (accepted, rejected)
pub fn record_event(outcome: &str) {
    counter!("sync_events_total", "outcome" => outcome.to_string()).increment(1);
}

/// Reduction, sequencing and broadcast time for one event.
///
/// Metric: `sync_event_latency_seconds`
/// Labels: `event_type`
pub fn record_event_latency(event_type: &'static str, duration: Duration) {
    histogram!("sync_event_latency_seconds", "event_type" => event_type)
        .record(duration.as_secs_f64());
}

// ============================================================================
// Delivery
// ============================================================================

/// A connection was dropped because its outbound queue overflowed.
///
/// Metric: `sync_outbound_dropped_total`
pub fn record_outbound_dropped() {
    counter!("sync_outbound_dropped_total").increment(1);
}

/// A reconnecting client was told to resync.
///
/// Metric: `sync_resync_total`
pub fn record_resync() {
    counter!("sync_resync_total").increment(1);
}

// ============================================================================
// Durability and faults
// ============================================================================

/// Metric: `sync_durable_append_failures_total`
pub fn record_durable_append_failure() {
    counter!("sync_durable_append_failures_total").increment(1);
}

/// A transition was not persisted because its session's durable backlog
/// was full.
///
/// Metric: `sync_durable_shed_total`
pub fn record_durable_shed() {
    counter!("sync_durable_shed_total").increment(1);
}

/// ALERT: any non-zero value indicates a bug.
///
/// Metric: `sync_actor_panics_total`
/// Labels: `actor_type`
pub fn record_actor_panic(actor_type: &str) {
    counter!("sync_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_sessions_active(3);
        connection_attached();
        connection_detached();
        set_actor_mailbox_depth("session", 12);
        record_event("accepted");
        record_event_latency("DIALOGUE_CHOICE", Duration::from_millis(2));
        record_outbound_dropped();
        record_resync();
        record_durable_append_failure();
        record_durable_shed();
        record_actor_panic("session");
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_event("accepted");
            record_event("accepted");
            record_event("rejected");
            record_resync();
            record_durable_append_failure();
            set_sessions_active(7);
            record_event_latency("STATE_UPDATE", Duration::from_millis(1));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let counter = |name: &str, label: Option<(&str, &str)>| {
            snapshot.iter().find_map(|(key, _, _, value)| {
                let key = key.key();
                let labels_match = label.map_or(true, |(k, v)| {
                    key.labels().any(|l| l.key() == k && l.value() == v)
                });
                match value {
                    DebugValue::Counter(count) if key.name() == name && labels_match => {
                        Some(*count)
                    }
                    _ => None,
                }
            })
        };

        assert_eq!(
            counter("sync_events_total", Some(("outcome", "accepted"))),
            Some(2)
        );
        assert_eq!(
            counter("sync_events_total", Some(("outcome", "rejected"))),
            Some(1)
        );
        assert_eq!(counter("sync_resync_total", None), Some(1));
        assert_eq!(counter("sync_durable_append_failures_total", None), Some(1));
        assert!(snapshot
            .iter()
            .any(|(key, _, _, _)| key.key().name() == "sync_event_latency_seconds"));
    }
}
