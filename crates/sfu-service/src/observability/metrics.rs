//! Metrics definitions for the SFU service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sfu_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to serve
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Billing callbacks cross the internet and carry a 10s timeout
        .set_buckets_for_metric(
            Matcher::Prefix("sfu_billing_notification".to_string()),
            &[
                0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set billing notification buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of conferences that have not ended.
///
/// Metric: `sfu_conferences_active`
pub fn set_active_conferences(count: usize) {
    // usize to f64 conversion is safe for realistic conference counts
    #[allow(clippy::cast_precision_loss)]
    gauge!("sfu_conferences_active").set(count as f64);
}

/// Record a join outcome.
///
/// Metric: `sfu_joins_total`
/// Labels: `status` ("success" or a signaling error kind)
pub fn record_join(status: &str) {
    counter!("sfu_joins_total", "status" => status.to_string()).increment(1);
}

/// Record a billing callback outcome and its latency.
///
/// Metric: `sfu_billing_notifications_total`, `sfu_billing_notification_duration_seconds`
/// Labels: `kind` (participant_added, participant_removed, conference_removed), `status`
pub fn record_notification(kind: &str, status: &str, duration: Duration) {
    counter!(
        "sfu_billing_notifications_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("sfu_billing_notification_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record a billing contract call.
///
/// Metric: `sfu_chain_calls_total`
/// Labels: `method` (create_call, end_call), `status` (success, error)
pub fn record_chain_call(method: &str, status: &str) {
    counter!(
        "sfu_chain_calls_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a forced close by the idle watchdog.
///
/// Metric: `sfu_watchdog_forced_closes_total`
pub fn record_watchdog_forced_close() {
    counter!("sfu_watchdog_forced_closes_total").increment(1);
}

/// Record ended conferences dropped from the registry.
///
/// Metric: `sfu_conferences_purged_total`
pub fn record_conferences_purged(count: usize) {
    counter!("sfu_conferences_purged_total").increment(count as u64);
}
