//! Metrics definitions for the billing service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `billing_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to serve
/// `/metrics`.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("billing_db_query_duration_seconds".to_string()),
            &[0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000],
        )
        .map_err(|e| format!("Failed to set database query buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Record a ledger query.
///
/// Metric: `billing_db_queries_total`, `billing_db_query_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("billing_db_query_duration_seconds",
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());

    counter!("billing_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a signed confirmation.
///
/// Metric: `billing_confirmations_total`
/// Labels: `kind` (`participant_added`, `participant_removed`,
/// `conference_removed`), `epoch` (`fetched`, `fallback`)
pub fn record_confirmation(kind: &str, epoch_fetched: bool) {
    let epoch = if epoch_fetched { "fetched" } else { "fallback" };
    counter!("billing_confirmations_total",
        "kind" => kind.to_string(),
        "epoch" => epoch
    )
    .increment(1);
}

/// Record an issued join credential.
///
/// Metric: `billing_credentials_issued_total`
/// Labels: `kind` (`create`, `join`)
pub fn record_credential_issued(kind: &str) {
    counter!("billing_credentials_issued_total", "kind" => kind.to_string()).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder is installed here; these only exercise the label plumbing.

    #[test]
    fn test_record_db_query() {
        record_db_query("find_conference", "success", Duration::from_millis(3));
        record_db_query("end_conference", "error", Duration::from_millis(40));
    }

    #[test]
    fn test_record_confirmation() {
        record_confirmation("participant_added", true);
        record_confirmation("conference_removed", false);
    }

    #[test]
    fn test_record_credential_issued() {
        record_credential_issued("create");
        record_credential_issued("join");
    }
}
