//! Prometheus metrics exposition
//!
//! The gateway records:
//!
//! - `gateway_runs_total` (counter): label `status`
//! - `gateway_run_duration_seconds` (histogram): label `status`
//!
//! The library crates record key and batch metrics through the same global
//! recorder (`key_probes_total`, `key_status_changes_total`,
//! `batch_items_total`, `batch_attempts_total`).

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Runs poll remote actors for minutes, so buckets reach well past the
/// default poll wait.
const RUN_DURATION_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("gateway_run_duration_seconds".to_string()),
            RUN_DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a finished run with its report status (or error type).
pub fn record_run(status: &str, duration_secs: f64) {
    metrics::counter!("gateway_runs_total", "status" => status.to_string()).increment(1);
    metrics::histogram!("gateway_run_duration_seconds", "status" => status.to_string())
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_run_does_not_panic_without_recorder() {
        record_run("completed", 1.0);
    }

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_run_increments_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_run("completed", 42.0);
        record_run("no_credentials", 0.01);

        let output = handle.render();
        assert!(output.contains("gateway_runs_total"));
        assert!(output.contains("status=\"completed\""));
        assert!(output.contains("status=\"no_credentials\""));
        assert!(
            output.contains("gateway_run_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("le=\"1200\""));
    }
}
