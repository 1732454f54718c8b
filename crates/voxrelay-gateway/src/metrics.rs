//! Prometheus metrics for sessions and turns.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global recorder. Fails if one is already installed.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {e}"))
}

pub fn record_session_open() {
    metrics::gauge!("voxrelay_sessions_active").increment(1.0);
    metrics::counter!("voxrelay_sessions_total").increment(1);
}

pub fn record_session_close(reason: &str) {
    let labels = [("reason", reason.to_string())];
    metrics::gauge!("voxrelay_sessions_active").decrement(1.0);
    metrics::counter!("voxrelay_sessions_closed_total", &labels).increment(1);
}

/// Record a finished turn, labelled by outcome.
pub fn record_turn(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    metrics::counter!("voxrelay_turns_total", &labels).increment(1);
    metrics::histogram!("voxrelay_turn_duration_seconds", &labels).record(duration_secs);
}
