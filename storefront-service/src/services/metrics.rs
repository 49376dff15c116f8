//! Prometheus exposition and domain counters.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global recorder. Calling it twice is an error.
pub fn init_metrics() -> Result<(), anyhow::Error> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    METRICS_HANDLE
        .set(handle)
        .map_err(|_| anyhow::anyhow!("Metrics recorder already initialized"))
}

pub fn render() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_auth_event(event: &'static str, outcome: &'static str) {
    metrics::counter!("auth_events_total", "event" => event, "outcome" => outcome).increment(1);
}
