//! Prometheus metrics exposition
//!
//! The refresh engine records its own series through the `metrics` facade:
//!
//! - `credential_refresh_total` (counter): label `outcome`
//! - `credential_refresh_duration_seconds` (histogram)
//! - `credential_expiry_events_total` (counter)
//!
//! This service adds `callback_requests_total` (counter, label `status`).

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Refresh duration buckets: 10ms up to the longest sensible token request.
const REFRESH_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("credential_refresh_duration_seconds".to_string()),
            REFRESH_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The refresh histogram gets explicit buckets so it renders `_bucket` lines
/// instead of a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record one `/callback` request by response status.
pub fn record_callback(status: u16) {
    metrics::counter!("callback_requests_total", "status" => status.to_string()).increment(1);
}

#[cfg(test)]
pub(crate) fn isolated_recorder() -> (
    metrics_exporter_prometheus::PrometheusRecorder,
    PrometheusHandle,
) {
    let recorder = builder().build_recorder();
    let handle = recorder.handle();
    (recorder, handle)
}
