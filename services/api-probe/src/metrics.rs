//! Prometheus exposition for the client metrics
//!
//! The probe is a one-shot process, so there is no `/metrics` endpoint: with
//! `--metrics` the rendered text is printed to stderr after the command runs.

use api_client::metrics::{REQUEST_DURATION_BUCKETS, REQUEST_DURATION_METRIC};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// `api_client_request_duration_seconds` gets explicit buckets so it renders
/// as a histogram rather than a summary.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_METRIC.to_string()),
            REQUEST_DURATION_BUCKETS,
        )?
        .install_recorder()?;
    Ok(handle)
}
