//! Client-side metrics
//!
//! - `api_client_requests_total` (counter): labels `method`, `outcome`
//! - `api_client_request_duration_seconds` (histogram): label `outcome`
//! - `api_client_refresh_total` (counter): label `outcome`
//!
//! `outcome` is `success` or the lowercased error kind. Without an installed
//! recorder these are no-ops.

use crate::error::ClassifiedError;

pub const REQUEST_DURATION_METRIC: &str = "api_client_request_duration_seconds";

/// Histogram buckets for `api_client_request_duration_seconds`, 5ms to 60s.
pub const REQUEST_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Record a completed pipeline call, including any replay.
pub fn record_request(method: &str, error: Option<&ClassifiedError>, duration_secs: f64) {
    let outcome = outcome_label(error);
    metrics::counter!("api_client_requests_total", "method" => method.to_string(), "outcome" => outcome.clone())
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_METRIC, "outcome" => outcome).record(duration_secs);
}

/// Record the end of a renewal cycle.
pub fn record_refresh(succeeded: bool) {
    let outcome = if succeeded { "success" } else { "failure" };
    metrics::counter!("api_client_refresh_total", "outcome" => outcome).increment(1);
}

fn outcome_label(error: Option<&ClassifiedError>) -> String {
    match error {
        None => "success".to_owned(),
        Some(e) => e.kind().as_str().to_ascii_lowercase(),
    }
}
