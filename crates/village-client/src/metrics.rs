//! Client-side metrics
//!
//! Recorded through the `metrics` facade; embedders install whatever
//! recorder they export with. Without one, every call is a no-op.
//!
//! - `api_requests_total` (counter): labels `method`, `status` (`0` when no
//!   response was received)
//! - `api_request_duration_seconds` (histogram): label `method`
//! - `api_token_refresh_total` (counter): label `outcome`

/// Bucket boundaries suited to `api_request_duration_seconds`, 5ms up to
/// the default 30s request timeout.
pub const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Record one attempt against the backend. A replay after refresh counts as
/// a second attempt.
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "api_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("api_request_duration_seconds", "method" => method.to_string())
        .record(duration_secs);
}

/// Record the end of a refresh episode: `success`, `failure` or
/// `superseded`.
pub fn record_refresh(outcome: &str) {
    metrics::counter!("api_token_refresh_total", "outcome" => outcome.to_string()).increment(1);
}
