//! Backend request metrics.

use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Total backend requests by operation and status.
    pub const REQUESTS_TOTAL: &str = "viddy_backend_requests_total";

    /// Request latency in seconds by operation.
    pub const LATENCY_SECONDS: &str = "viddy_backend_latency_seconds";

    /// Realtime connection attempts by outcome.
    pub const REALTIME_CONNECTS_TOTAL: &str = "viddy_realtime_connects_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record metrics for a completed backend request.
pub fn record_request(operation: &str, status: u16, latency_ms: f64) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a realtime connection attempt.
pub fn record_connect(outcome: &'static str) {
    counter!(names::REALTIME_CONNECTS_TOTAL, "outcome" => outcome).increment(1);
}
