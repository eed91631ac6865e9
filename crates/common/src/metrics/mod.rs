//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram,
    gauge, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all CategoryRank metrics
pub const METRICS_PREFIX: &str = "catrank";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
];

/// Buckets for build latency (fetch + solve, much slower)
pub const BUILD_BUCKETS: &[f64] = &[
    0.5,
    1.0,
    5.0,
    10.0,
    30.0,
    60.0,
    120.0,
    300.0,
    600.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Rank request outcomes
    describe_counter!(
        format!("{}_rank_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Rank requests by outcome (complete, pending, started)"
    );

    // Build metrics
    describe_counter!(
        format!("{}_builds_total", METRICS_PREFIX),
        Unit::Count,
        "Category builds by outcome"
    );

    describe_histogram!(
        format!("{}_build_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Category build latency (fetch and solve) in seconds"
    );

    describe_gauge!(
        format!("{}_graph_pages", METRICS_PREFIX),
        Unit::Count,
        "Pages in the most recently solved category graph"
    );

    describe_gauge!(
        format!("{}_builds_in_flight", METRICS_PREFIX),
        Unit::Count,
        "Category builds currently running in this process"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record the outcome of a rank request
pub fn record_rank_request(outcome: &str) {
    counter!(
        format!("{}_rank_requests_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Helper to record a build start
pub fn record_build_started() {
    counter!(
        format!("{}_builds_total", METRICS_PREFIX),
        "outcome" => "started"
    )
    .increment(1);

    gauge!(format!("{}_builds_in_flight", METRICS_PREFIX)).increment(1.0);
}

/// Helper to record a finished build
pub fn record_build_finished(duration_secs: f64, pages: usize, success: bool) {
    let outcome = if success { "succeeded" } else { "failed" };

    counter!(
        format!("{}_builds_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);

    gauge!(format!("{}_builds_in_flight", METRICS_PREFIX)).decrement(1.0);

    if success {
        histogram!(format!("{}_build_duration_seconds", METRICS_PREFIX)).record(duration_secs);
        gauge!(format!("{}_graph_pages", METRICS_PREFIX)).set(pages as f64);
    }
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}
