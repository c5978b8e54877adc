//! Metrics and observability utilities
//!
//! Provides Prometheus-style metrics for every decision the retrieval
//! control loop takes: cache hits, rate-limit decisions, route selections,
//! grade verdicts and loop cycles.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all PetroRAG metrics
pub const METRICS_PREFIX: &str = "petrorag";

/// Buckets for end-to-end question latency (in seconds); model calls dominate
pub const ORCHESTRATION_BUCKETS: &[f64] = &[
    0.100,  // 100ms - fully cached
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s - single cycle with model grading
    10.00,  // 10s
    20.00,  // 20s - full rewrite budget
    40.00,  // 40s
    60.00,  // 60s
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

    // Admission metrics
    describe_counter!(
        format!("{}_rate_limit_decisions_total", METRICS_PREFIX),
        Unit::Count,
        "Rate limit decisions by outcome"
    );

    // Control loop metrics
    describe_counter!(
        format!("{}_route_selections_total", METRICS_PREFIX),
        Unit::Count,
        "Routing decisions by strategy"
    );

    describe_counter!(
        format!("{}_grade_verdicts_total", METRICS_PREFIX),
        Unit::Count,
        "Grade verdicts by verdict and deciding step"
    );

    describe_counter!(
        format!("{}_rewrites_total", METRICS_PREFIX),
        Unit::Count,
        "Question rewrites by outcome"
    );

    describe_histogram!(
        format!("{}_orchestration_cycles", METRICS_PREFIX),
        Unit::Count,
        "Route/execute/grade cycles per question"
    );

    describe_histogram!(
        format!("{}_orchestration_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end question latency in seconds"
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

/// Helper to record a rate limit decision
pub fn record_rate_limit(admitted: bool) {
    let decision = if admitted { "admitted" } else { "rejected" };
    counter!(
        format!("{}_rate_limit_decisions_total", METRICS_PREFIX),
        "decision" => decision
    )
    .increment(1);
}

/// Helper to record the strategy that handled a question
pub fn record_route(strategy: &str) {
    counter!(
        format!("{}_route_selections_total", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .increment(1);
}

/// Helper to record a grade verdict and the step that decided it
pub fn record_grade(verdict: &str, source: &str) {
    counter!(
        format!("{}_grade_verdicts_total", METRICS_PREFIX),
        "verdict" => verdict.to_string(),
        "source" => source.to_string()
    )
    .increment(1);
}

/// Helper to record a rewrite attempt
pub fn record_rewrite(success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_rewrites_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);
}

/// Helper to record a finished control loop run
pub fn record_orchestration(duration_secs: f64, cycles: usize, outcome: &str) {
    histogram!(
        format!("{}_orchestration_cycles", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(cycles as f64);

    histogram!(
        format!("{}_orchestration_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestration_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in ORCHESTRATION_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every helper must be a no-op
        record_cache(true, "llm");
        record_rate_limit(false);
        record_route("depth");
        record_grade("sufficient", "forced");
        record_rewrite(true);
        record_orchestration(0.5, 2, "answered");
        RequestMetrics::start("POST", "/v1/ask").finish(200);
    }
}
