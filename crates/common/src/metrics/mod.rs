//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with SLO-aligned histograms
//! and standardized naming conventions.

use crate::providers::CircuitState;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all RelayForge metrics
pub const METRICS_PREFIX: &str = "relayforge";

/// SLO-aligned histogram buckets for request latency (in seconds)
/// Targets: P50 < 50ms, P99 < 150ms for non-routing endpoints
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms - P50 target
    0.075,  // 75ms
    0.100,  // 100ms
    0.150,  // 150ms - P99 target
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
];

/// Buckets for upstream provider latency (typically much slower)
pub const PROVIDER_BUCKETS: &[f64] = &[
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
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

    // Routing metrics
    describe_counter!(
        format!("{}_route_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Routed AI requests by outcome and provider"
    );

    describe_histogram!(
        format!("{}_route_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end routing latency including retries"
    );

    describe_counter!(
        format!("{}_route_cost_usd_total", METRICS_PREFIX),
        Unit::Count,
        "Estimated spend on routed requests in micro-dollars"
    );

    // Provider metrics
    describe_counter!(
        format!("{}_provider_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Upstream provider calls by outcome"
    );

    describe_histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Upstream provider call latency in seconds"
    );

    describe_gauge!(
        format!("{}_circuit_state", METRICS_PREFIX),
        Unit::Count,
        "Provider circuit state (0 closed, 1 half-open, 2 open)"
    );

    // Tenancy metrics
    describe_counter!(
        format!("{}_quota_rejections_total", METRICS_PREFIX),
        Unit::Count,
        "Requests rejected for exceeding a tenant's monthly limit"
    );

    describe_counter!(
        format!("{}_rate_limited_total", METRICS_PREFIX),
        Unit::Count,
        "Requests rejected by the rate limiter"
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

/// Record the outcome of a routing call
pub fn record_route(outcome: &str, provider: &str, duration_secs: f64, cost_usd: f64) {
    counter!(
        format!("{}_route_requests_total", METRICS_PREFIX),
        "outcome" => outcome.to_string(),
        "provider" => provider.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_route_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);

    if cost_usd > 0.0 {
        counter!(
            format!("{}_route_cost_usd_total", METRICS_PREFIX),
            "provider" => provider.to_string()
        )
        .increment((cost_usd * 1_000_000.0).round() as u64);
    }
}

/// Record one upstream provider call
pub fn record_provider_attempt(provider: &str, outcome: &str, duration_secs: f64) {
    counter!(
        format!("{}_provider_attempts_total", METRICS_PREFIX),
        "provider" => provider.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        "provider" => provider.to_string()
    )
    .record(duration_secs);
}

/// Record a circuit state transition
pub fn record_circuit_state(provider: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => 2.0,
    };

    gauge!(
        format!("{}_circuit_state", METRICS_PREFIX),
        "provider" => provider.to_string()
    )
    .set(value);
}

/// Record a quota rejection
pub fn record_quota_rejection(tenant_id: &str) {
    counter!(
        format!("{}_quota_rejections_total", METRICS_PREFIX),
        "tenant" => tenant_id.to_string()
    )
    .increment(1);
}

/// Record a rate-limited request
pub fn record_rate_limited() {
    counter!(format!("{}_rate_limited_total", METRICS_PREFIX)).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted and contain SLO targets
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        assert!(LATENCY_BUCKETS.contains(&0.050));
        assert!(LATENCY_BUCKETS.contains(&0.150));
    }

    #[test]
    fn test_provider_buckets_sorted() {
        assert!(PROVIDER_BUCKETS.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed; calls must be no-ops
        RequestMetrics::start("GET", "/api/tenants").finish(200);
        record_route("success", "mock", 0.01, 0.002);
        record_provider_attempt("mock", "error", 0.5);
        record_circuit_state("mock", CircuitState::Open);
    }
}
