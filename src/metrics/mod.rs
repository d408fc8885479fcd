//! Metrics module for Prometheus
//!
//! Collected per gateway instance:
//! - Request count by method, path, and status
//! - Request latency histogram
//! - Admission denials by reason code
//! - Usage-tracking dispatch failures

use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Gateway metrics collector
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    request_counter: CounterVec,
    request_latency: HistogramVec,
    denial_counter: CounterVec,
    track_failure_counter: Counter,
}

impl GatewayMetrics {
    /// Create a new metrics instance
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_counter = CounterVec::new(
            Opts::new("gateway_requests_total", "Total number of requests"),
            &["method", "path", "status"],
        )
        .expect("Failed to create request counter");

        let request_latency = HistogramVec::new(
            HistogramOpts::new(
                "gateway_request_latency_seconds",
                "Request latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["method", "path"],
        )
        .expect("Failed to create latency histogram");

        let denial_counter = CounterVec::new(
            Opts::new(
                "gateway_admission_denials_total",
                "Requests denied before reaching the upstream",
            ),
            &["reason"],
        )
        .expect("Failed to create denial counter");

        let track_failure_counter = Counter::new(
            "gateway_usage_track_failures_total",
            "Usage tracking calls that failed and were dropped",
        )
        .expect("Failed to create track failure counter");

        registry
            .register(Box::new(request_counter.clone()))
            .expect("Failed to register request counter");
        registry
            .register(Box::new(request_latency.clone()))
            .expect("Failed to register latency histogram");
        registry
            .register(Box::new(denial_counter.clone()))
            .expect("Failed to register denial counter");
        registry
            .register(Box::new(track_failure_counter.clone()))
            .expect("Failed to register track failure counter");

        Self {
            registry,
            request_counter,
            request_latency,
            denial_counter,
            track_failure_counter,
        }
    }

    /// Record a request with its status and latency
    pub fn record_request(&self, method: &str, path: &str, status: u16, latency: Duration) {
        let status_str = status.to_string();
        let normalized_path = Self::normalize_path(path);

        self.request_counter
            .with_label_values(&[method, &normalized_path, &status_str])
            .inc();

        self.request_latency
            .with_label_values(&[method, &normalized_path])
            .observe(latency.as_secs_f64());
    }

    /// Record an admission denial by reason code
    pub fn record_denial(&self, reason: &str) {
        self.denial_counter.with_label_values(&[reason]).inc();
    }

    /// Record a dropped usage-tracking call
    pub fn record_track_failure(&self) {
        self.track_failure_counter.inc();
    }

    /// Get the Prometheus metrics output
    pub fn prometheus_output(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    /// Normalize path to reduce cardinality
    /// Replace IDs and hex tokens with placeholders
    fn normalize_path(path: &str) -> String {
        let parts: Vec<&str> = path.split('/').collect();
        let normalized: Vec<String> = parts
            .iter()
            .map(|part| {
                if part.chars().all(|c| c.is_ascii_digit()) && !part.is_empty() {
                    ":id".to_string()
                } else if part.chars().all(|c| c.is_ascii_hexdigit()) && part.len() >= 8 {
                    ":uuid".to_string()
                } else {
                    (*part).to_string()
                }
            })
            .collect();
        normalized.join("/")
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        let metrics = GatewayMetrics::new();
        metrics.record_request("GET", "/v1/data", 200, Duration::from_millis(10));
        metrics.record_request("POST", "/v1/data", 502, Duration::from_millis(50));

        let output = metrics.prometheus_output();
        assert!(output.contains("gateway_requests_total"));
        assert!(output.contains("gateway_request_latency_seconds"));
    }

    #[test]
    fn test_record_denial() {
        let metrics = GatewayMetrics::new();
        metrics.record_denial("QUOTA_EXCEEDED");
        metrics.record_denial("QUOTA_EXCEEDED");
        metrics.record_denial("ENTITLEMENT_EXPIRED");

        let output = metrics.prometheus_output();
        assert!(output.contains("gateway_admission_denials_total"));
        assert!(output.contains("reason=\"QUOTA_EXCEEDED\""));
        assert!(output.contains("reason=\"ENTITLEMENT_EXPIRED\""));
    }

    #[test]
    fn test_record_track_failure() {
        let metrics = GatewayMetrics::new();
        metrics.record_track_failure();

        let output = metrics.prometheus_output();
        assert!(output.contains("gateway_usage_track_failures_total"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            GatewayMetrics::normalize_path("/v1/data/123"),
            "/v1/data/:id"
        );
        assert_eq!(
            GatewayMetrics::normalize_path("/v1/data/abc123def456"),
            "/v1/data/:uuid"
        );
        assert_eq!(GatewayMetrics::normalize_path("/v1/data"), "/v1/data");
    }
}
