use crate::error::{GatewayError, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GatewayError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "nudm_requests_total",
            "Total number of HTTP requests completed"
        );
        describe_histogram!(
            "nudm_request_duration_seconds",
            "HTTP request latencies in seconds"
        );
        describe_counter!(
            "nudm_admission_rejected_total",
            "Requests rejected by admission control"
        );
        describe_counter!(
            "nudm_request_timeouts_total",
            "Requests answered with 408 after exceeding the deadline"
        );
        describe_gauge!(
            "nudm_rate_limit_tracked_identifiers",
            "Identifiers held in the limiter store after the last sweep"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        service.render(),
    )
}

/// Record a completed request
pub fn record_request(method: &str, status: u16, duration: f64) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];

    counter!("nudm_requests_total", &labels).increment(1);
    histogram!("nudm_request_duration_seconds", &labels).record(duration);
}

/// Record an admission rejection (`backoff` or `window`)
pub fn record_admission_rejected(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!("nudm_admission_rejected_total", &labels).increment(1);
}

/// Record a synthesized 408
pub fn record_request_timeout() {
    counter!("nudm_request_timeouts_total").increment(1);
}

/// Record the limiter store size
pub fn record_tracked_identifiers(count: usize) {
    gauge!("nudm_rate_limit_tracked_identifiers").set(count as f64);
}
