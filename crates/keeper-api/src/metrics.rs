//! Prometheus metrics for the API server.

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

/// Initialize the Prometheus metrics recorder.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "keeper_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "keeper_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "keeper_http_requests_in_flight";

    // Upload session metrics
    pub const UPLOAD_SESSIONS_TOTAL: &str = "keeper_upload_sessions_total";
    pub const UPLOAD_SESSIONS_ACTIVE: &str = "keeper_upload_sessions_active";
    pub const UPLOAD_CHUNKS_RECEIVED: &str = "keeper_upload_chunks_received_total";
    pub const UPLOAD_BYTES_RECEIVED: &str = "keeper_upload_bytes_received_total";

    // Job metrics (completed/failed/cancelled are recorded by the pipeline)
    pub const JOBS_CREATED_TOTAL: &str = "keeper_jobs_created_total";
    pub const JOBS_DELETED_TOTAL: &str = "keeper_jobs_deleted_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record an upload session opening.
pub fn record_upload_session() {
    counter!(names::UPLOAD_SESSIONS_TOTAL).increment(1);
}

/// Update the active upload session gauge.
pub fn set_active_upload_sessions(count: i64) {
    gauge!(names::UPLOAD_SESSIONS_ACTIVE).set(count as f64);
}

/// Record one received chunk.
pub fn record_upload_chunk(bytes: usize) {
    counter!(names::UPLOAD_CHUNKS_RECEIVED).increment(1);
    counter!(names::UPLOAD_BYTES_RECEIVED).increment(bytes as u64);
}

/// Record job creation.
pub fn record_job_created() {
    counter!(names::JOBS_CREATED_TOTAL).increment(1);
}

/// Record job deletion.
pub fn record_job_deleted() {
    counter!(names::JOBS_DELETED_TOTAL).increment(1);
}

/// Collapse job ids out of paths so metric labels stay low-cardinality.
fn sanitize_path(path: &str) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut after_jobs = false;
    for segment in path.split('/') {
        if after_jobs && !segment.is_empty() {
            parts.push(":id".to_string());
            after_jobs = false;
            continue;
        }
        after_jobs = segment == "jobs";
        parts.push(segment.to_string());
    }
    parts.join("/")
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}
