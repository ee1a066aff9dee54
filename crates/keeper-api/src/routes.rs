//! API routes.

use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::handlers::{health, ready};
use crate::handlers::jobs::{
    create_job, delete_job, final_results, get_job, list_jobs, partial_results, rename_job,
};
use crate::metrics::metrics_middleware;
use crate::state::AppState;
use crate::ws::ws_upload;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let job_routes = Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id", delete(delete_job))
        .route("/jobs/:job_id/name", patch(rename_job))
        .route("/jobs/:job_id/partial", get(partial_results))
        .route("/jobs/:job_id/results", get(final_results));

    let ws_routes = Router::new().route("/ws/upload", get(ws_upload));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    // Metrics endpoint (if enabled)
    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .merge(job_routes)
        .merge(ws_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(middleware::from_fn(metrics_middleware))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}

/// CORS for the dashboard origin(s); wildcard in development.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_methods(Any)
            .allow_headers(Any)
            .allow_origin(origins)
    }
}
