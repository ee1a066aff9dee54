//! Liveness and readiness probes.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: &'static str,
    pub records: bool,
    pub storage: bool,
}

/// Readiness probe: both adapters must answer.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let records = match state.records.check_connectivity().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Record store not ready: {}", e);
            false
        }
    };
    let storage = match state.storage.check_connectivity().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Blob store not ready: {}", e);
            false
        }
    };

    let all_ready = records && storage;
    let status = if all_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if all_ready { "ready" } else { "degraded" },
            records,
            storage,
        }),
    )
}
