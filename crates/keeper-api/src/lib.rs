//! Axum HTTP/WS API server.
//!
//! This crate provides:
//! - The REST query surface over jobs and results
//! - The `/ws/upload` assembler session
//! - Prometheus metrics and health probes

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
