//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness with trusted range count and uptime
//! - `GET /ready` - Readiness for load balancers and orchestrators
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Always 200, `status` is `degraded` while range
//!   sources are configured but nothing has been fetched yet
//! - **Readiness** (`/ready`): 503 until client IPs can be resolved
//!   correctly

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::{HealthResponse, ReadyResponse};
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "trusted_ranges": 22,
///   "uptime_seconds": 3600,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.is_ready() { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        trusted_ranges: state.proxies.ranges().len(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint.
///
/// Answers 503 while trusted ranges are still loading, so an orchestrator
/// keeps traffic away until client IPs resolve correctly.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let ready = state.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            ready,
            trusted_ranges_loaded: state.proxies.ranges().is_loaded(),
        }),
    )
}
