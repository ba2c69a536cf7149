//! Health Routes
//!
//! - GET /health/live - Liveness probe (process is alive)
//! - GET /health/ready - Readiness probe (backend reachable)
//! - GET /health - Full health status

use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::HealthResponse;
use crate::api::state::AppState;

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.backend.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Backend not ready");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// GET /health
///
/// A failing backend degrades the service rather than failing it; views keep
/// serving their last known state.
pub async fn full_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (status, backend_status) = match state.backend.health_check().await {
        Ok(()) => ("healthy", "ok".to_string()),
        Err(e) => ("degraded", e.to_string()),
    };

    Json(HealthResponse {
        status: status.to_string(),
        backend: state.backend.name().to_string(),
        backend_status,
        rooms: state.registry.room_count().await,
        connections: state.hub.connection_count().await,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        assert_eq!(liveness().await, StatusCode::OK);
    }
}
