//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Handler for GET /health
///
/// Pings the ledger. Returns 503 with `"unhealthy"` when it is unreachable
/// so probes see the failure without a generic error body.
#[instrument(skip_all, name = "billing.health.check")]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    match state.conferences.ledger().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                database: "healthy".to_string(),
            }),
        ),
        Err(e) => {
            tracing::warn!(target: "billing.health", error = %e, "Ledger ping failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    database: "unhealthy".to_string(),
                }),
            )
        }
    }
}
