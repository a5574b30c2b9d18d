//! Billing service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Messages
//! returned to callers stay generic for server-side failures; the detail is
//! logged instead.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Billing service error type.
///
/// Maps to HTTP status codes:
/// - Database, Internal: 500 Internal Server Error
/// - NotFound: 404 Not Found
/// - BadRequest, Ended: 400 Bad Request
/// - ServiceUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The conference already has an end time.
    #[error("Conference ended")]
    Ended,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            BillingError::Database(_) | BillingError::Internal(_) => 500,
            BillingError::NotFound(_) => 404,
            BillingError::BadRequest(_) | BillingError::Ended => 400,
            BillingError::ServiceUnavailable(_) => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            BillingError::Database(err) => {
                tracing::error!(target: "billing.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            BillingError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            BillingError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            BillingError::Ended => (StatusCode::BAD_REQUEST, "ENDED", "ended".to_string()),
            BillingError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "billing.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
            BillingError::Internal(reason) => {
                tracing::error!(target: "billing.internal", reason = %reason, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Convert sqlx errors to BillingError
impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}
