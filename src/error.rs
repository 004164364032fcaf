//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::audit::AuditLogError;
use crate::domain::{AmountError, DomainError};
use crate::event_store::EventStoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Idempotency conflict: same key with different request")]
    IdempotencyConflict,

    #[error("Request with the same idempotency key is still in progress")]
    IdempotencyInProgress,

    #[error("Missing required header: {0}")]
    MissingHeader(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Server errors (5xx)
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    #[error("Storage timed out")]
    Timeout,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Audit log error: {0}")]
    Audit(#[from] AuditLogError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<EventStoreError> for AppError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::IdempotencyKeyMismatch(_) => AppError::IdempotencyConflict,
            EventStoreError::IdempotencyKeyInFlight(_) => AppError::IdempotencyInProgress,
            EventStoreError::Timeout { .. } => AppError::Timeout,
            other => AppError::EventStore(other),
        }
    }
}

impl From<AmountError> for AppError {
    fn from(err: AmountError) -> Self {
        AppError::Domain(DomainError::amount("amount", err))
    }
}

impl AppError {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Domain(e) => e.is_retryable(),
            AppError::IdempotencyInProgress | AppError::Timeout => true,
            AppError::EventStore(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

fn domain_response(err: &DomainError) -> (StatusCode, &'static str, Option<serde_json::Value>) {
    use serde_json::json;

    match err {
        DomainError::Validation { field, message } => (
            StatusCode::BAD_REQUEST,
            "validation_error",
            Some(json!({ "field": field, "message": message })),
        ),
        DomainError::InvalidState(msg) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_state",
            Some(json!({ "message": msg })),
        ),
        DomainError::ExceedsAccrued { requested, payable } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "exceeds_accrued",
            Some(json!({ "requested": requested, "payable": payable })),
        ),
        DomainError::NoAccrual { accrued, paid } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "no_accrual",
            Some(json!({ "accrued": accrued, "paid": paid })),
        ),
        DomainError::InvalidTransition { from, to } => (
            StatusCode::CONFLICT,
            "invalid_transition",
            Some(json!({ "from": from, "to": to })),
        ),
        DomainError::ConcurrentModification {
            sale_id,
            expected,
            found,
        } => (
            StatusCode::CONFLICT,
            "concurrent_modification",
            Some(json!({ "sale_id": sale_id, "expected_version": expected, "found_version": found })),
        ),
        DomainError::SaleNotFound(id) => (
            StatusCode::NOT_FOUND,
            "sale_not_found",
            Some(json!({ "sale_id": id })),
        ),
        DomainError::PlanNotFound(id) => (
            StatusCode::NOT_FOUND,
            "plan_not_found",
            Some(json!({ "plan_id": id })),
        ),
        DomainError::PaymentNotFound(id) => (
            StatusCode::NOT_FOUND,
            "payment_not_found",
            Some(json!({ "payment_id": id })),
        ),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request",
                Some(serde_json::json!({ "message": msg })),
            ),
            AppError::MissingHeader(header) => (
                StatusCode::BAD_REQUEST,
                "missing_header",
                Some(serde_json::json!({ "header": header })),
            ),

            // 401 Unauthorized
            AppError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key", None),

            // 403 Forbidden
            AppError::PermissionDenied => (StatusCode::FORBIDDEN, "permission_denied", None),

            // 409 Conflict
            AppError::IdempotencyConflict => (StatusCode::CONFLICT, "idempotency_conflict", None),
            AppError::IdempotencyInProgress => {
                (StatusCode::CONFLICT, "idempotency_in_progress", None)
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(domain_err) => domain_response(domain_err),

            // 503 / 500
            AppError::Timeout => {
                tracing::warn!("Storage call timed out");
                (StatusCode::SERVICE_UNAVAILABLE, "storage_timeout", None)
            }
            AppError::EventStore(e) => {
                tracing::error!("Event store error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "event_store_error", None)
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Audit(e) => {
                tracing::error!("Audit log error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "audit_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
            retryable: self.is_retryable(),
        };

        (status, Json(body)).into_response()
    }
}
