//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use veilpay_core::PayError;
use veilpay_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials or signature.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The gateway does not support the requested operation.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            Self::NotImplemented(msg) => {
                (StatusCode::NOT_IMPLEMENTED, "not_implemented", msg.clone())
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<PayError> for ApiError {
    fn from(err: PayError) -> Self {
        match err {
            PayError::Validation(_)
            | PayError::CurrencyMismatch { .. }
            | PayError::AmountOutOfRange { .. }
            | PayError::UnknownGateway(_)
            | PayError::UnknownCurrency(_)
            | PayError::InvalidId(_) => Self::BadRequest(err.to_string()),
            PayError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
            PayError::Authentication(msg) => Self::Unauthorized(msg),
            PayError::NotFound { .. } => Self::NotFound(err.to_string()),
            PayError::ExternalService { .. } => Self::ExternalService(err.to_string()),
            PayError::Unsupported { .. } => Self::NotImplemented(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity}: {id}")),
            StoreError::Domain(inner) => inner.into(),
            StoreError::Poisoned => Self::Internal("store lock poisoned".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_maps_to_conflict() {
        let api: ApiError = PayError::InvalidTransition {
            entity: "payment",
            current: "completed".to_string(),
            attempted: "cancel",
        }
        .into();
        assert!(matches!(api, ApiError::Conflict(_)));
    }

    #[test]
    fn authentication_maps_to_unauthorized() {
        let api: ApiError = PayError::Authentication("sig mismatch".to_string()).into();
        assert!(matches!(api, ApiError::Unauthorized(_)));
    }

    #[test]
    fn store_domain_error_unwraps() {
        let api: ApiError = StoreError::Domain(PayError::validation("bad amount")).into();
        assert!(matches!(api, ApiError::BadRequest(_)));
    }
}
