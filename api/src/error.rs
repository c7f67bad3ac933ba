use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use coachlog_core::error::{self, ApiError};

use crate::ledger::LedgerError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or rejected credential (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Authenticated but not allowed (403)
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// Referenced record does not exist (404)
    NotFound { resource: String },
    /// Concurrent write lost after retries (409)
    Conflict { message: String },
    /// Record store unreachable after retry (503)
    StoreUnavailable(String),
    /// Internal error (500)
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, code, message, field, received, docs_hint) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                error::codes::VALIDATION_FAILED,
                message,
                field,
                received,
                docs_hint,
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                error::codes::UNAUTHENTICATED,
                message,
                None,
                None,
                docs_hint,
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                error::codes::FORBIDDEN,
                message,
                None,
                None,
                docs_hint,
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                error::codes::NOT_FOUND,
                format!("{resource} not found"),
                None,
                None,
                None,
            ),
            AppError::Conflict { message } => (
                StatusCode::CONFLICT,
                error::codes::CONFLICT,
                message,
                None,
                None,
                Some(
                    "The record was modified concurrently. Retrying the request is safe."
                        .to_string(),
                ),
            ),
            AppError::StoreUnavailable(detail) => {
                tracing::error!(
                    request_id = %request_id,
                    detail = %detail,
                    "record store unavailable"
                );
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    error::codes::STORE_UNAVAILABLE,
                    "The record store is temporarily unavailable".to_string(),
                    None,
                    None,
                    Some("Retry the request after a short delay.".to_string()),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = %request_id, "Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error::codes::INTERNAL_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                    None,
                    None,
                )
            }
        };

        let body = ApiError {
            error: code.to_string(),
            message,
            field,
            received,
            request_id,
            docs_hint,
        };
        (status, Json(body)).into_response()
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Forbidden { message, hint } => AppError::Forbidden {
                message,
                docs_hint: hint.map(str::to_string),
            },
            LedgerError::NotFound { resource } => AppError::NotFound { resource },
            LedgerError::Conflict { message } => AppError::Conflict { message },
            LedgerError::Validation {
                message,
                field,
                received,
            } => AppError::Validation {
                message,
                field,
                received,
                docs_hint: None,
            },
            LedgerError::StoreUnavailable(detail) => AppError::StoreUnavailable(detail),
            LedgerError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_status_codes() {
        let cases = [
            (LedgerError::forbidden("no"), StatusCode::FORBIDDEN),
            (
                LedgerError::NotFound {
                    resource: "workout plan".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                LedgerError::Conflict {
                    message: "raced".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (LedgerError::validation("bad", "sets"), StatusCode::BAD_REQUEST),
            (
                LedgerError::StoreUnavailable("down".to_string()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                LedgerError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn forbidden_carries_its_own_hint() {
        match AppError::from(LedgerError::forbidden_with_hint("not yours", "ask the owner")) {
            AppError::Forbidden { docs_hint, .. } => {
                assert_eq!(docs_hint.as_deref(), Some("ask the owner"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match AppError::from(LedgerError::forbidden("no")) {
            AppError::Forbidden { docs_hint, .. } => assert_eq!(docs_hint, None),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
