use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::interview::conversation::ConversationError;
use crate::interview::ledger::LedgerError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient interview time: {remaining_seconds}s remaining")]
    InsufficientBalance { remaining_seconds: i64 },

    #[error("Forbidden")]
    Forbidden,

    #[error("Conversation error: {0}")]
    Conversation(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { remaining_seconds } => {
                AppError::InsufficientBalance { remaining_seconds }
            }
            LedgerError::InvalidExternalReference => {
                AppError::Validation("Invalid conversation reference".to_string())
            }
            LedgerError::NotFound(msg) => AppError::NotFound(msg),
            LedgerError::Unauthorized(_) => AppError::Forbidden,
            LedgerError::InvalidState(msg) => {
                AppError::Internal(anyhow::anyhow!("invalid session state: {msg}"))
            }
            LedgerError::Storage(e) => AppError::Internal(e),
        }
    }
}

impl From<ConversationError> for AppError {
    fn from(err: ConversationError) -> Self {
        AppError::Conversation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::InsufficientBalance { remaining_seconds } => {
                let body = Json(json!({
                    "error": {
                        "code": "INSUFFICIENT_BALANCE",
                        "message": "Not enough interview time remaining. Add more time to continue.",
                        "remaining_seconds": remaining_seconds
                    }
                }));
                return (StatusCode::PAYMENT_REQUIRED, body).into_response();
            }
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Access denied".to_string(),
            ),
            AppError::Conversation(msg) => {
                tracing::error!("Conversation error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "CONVERSATION_ERROR",
                    "The interview service is unavailable".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_ledger_errors_map_to_http_status() {
        let cases = [
            (
                LedgerError::InsufficientBalance { remaining_seconds: 3 },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (LedgerError::InvalidExternalReference, StatusCode::BAD_REQUEST),
            (LedgerError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (LedgerError::Unauthorized(Uuid::new_v4()), StatusCode::FORBIDDEN),
            (
                LedgerError::InvalidState("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                LedgerError::Storage(anyhow::anyhow!("connection reset")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_conversation_error_is_bad_gateway() {
        let err = ConversationError::Api {
            status: 503,
            message: "down".into(),
        };
        assert_eq!(
            AppError::from(err).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
