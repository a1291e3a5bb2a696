// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::models::{attempt::AttemptStatus, enrollment::UnavailableReason};

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request (validation failures, never retried)
    BadRequest(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 409 Conflict, the learner cannot take the quiz right now
    NotAvailable(UnavailableReason),

    // 409 Conflict, the attempt already reached a terminal state
    AlreadyFinalized(AttemptStatus),

    // 422 Unprocessable Entity (dangling references, unknown stored values)
    IntegrityViolation(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::NotAvailable(reason) => write!(f, "quiz not available: {}", reason),
            AppError::AlreadyFinalized(status) => write!(f, "attempt already finalized as {}", status),
            other => write!(f, "{:?}", other),
        }
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal Server Error" }),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::NotAvailable(reason) => (
                StatusCode::CONFLICT,
                json!({ "error": "not_available", "reason": reason }),
            ),
            AppError::AlreadyFinalized(status) => (
                StatusCode::CONFLICT,
                json!({ "error": "already_finalized", "status": status }),
            ),
            AppError::IntegrityViolation(msg) => {
                tracing::error!("Integrity violation: {}", msg);
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    json!({ "error": "integrity_violation", "detail": msg }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
