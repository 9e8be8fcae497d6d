//! Application error types.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use nutri_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid CSRF token")]
    CsrfMismatch,

    #[error("Locked: {0}")]
    Locked(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: i64,
    },

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            AppError::Validation(m) => (StatusCode::BAD_REQUEST, "validation_error", m.as_str()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str()),
            AppError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str()),
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str()),
            AppError::CsrfMismatch => (
                StatusCode::FORBIDDEN,
                "csrf_mismatch",
                "Invalid or missing CSRF token",
            ),
            AppError::Locked(m) => (StatusCode::LOCKED, "account_locked", m.as_str()),
            AppError::RateLimited { message, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "rate_limited", message.as_str())
            }
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            ),
        };

        // Internal detail is only echoed by debug builds.
        let detail = match &self {
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                cfg!(debug_assertions).then(|| detail.clone())
            }
            _ => None,
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
            detail,
        });
        let mut response = (status, body).into_response();
        if let AppError::RateLimited {
            retry_after_secs, ..
        } = self
            && let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::AccountLocked { minutes } => AppError::Locked(format!(
                "Too many failed login attempts. Try again in {minutes} minute(s)"
            )),
            AuthError::AccountBlocked => AppError::Forbidden("Account is blocked".into()),
            AuthError::TokenExpired | AuthError::TokenInvalid | AuthError::SuspiciousActivity => {
                AppError::Unauthorized("Please log in again".into())
            }
            AuthError::InsufficientAccess => {
                AppError::Forbidden("Insufficient access level".into())
            }
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::DbError(e) => AppError::Internal(e.to_string()),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}
