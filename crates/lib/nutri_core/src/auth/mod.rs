//! Authentication and session-security logic.
//!
//! Provides password hashing, JWT signing, the refresh token ledger, account
//! lockout, CSRF token primitives and the `AuthService` that ties them
//! together. Nothing in here knows about HTTP.

pub mod csrf;
pub mod jwt;
pub mod lockout;
pub mod memory;
pub mod password;
pub mod queries;
pub mod service;
pub mod store;

use thiserror::Error;

pub use service::{AuthService, AuthSettings, TokenPair};
pub use store::{CredentialStore, RefreshTokenLedger};

/// Authentication outcomes and failures.
///
/// The first group are expected outcomes of untrusted input; `DbError` and
/// `Internal` are infrastructure failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is locked. Try again in {minutes} minute(s)")]
    AccountLocked { minutes: i64 },

    #[error("Account is blocked")]
    AccountBlocked,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Suspicious token activity detected")]
    SuspiciousActivity,

    #[error("Insufficient access level")]
    InsufficientAccess,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// True for failures caused by the environment rather than the caller.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AuthError::DbError(_) | AuthError::Internal(_))
    }
}
