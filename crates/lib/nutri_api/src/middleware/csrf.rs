//! CSRF middleware: double-submit cookie check for state-changing requests.

use axum::{
    extract::Request,
    http::Method,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use nutri_core::auth::csrf::tokens_match;
use tracing::warn;

use crate::error::AppError;
use crate::services::cookies::{CSRF_COOKIE, CSRF_HEADER};

/// Methods that never change state and skip the check.
fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Axum middleware: rejects mutating requests whose `x-csrf-token` header does
/// not equal the `csrf_token` cookie.
pub async fn verify_csrf(jar: CookieJar, request: Request, next: Next) -> Result<Response, AppError> {
    if is_safe(request.method()) {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok());
    let valid = match (jar.get(CSRF_COOKIE), header) {
        (Some(cookie), Some(header)) => tokens_match(cookie.value(), header),
        _ => false,
    };

    if !valid {
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "CSRF token missing or mismatched"
        );
        return Err(AppError::CsrfMismatch);
    }

    Ok(next.run(request).await)
}
