//! Rate limiting middleware: one fixed-window limiter per route class.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use nutri_core::rate_limit::{Decision, FixedWindowLimiter};
use tracing::warn;

use crate::error::AppError;

/// Key for requests without connection info (e.g. in-process tests).
const UNKNOWN_CLIENT: &str = "unknown";

/// Client address used as the limiter key.
fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Axum middleware: counts the request against `limiter` and answers 429 once
/// the window's maximum is exceeded.
///
/// A failing counter store lets the request through.
pub async fn rate_limit(
    State(limiter): State<FixedWindowLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let key = client_key(&request);
    match limiter.check(&key).await {
        Ok(Decision::Allowed { .. }) => Ok(next.run(request).await),
        Ok(Decision::Limited { retry_after_secs }) => {
            warn!(
                limiter = limiter.name(),
                client = %key,
                max_requests = limiter.policy().max_requests,
                "rate limit exceeded"
            );
            Err(AppError::RateLimited {
                message: limiter.message().to_string(),
                retry_after_secs,
            })
        }
        Err(e) => {
            warn!(limiter = limiter.name(), error = %e, "rate limit store unavailable");
            Ok(next.run(request).await)
        }
    }
}
