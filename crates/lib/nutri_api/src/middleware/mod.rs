//! Request middleware: rate limiting, CSRF, authentication.

pub mod auth;
pub mod csrf;
pub mod rate_limit;
