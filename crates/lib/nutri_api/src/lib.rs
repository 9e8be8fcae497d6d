//! # nutri_api
//!
//! HTTP API for Nutrilog authentication: cookie sessions, CSRF protection and
//! rate limiting in front of `nutri_core::auth`.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use nutri_core::auth::{AuthService, CredentialStore, RefreshTokenLedger};
use nutri_core::rate_limit::{FixedWindowLimiter, RateLimitStore};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{auth, health, users};
use crate::middleware::auth::{AuthGate, require_auth};
use crate::middleware::csrf::verify_csrf;
use crate::middleware::rate_limit::rate_limit;

/// Access level required for admin routes.
pub const ADMIN_ACCESS_LEVEL: i32 = 2;

/// One limiter per route class.
#[derive(Clone, Debug)]
pub struct RateLimiters {
    /// Login and registration.
    pub auth: FixedWindowLimiter,
    /// Token refresh.
    pub refresh: FixedWindowLimiter,
    /// Read-only endpoints.
    pub read: FixedWindowLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &ApiConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self {
            auth: FixedWindowLimiter::new(
                "auth",
                config.auth_rate_limit,
                "Too many authentication attempts, please try again later",
                store.clone(),
            ),
            refresh: FixedWindowLimiter::new(
                "refresh",
                config.refresh_rate_limit,
                "Too many token refresh requests, please try again later",
                store.clone(),
            ),
            read: FixedWindowLimiter::new(
                "read",
                config.read_rate_limit,
                "Too many requests, please try again later",
                store,
            ),
        }
    }
}

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    /// API configuration.
    pub config: ApiConfig,
    pub limiters: RateLimiters,
}

impl AppState {
    /// Wire the auth service and limiters from configuration and stores.
    pub fn new(
        config: ApiConfig,
        users: Arc<dyn CredentialStore>,
        ledger: Arc<dyn RefreshTokenLedger>,
        rate_store: Arc<dyn RateLimitStore>,
    ) -> Self {
        let auth = services::auth::build_auth_service(&config, users, ledger);
        let limiters = RateLimiters::from_config(&config, rate_store);
        Self {
            auth: Arc::new(auth),
            config,
            limiters,
        }
    }
}

/// Builds the Axum router with all routes and shared state.
///
/// Guards run outermost first: rate limiter, then CSRF, then authentication.
pub fn router(state: AppState) -> Router {
    let limiters = state.limiters.clone();

    let read = Router::new()
        .route(routes::GET_API_HEALTH, get(health::health_handler))
        .route(routes::GET_AUTH_CSRF_TOKEN, get(auth::csrf_token_handler))
        .route(routes::GET_AUTH_STATUS, get(auth::auth_status_handler))
        .route_layer(from_fn_with_state(limiters.read.clone(), rate_limit));

    let credentials = Router::new()
        .route(routes::POST_AUTH_LOGIN, post(auth::login_handler))
        .route(routes::POST_AUTH_REGISTER, post(auth::register_handler))
        .route_layer(from_fn(verify_csrf))
        .route_layer(from_fn_with_state(limiters.auth.clone(), rate_limit));

    let refresh = Router::new()
        .route(routes::POST_AUTH_REFRESH, post(auth::refresh_handler))
        .route_layer(from_fn(verify_csrf))
        .route_layer(from_fn_with_state(limiters.refresh.clone(), rate_limit));

    let logout = Router::new()
        .route(routes::POST_AUTH_LOGOUT, post(auth::logout_handler))
        .route_layer(from_fn(verify_csrf));

    let logout_all = Router::new()
        .route(routes::POST_AUTH_LOGOUT_ALL, post(auth::logout_all_handler))
        .route_layer(from_fn_with_state(AuthGate::any(state.clone()), require_auth))
        .route_layer(from_fn(verify_csrf));

    let user_routes = Router::new()
        .route(routes::GET_USERS_ME, get(users::me_handler))
        .route_layer(from_fn_with_state(AuthGate::any(state.clone()), require_auth))
        .route_layer(from_fn_with_state(limiters.read.clone(), rate_limit));

    let admin_routes = Router::new()
        .route(routes::GET_ADMIN_USERS_ID, get(users::admin_user_handler))
        .route_layer(from_fn_with_state(
            AuthGate::at_level(state.clone(), ADMIN_ACCESS_LEVEL),
            require_auth,
        ))
        .route_layer(from_fn_with_state(limiters.read, rate_limit));

    Router::new()
        .merge(read)
        .merge(credentials)
        .merge(refresh)
        .merge(logout)
        .merge(logout_all)
        .merge(user_routes)
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
