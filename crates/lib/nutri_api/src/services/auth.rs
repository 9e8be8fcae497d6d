//! Authentication service glue: builds the core `AuthService` from config and
//! translates its results into cookies and response bodies.

use std::sync::Arc;

use axum_extra::extract::cookie::CookieJar;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Duration;
use nutri_core::auth::jwt::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_DAYS, MAX_ACCESS_TOKEN_TTL_SECS,
    MAX_REFRESH_TOKEN_TTL_DAYS, TokenCodec,
};
use nutri_core::auth::lockout::LockoutPolicy;
use nutri_core::auth::password::{BCRYPT_COST_RANGE, DEFAULT_BCRYPT_COST, PasswordHasher};
use nutri_core::auth::service::DEFAULT_ACCESS_LEVEL;
use nutri_core::auth::{AuthService, AuthSettings, CredentialStore, RefreshTokenLedger, TokenPair};
use nutri_core::models::auth::{User, UserProfile};
use tracing::warn;

use crate::config::ApiConfig;
use crate::error::{AppError, AppResult};
use crate::models::{LoginRequest, SessionResponse};
use crate::services::cookies::{access_cookie, refresh_cookie};

/// Build the process-wide `AuthService` from configuration and stores.
///
/// Out-of-range lifetimes or bcrypt cost fall back to their defaults.
pub fn build_auth_service(
    config: &ApiConfig,
    users: Arc<dyn CredentialStore>,
    ledger: Arc<dyn RefreshTokenLedger>,
) -> AuthService {
    let access_ttl = bounded_ttl(
        "access_token_ttl_secs",
        config.access_token_ttl_secs,
        MAX_ACCESS_TOKEN_TTL_SECS,
        Duration::try_seconds,
    )
    .unwrap_or_else(|| Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS));
    let refresh_ttl = bounded_ttl(
        "refresh_token_ttl_days",
        config.refresh_token_ttl_days,
        MAX_REFRESH_TOKEN_TTL_DAYS,
        Duration::try_days,
    )
    .unwrap_or_else(|| Duration::days(DEFAULT_REFRESH_TOKEN_TTL_DAYS));
    let codec = TokenCodec::new(
        config.jwt_secret.as_bytes(),
        config.jwt_refresh_secret.as_bytes(),
        access_ttl,
        refresh_ttl,
    );

    let cost = if BCRYPT_COST_RANGE.contains(&config.bcrypt_cost) {
        config.bcrypt_cost
    } else {
        warn!(cost = config.bcrypt_cost, "bcrypt cost out of range, using default");
        DEFAULT_BCRYPT_COST
    };
    let hasher = PasswordHasher::new(config.password_pepper.clone(), cost);
    let settings = AuthSettings {
        reuse_detection_threshold: config.reuse_detection_threshold,
        lockout: LockoutPolicy::default(),
        default_access_level: DEFAULT_ACCESS_LEVEL,
    };
    AuthService::new(users, ledger, codec, hasher, settings)
}

/// `value` converted when it lies in `1..=max` and fits a `Duration`.
fn bounded_ttl(
    name: &str,
    value: i64,
    max: i64,
    convert: fn(i64) -> Option<Duration>,
) -> Option<Duration> {
    let ttl = (1..=max).contains(&value).then(|| convert(value)).flatten();
    if ttl.is_none() {
        warn!(setting = name, value, "token lifetime out of range, using default");
    }
    ttl
}

/// Extract `(identifier, password)` from a login body, decoding base64 when
/// the client flagged it as encoded.
pub fn decode_credentials(body: &LoginRequest) -> AppResult<(String, String)> {
    if !body.encoded {
        return Ok((body.username.clone(), body.password.clone()));
    }
    Ok((decode_field(&body.username)?, decode_field(&body.password)?))
}

fn decode_field(value: &str) -> AppResult<String> {
    STANDARD
        .decode(value.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::Validation("Malformed encoded credentials".into()))
}

/// Add the access cookie and, when present, the refresh cookie for `pair`.
pub fn set_session_cookies(
    jar: CookieJar,
    auth: &AuthService,
    config: &ApiConfig,
    pair: &TokenPair,
) -> CookieJar {
    let codec = auth.codec();
    let jar = jar.add(access_cookie(
        &pair.access_token,
        codec.access_ttl().num_seconds(),
        config.secure_cookies,
    ));
    match &pair.refresh_token {
        Some(token) => jar.add(refresh_cookie(
            token,
            codec.refresh_ttl().num_seconds(),
            config.secure_cookies,
        )),
        None => jar,
    }
}

/// Body returned after a successful login or refresh.
pub fn session_response(auth: &AuthService, user: &User) -> SessionResponse {
    SessionResponse {
        user: UserProfile::from(user).into(),
        expires_in: auth.codec().access_ttl().num_seconds(),
    }
}
