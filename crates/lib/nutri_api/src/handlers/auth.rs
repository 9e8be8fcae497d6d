//! Authentication request handlers.

use axum::Json;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use nutri_core::auth::csrf::generate_token;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AuthenticatedUser, authenticate_request};
use crate::models::{
    AuthStatusResponse, AuthUser, CsrfTokenResponse, LoginRequest, LogoutResponse,
    RegisterRequest, SessionResponse,
};
use crate::services::auth::{decode_credentials, session_response, set_session_cookies};
use crate::services::cookies::{
    REFRESH_COOKIE, access_cookie, clear_session, cookie_value, csrf_cookie,
};

/// `GET /api/auth/csrf-token`: mint a CSRF token and mirror it into a cookie.
pub async fn csrf_token_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<CsrfTokenResponse>) {
    let token = generate_token();
    let jar = jar.add(csrf_cookie(&token, state.config.secure_cookies));
    (jar, Json(CsrfTokenResponse { csrf_token: token }))
}

/// `GET /api/auth/status`: report whether the caller is logged in, silently
/// refreshing the access token when only the refresh token is still good.
pub async fn auth_status_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> (CookieJar, Json<AuthStatusResponse>) {
    let unauthenticated = AuthStatusResponse {
        authenticated: false,
        user: None,
    };

    let session = match authenticate_request(&state, &jar, 0).await {
        Ok(session) => session,
        Err(_) => return (jar, Json(unauthenticated)),
    };
    let profile = match state.auth.profile(&session.user_id).await {
        Ok(Some(profile)) => profile,
        Ok(None) => return (jar, Json(unauthenticated)),
        Err(e) => {
            warn!(error = %e, "status lookup failed");
            return (jar, Json(unauthenticated));
        }
    };

    let jar = match &session.refreshed_access_token {
        Some(token) => jar.add(access_cookie(
            token,
            state.auth.codec().access_ttl().num_seconds(),
            state.config.secure_cookies,
        )),
        None => jar,
    };
    (
        jar,
        Json(AuthStatusResponse {
            authenticated: true,
            user: Some(profile.into()),
        }),
    )
}

/// `POST /api/auth/login`: authenticate with username-or-email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(body): Json<LoginRequest>,
) -> AppResult<(CookieJar, Json<SessionResponse>)> {
    let (identifier, password) = decode_credentials(&body)?;
    let (user, pair) = state.auth.login(&identifier, &password).await?;
    let jar = set_session_cookies(jar, &state.auth, &state.config, &pair);
    Ok((jar, Json(session_response(&state.auth, &user))))
}

/// `POST /api/auth/register`: create a new user account.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthUser>)> {
    let user = state
        .auth
        .register(&body.username, &body.email, &body.password)
        .await?;
    let profile = nutri_core::models::auth::UserProfile::from(&user);
    Ok((StatusCode::CREATED, Json(profile.into())))
}

/// `POST /api/auth/refresh`: rotate the refresh token cookie.
///
/// Any rejected token (expired, unknown, revoked, reused) answers 403 and
/// clears the session cookies so the client falls back to a fresh login.
pub async fn refresh_handler(State(state): State<AppState>, jar: CookieJar) -> AppResult<Response> {
    let secure = state.config.secure_cookies;
    let Some(token) = cookie_value(&jar, REFRESH_COOKIE) else {
        return Err(AppError::Forbidden("Please log in again".into()));
    };

    match state.auth.refresh(&token).await {
        Ok((user, pair)) => {
            let jar = set_session_cookies(jar, &state.auth, &state.config, &pair);
            Ok((jar, Json(session_response(&state.auth, &user))).into_response())
        }
        Err(e) if e.is_infrastructure() => Err(e.into()),
        Err(e) => {
            debug!(error = %e, "refresh rejected");
            let jar = clear_session(jar, secure);
            Ok((jar, AppError::Forbidden("Please log in again".into())).into_response())
        }
    }
}

/// `POST /api/auth/logout`: revoke the current refresh token and clear cookies.
///
/// Safe to repeat: an unknown or already-revoked token is not an error.
pub async fn logout_handler(
    State(state): State<AppState>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<LogoutResponse>)> {
    let token = cookie_value(&jar, REFRESH_COOKIE);
    state.auth.logout(token.as_deref()).await?;
    let jar = clear_session(jar, state.config.secure_cookies);
    Ok((
        jar,
        Json(LogoutResponse {
            success: true,
            revoked_sessions: None,
        }),
    ))
}

/// `POST /api/auth/logout-all`: revoke every session the caller holds.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<LogoutResponse>)> {
    let revoked = state.auth.logout_all(&user.user_id).await?;
    let jar = clear_session(jar, state.config.secure_cookies);
    Ok((
        jar,
        Json(LogoutResponse {
            success: true,
            revoked_sessions: Some(revoked),
        }),
    ))
}
