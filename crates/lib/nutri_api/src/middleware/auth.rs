//! Authentication middleware: cookie token verification, silent refresh and
//! access-level gating.

use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use nutri_core::auth::AuthError;
use nutri_core::auth::service::Session;
use tracing::debug;

use crate::AppState;
use crate::error::AppError;
use crate::services::cookies::{ACCESS_COOKIE, REFRESH_COOKIE, access_cookie, cookie_value};

/// Identity stored in request extensions for downstream handlers.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub username: String,
}

/// Middleware state: the app plus the minimum access level this gate enforces.
#[derive(Clone)]
pub struct AuthGate {
    pub state: AppState,
    pub min_access_level: i32,
}

impl AuthGate {
    /// Admit any authenticated user.
    pub fn any(state: AppState) -> Self {
        Self::at_level(state, 0)
    }

    pub fn at_level(state: AppState, min_access_level: i32) -> Self {
        Self {
            state,
            min_access_level,
        }
    }
}

/// Establish the caller's session from cookies and check its access level.
///
/// Every failure other than a blocked account or an insufficient level is
/// reported as 401, infrastructure errors included.
pub async fn authenticate_request(
    state: &AppState,
    jar: &CookieJar,
    min_access_level: i32,
) -> Result<Session, AppError> {
    let access = cookie_value(jar, ACCESS_COOKIE);
    let refresh = cookie_value(jar, REFRESH_COOKIE);

    let session = state
        .auth
        .authenticate(access.as_deref(), refresh.as_deref())
        .await
        .map_err(|e| {
            debug!(error = %e, "authentication failed");
            AppError::Unauthorized("Authentication required".into())
        })?;

    state
        .auth
        .authorize(&session.user_id, min_access_level)
        .await
        .map_err(|e| match e {
            AuthError::AccountBlocked | AuthError::InsufficientAccess => AppError::from(e),
            other => {
                debug!(error = %other, "authorization failed");
                AppError::Unauthorized("Authentication required".into())
            }
        })?;

    Ok(session)
}

fn sets_cookie(response: &Response, name: &str) -> bool {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.strip_prefix(name).is_some_and(|rest| rest.starts_with('=')))
}

/// Axum middleware: authenticates from cookies, injects `AuthenticatedUser`
/// and, after a silent refresh, sets the new access token cookie.
pub async fn require_auth(
    State(gate): State<AuthGate>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session = match authenticate_request(&gate.state, &jar, gate.min_access_level).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    request.extensions_mut().insert(AuthenticatedUser {
        user_id: session.user_id.clone(),
        username: session.username.clone(),
    });
    let response = next.run(request).await;

    match session.refreshed_access_token {
        // A handler that already set or cleared the access cookie wins.
        Some(_) if sets_cookie(&response, ACCESS_COOKIE) => response,
        Some(token) => {
            let cookie = access_cookie(
                &token,
                gate.state.auth.codec().access_ttl().num_seconds(),
                gate.state.config.secure_cookies,
            );
            (jar.add(cookie), response).into_response()
        }
        None => response,
    }
}
