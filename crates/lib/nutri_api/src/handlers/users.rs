//! Protected user endpoints.

use axum::Json;
use axum::extract::{Extension, Path, State};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::AuthUser;

/// `GET /api/users/me`: the caller's own profile.
pub async fn me_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> AppResult<Json<AuthUser>> {
    let profile = state
        .auth
        .profile(&user.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("user".into()))?;
    Ok(Json(profile.into()))
}

/// `GET /api/admin/users/{id}`: any user's profile; admin access level only.
pub async fn admin_user_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<AuthUser>> {
    let profile = state
        .auth
        .profile(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id}")))?;
    Ok(Json(profile.into()))
}
