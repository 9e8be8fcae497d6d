//! Route paths.

pub const GET_API_HEALTH: &str = "/api/health";
pub const GET_AUTH_CSRF_TOKEN: &str = "/api/auth/csrf-token";
pub const GET_AUTH_STATUS: &str = "/api/auth/status";
pub const POST_AUTH_LOGIN: &str = "/api/auth/login";
pub const POST_AUTH_REGISTER: &str = "/api/auth/register";
pub const POST_AUTH_REFRESH: &str = "/api/auth/refresh";
pub const POST_AUTH_LOGOUT: &str = "/api/auth/logout";
pub const POST_AUTH_LOGOUT_ALL: &str = "/api/auth/logout-all";
pub const GET_USERS_ME: &str = "/api/users/me";
pub const GET_ADMIN_USERS_ID: &str = "/api/admin/users/{id}";

/// Path scope of the refresh token cookie; covers every auth route.
pub const AUTH_SCOPE: &str = "/api/auth";
