//! Cookie service: set/get/clear auth and CSRF cookies.
//!
//! | Cookie         | HttpOnly | Path        | Lifetime        |
//! |----------------|----------|-------------|-----------------|
//! | `accessToken`  | yes      | `/`         | access TTL      |
//! | `refreshToken` | yes      | `/api/auth` | refresh TTL     |
//! | `csrf_token`   | no       | `/`         | browser session |
//!
//! All are `SameSite=Strict` and `Secure` unless secure cookies are disabled
//! for local plain-HTTP development.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration;

use crate::routes::AUTH_SCOPE;

/// Cookie name for the access token.
pub const ACCESS_COOKIE: &str = "accessToken";
/// Cookie name for the refresh token.
pub const REFRESH_COOKIE: &str = "refreshToken";
/// Cookie name for the CSRF token (readable by page scripts).
pub const CSRF_COOKIE: &str = "csrf_token";
/// Header that must echo the CSRF cookie on mutating requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

fn base(name: &'static str, value: String, path: &'static str, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Strict)
        .path(path)
        .build()
}

/// Build a httpOnly cookie for the access token.
pub fn access_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    let mut cookie = base(ACCESS_COOKIE, token.to_string(), "/", secure);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie
}

/// Build a httpOnly cookie for the refresh token, scoped to the auth routes.
pub fn refresh_cookie(token: &str, max_age_secs: i64, secure: bool) -> Cookie<'static> {
    let mut cookie = base(REFRESH_COOKIE, token.to_string(), AUTH_SCOPE, secure);
    cookie.set_max_age(Duration::seconds(max_age_secs));
    cookie
}

/// Build the script-readable CSRF cookie. No max-age: it lives for the browser session.
pub fn csrf_cookie(token: &str, secure: bool) -> Cookie<'static> {
    let mut cookie = base(CSRF_COOKIE, token.to_string(), "/", secure);
    cookie.set_http_only(false);
    cookie
}

/// Build expired cookie to clear the access token.
pub fn clear_access_cookie(secure: bool) -> Cookie<'static> {
    access_cookie("", 0, secure)
}

/// Build expired cookie to clear the refresh token.
pub fn clear_refresh_cookie(secure: bool) -> Cookie<'static> {
    refresh_cookie("", 0, secure)
}

/// Add expiring access and refresh cookies to `jar`.
pub fn clear_session(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(clear_access_cookie(secure))
        .add(clear_refresh_cookie(secure))
}

/// Read a cookie's value, treating empty values as absent.
pub fn cookie_value(jar: &CookieJar, name: &str) -> Option<String> {
    jar.get(name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_cookie_is_scoped_to_auth_routes() {
        let c = refresh_cookie("t", 60, true);
        assert_eq!(c.path(), Some("/api/auth"));
        assert_eq!(c.http_only(), Some(true));
        assert_eq!(c.secure(), Some(true));
        assert_eq!(c.same_site(), Some(SameSite::Strict));
        assert_eq!(c.max_age(), Some(Duration::seconds(60)));
    }

    #[test]
    fn csrf_cookie_is_readable_by_scripts() {
        let c = csrf_cookie("t", true);
        assert_eq!(c.http_only(), Some(false));
        assert_eq!(c.path(), Some("/"));
        assert_eq!(c.max_age(), None);
        let header = c.to_string();
        assert!(header.contains("SameSite=Strict"));
        assert!(header.contains("Secure"));
        assert!(!header.contains("HttpOnly"));
    }

    #[test]
    fn clearing_keeps_the_original_path() {
        let c = clear_refresh_cookie(true);
        assert_eq!(c.path(), Some("/api/auth"));
        assert_eq!(c.max_age(), Some(Duration::ZERO));
        assert_eq!(c.value(), "");
    }
}
