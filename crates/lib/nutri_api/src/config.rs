//! API server configuration.

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

use nutri_core::auth::jwt::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_DAYS, MAX_ACCESS_TOKEN_TTL_SECS,
    MAX_REFRESH_TOKEN_TTL_DAYS, resolve_jwt_secret, resolve_refresh_secret,
};
use nutri_core::auth::password::{BCRYPT_COST_RANGE, DEFAULT_BCRYPT_COST};
use nutri_core::auth::service::DEFAULT_REUSE_DETECTION_THRESHOLD;
use nutri_core::rate_limit::{MAX_WINDOW_SECS, RateLimitPolicy};
use tracing::warn;

/// Rate limit window shared by all route classes: 15 minutes.
const RATE_LIMIT_WINDOW_SECS: i64 = 15 * 60;

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:3100").
    pub bind_addr: String,
    /// PostgreSQL connection URL.
    pub pg_connection_url: String,
    /// Access token signing secret.
    pub jwt_secret: String,
    /// Refresh token signing secret.
    pub jwt_refresh_secret: String,
    pub access_token_ttl_secs: i64,
    pub refresh_token_ttl_days: i64,
    /// Server-wide secret appended to passwords before hashing.
    pub password_pepper: String,
    pub bcrypt_cost: u32,
    /// More than this many active refresh tokens in one family signals reuse.
    pub reuse_detection_threshold: u64,
    /// Mark auth cookies `Secure`.
    pub secure_cookies: bool,
    /// Login and registration.
    pub auth_rate_limit: RateLimitPolicy,
    /// Token refresh.
    pub refresh_rate_limit: RateLimitPolicy,
    /// Read-only endpoints.
    pub read_rate_limit: RateLimitPolicy,
}

impl ApiConfig {
    /// Defaults for everything except the signing secrets.
    pub fn with_secrets(jwt_secret: impl Into<String>, jwt_refresh_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: "127.0.0.1:3100".into(),
            pg_connection_url: "postgres://localhost:5432/nutrilog".into(),
            jwt_secret: jwt_secret.into(),
            jwt_refresh_secret: jwt_refresh_secret.into(),
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            refresh_token_ttl_days: DEFAULT_REFRESH_TOKEN_TTL_DAYS,
            password_pepper: String::new(),
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            reuse_detection_threshold: DEFAULT_REUSE_DETECTION_THRESHOLD,
            secure_cookies: true,
            auth_rate_limit: RateLimitPolicy::new(10, RATE_LIMIT_WINDOW_SECS),
            refresh_rate_limit: RateLimitPolicy::new(5, RATE_LIMIT_WINDOW_SECS),
            read_rate_limit: RateLimitPolicy::new(100, RATE_LIMIT_WINDOW_SECS),
        }
    }

    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                       | Default                                  |
    /// |--------------------------------|------------------------------------------|
    /// | `BIND_ADDR`                    | `127.0.0.1:3100`                         |
    /// | `DATABASE_URL`                 | `postgres://localhost:5432/nutrilog`     |
    /// | `JWT_SECRET` / `AUTH_SECRET`   | generated & persisted to file            |
    /// | `JWT_REFRESH_SECRET`           | access token secret                      |
    /// | `ACCESS_TOKEN_TTL_SECS`        | `900`                                    |
    /// | `REFRESH_TOKEN_TTL_DAYS`       | `30`                                     |
    /// | `PASSWORD_PEPPER`              | empty (warns)                            |
    /// | `BCRYPT_COST`                  | `10`                                     |
    /// | `REUSE_DETECTION_THRESHOLD`    | `2`                                      |
    /// | `SECURE_COOKIES`               | `true`                                   |
    /// | `AUTH_RATE_LIMIT_MAX`          | `10` per `RATE_LIMIT_WINDOW_SECS`        |
    /// | `REFRESH_RATE_LIMIT_MAX`       | `5`                                      |
    /// | `READ_RATE_LIMIT_MAX`          | `100`                                    |
    /// | `RATE_LIMIT_WINDOW_SECS`       | `900`                                    |
    ///
    /// Numeric settings outside their accepted range are ignored with a
    /// warning: TTLs and the window must be positive and at most one day
    /// (refresh TTL: 365 days), bcrypt cost must be 4 to 31.
    pub fn from_env() -> Self {
        let jwt_secret = resolve_jwt_secret();
        let jwt_refresh_secret = resolve_refresh_secret(&jwt_secret);
        let defaults = Self::with_secrets(jwt_secret, jwt_refresh_secret);

        let password_pepper = std::env::var("PASSWORD_PEPPER").unwrap_or_default();
        if password_pepper.is_empty() {
            warn!("PASSWORD_PEPPER not set, password hashes are unpeppered");
        }
        let window = env_in_range(
            "RATE_LIMIT_WINDOW_SECS",
            RATE_LIMIT_WINDOW_SECS,
            1..=MAX_WINDOW_SECS,
        );

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            pg_connection_url: std::env::var("DATABASE_URL").unwrap_or(defaults.pg_connection_url),
            access_token_ttl_secs: env_in_range(
                "ACCESS_TOKEN_TTL_SECS",
                defaults.access_token_ttl_secs,
                1..=MAX_ACCESS_TOKEN_TTL_SECS,
            ),
            refresh_token_ttl_days: env_in_range(
                "REFRESH_TOKEN_TTL_DAYS",
                defaults.refresh_token_ttl_days,
                1..=MAX_REFRESH_TOKEN_TTL_DAYS,
            ),
            password_pepper,
            bcrypt_cost: env_in_range("BCRYPT_COST", defaults.bcrypt_cost, BCRYPT_COST_RANGE),
            reuse_detection_threshold: env_or(
                "REUSE_DETECTION_THRESHOLD",
                defaults.reuse_detection_threshold,
            ),
            secure_cookies: env_or("SECURE_COOKIES", defaults.secure_cookies),
            auth_rate_limit: RateLimitPolicy::new(
                env_or("AUTH_RATE_LIMIT_MAX", defaults.auth_rate_limit.max_requests),
                window,
            ),
            refresh_rate_limit: RateLimitPolicy::new(
                env_or("REFRESH_RATE_LIMIT_MAX", defaults.refresh_rate_limit.max_requests),
                window,
            ),
            read_rate_limit: RateLimitPolicy::new(
                env_or("READ_RATE_LIMIT_MAX", defaults.read_rate_limit.max_requests),
                window,
            ),
            ..defaults
        }
    }
}

/// Parse an environment variable, keeping `default` when unset or malformed.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "ignoring malformed setting");
            default
        }),
        Err(_) => default,
    }
}

/// Like `env_or`, but a parsed value outside `range` also keeps `default`.
fn env_in_range<T>(name: &str, default: T, range: RangeInclusive<T>) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let value = env_or(name, default);
    if range.contains(&value) {
        value
    } else {
        warn!(
            variable = name,
            %value,
            min = %range.start(),
            max = %range.end(),
            "ignoring out-of-range setting"
        );
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_is_tighter_than_auth_and_read_is_loosest() {
        let config = ApiConfig::with_secrets("a", "r");
        assert!(config.refresh_rate_limit.max_requests < config.auth_rate_limit.max_requests);
        assert!(config.auth_rate_limit.max_requests < config.read_rate_limit.max_requests);
        assert!(config.secure_cookies);
    }

    #[test]
    fn malformed_values_fall_back_to_default() {
        temp_env_var("NUTRI_TEST_ENV_OR", "not-a-number", || {
            assert_eq!(env_or("NUTRI_TEST_ENV_OR", 7u32), 7);
        });
        temp_env_var("NUTRI_TEST_ENV_OR_OK", " 12 ", || {
            assert_eq!(env_or("NUTRI_TEST_ENV_OR_OK", 7u32), 12);
        });
    }

    #[test]
    fn out_of_range_values_fall_back_to_default() {
        temp_env_var("NUTRI_TEST_RANGE_ZERO", "0", || {
            assert_eq!(env_in_range("NUTRI_TEST_RANGE_ZERO", 900i64, 1..=86_400), 900);
        });
        temp_env_var("NUTRI_TEST_RANGE_HUGE", "4611686018427387903", || {
            assert_eq!(
                env_in_range("NUTRI_TEST_RANGE_HUGE", 30i64, 1..=MAX_REFRESH_TOKEN_TTL_DAYS),
                30
            );
        });
        temp_env_var("NUTRI_TEST_RANGE_COST", "3", || {
            assert_eq!(
                env_in_range("NUTRI_TEST_RANGE_COST", 10u32, BCRYPT_COST_RANGE),
                10
            );
        });
        temp_env_var("NUTRI_TEST_RANGE_OK", "60", || {
            assert_eq!(env_in_range("NUTRI_TEST_RANGE_OK", 900i64, 1..=86_400), 60);
        });
    }

    fn temp_env_var(name: &str, value: &str, f: impl FnOnce()) {
        // SAFETY: variable names are unique to these tests.
        unsafe { std::env::set_var(name, value) };
        f();
        unsafe { std::env::remove_var(name) };
    }
}
