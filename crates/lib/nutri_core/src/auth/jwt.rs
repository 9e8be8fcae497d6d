//! JWT token signing and verification.

use std::path::PathBuf;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::{info, warn};

use super::AuthError;
use crate::models::auth::{AccessClaims, RefreshClaims, TokenClaims};

/// Default access token lifetime: 15 minutes.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Default refresh token lifetime: 30 days.
pub const DEFAULT_REFRESH_TOKEN_TTL_DAYS: i64 = 30;

/// Longest accepted access token lifetime: one day.
pub const MAX_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Longest accepted refresh token lifetime: one year.
pub const MAX_REFRESH_TOKEN_TTL_DAYS: i64 = 365;

/// Signs and verifies access and refresh tokens (HS256).
///
/// The two token kinds use independent secrets and lifetimes.
#[derive(Clone)]
pub struct TokenCodec {
    access_secret: Vec<u8>,
    refresh_secret: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn new(
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            access_secret: access_secret.to_vec(),
            refresh_secret: refresh_secret.to_vec(),
            access_ttl,
            refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign an access token for `user_id` / `username`.
    pub fn sign_access(&self, user_id: &str, username: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = TokenClaims::Access(AccessClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
        });
        sign(&claims, &self.access_secret)
    }

    /// Sign a refresh token bound to a token family.
    pub fn sign_refresh(&self, user_id: &str, family_id: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = TokenClaims::Refresh(RefreshClaims {
            sub: user_id.to_string(),
            family_id: family_id.to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
            exp: (now + self.refresh_ttl).timestamp(),
            iat: now.timestamp(),
        });
        sign(&claims, &self.refresh_secret)
    }

    /// Verify an access token. A refresh token presented here is rejected.
    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        match verify(token, &self.access_secret)? {
            TokenClaims::Access(claims) => Ok(claims),
            TokenClaims::Refresh(_) => Err(AuthError::TokenInvalid),
        }
    }

    /// Verify a refresh token. An access token presented here is rejected.
    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        match verify(token, &self.refresh_secret)? {
            TokenClaims::Refresh(claims) => Ok(claims),
            TokenClaims::Access(_) => Err(AuthError::TokenInvalid),
        }
    }
}

fn sign(claims: &TokenClaims, secret: &[u8]) -> Result<String, AuthError> {
    encode(&Header::default(), claims, &EncodingKey::from_secret(secret))
        .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))
}

/// Verify a token's signature and expiry, returning the decoded claims.
pub fn verify(token: &str, secret: &[u8]) -> Result<TokenClaims, AuthError> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::default();
    validation.validate_exp = true;
    validation.leeway = 0;
    decode::<TokenClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::TokenInvalid,
        })
}

/// Resolve the access token secret: env var `JWT_SECRET` → `AUTH_SECRET` → persisted file.
pub fn resolve_jwt_secret() -> String {
    if let Some(secret) = non_empty_env("JWT_SECRET") {
        return secret;
    }
    if let Some(secret) = non_empty_env("AUTH_SECRET") {
        return secret;
    }
    // Generate and persist
    let secret_path = jwt_secret_path();
    if let Ok(existing) = std::fs::read_to_string(&secret_path) {
        let trimmed = existing.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let secret: String = rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect();
    if let Some(parent) = secret_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(&secret_path, &secret);
    info!(path = %secret_path.display(), "generated new JWT secret");
    secret
}

/// Resolve the refresh token secret from `JWT_REFRESH_SECRET`, falling back to
/// the access secret.
pub fn resolve_refresh_secret(access_secret: &str) -> String {
    match non_empty_env("JWT_REFRESH_SECRET") {
        Some(secret) => secret,
        None => {
            warn!("JWT_REFRESH_SECRET not set, refresh tokens share the access token secret");
            access_secret.to_string()
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Path to the persisted JWT secret file.
fn jwt_secret_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nutrilog")
        .join("jwt-secret")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(
            b"access-secret",
            b"refresh-secret",
            Duration::minutes(15),
            Duration::days(30),
        )
    }

    #[test]
    fn access_token_roundtrip() {
        let codec = codec();
        let token = codec.sign_access("u1", "alice").unwrap();
        let claims = codec.verify_access(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn refresh_tokens_in_same_family_are_distinct() {
        let codec = codec();
        let a = codec.sign_refresh("u1", "fam").unwrap();
        let b = codec.sign_refresh("u1", "fam").unwrap();
        assert_ne!(a, b);
        assert_eq!(codec.verify_refresh(&a).unwrap().family_id, "fam");
    }

    #[test]
    fn token_kinds_are_not_interchangeable() {
        let shared = TokenCodec::new(b"s", b"s", Duration::minutes(1), Duration::days(1));
        let access = shared.sign_access("u1", "alice").unwrap();
        let refresh = shared.sign_refresh("u1", "fam").unwrap();
        assert!(matches!(
            shared.verify_refresh(&access),
            Err(AuthError::TokenInvalid)
        ));
        assert!(matches!(
            shared.verify_access(&refresh),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn secrets_are_independent() {
        let codec = codec();
        let refresh = codec.sign_refresh("u1", "fam").unwrap();
        assert!(matches!(
            verify(&refresh, b"access-secret"),
            Err(AuthError::TokenInvalid)
        ));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let codec = TokenCodec::new(b"a", b"r", Duration::seconds(-120), Duration::days(1));
        let token = codec.sign_access("u1", "alice").unwrap();
        assert!(matches!(
            codec.verify_access(&token),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(
            codec().verify_access("not.a.jwt"),
            Err(AuthError::TokenInvalid)
        ));
    }
}
