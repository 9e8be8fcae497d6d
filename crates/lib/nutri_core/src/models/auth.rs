//! Authentication domain models.
//!
//! These are internal domain models, distinct from the HTTP request/response
//! shapes in `nutri_api` (which use camelCase and hide sensitive fields).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Consecutive failed-login bookkeeping persisted on the user record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginAttempts {
    pub count: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Domain user, including the fields the auth core reads and mutates.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    /// Ordered access level; higher values unlock more routes.
    pub access_level: i32,
    pub is_blocked: bool,
    pub login_attempts: LoginAttempts,
}

/// Public view of a user (no hash, no lockout bookkeeping).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub email: String,
    pub access_level: i32,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            access_level: user.access_level,
        }
    }
}

/// A user about to be persisted. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub access_level: i32,
}

/// Refresh token record stored in the ledger.
///
/// Only the SHA-256 digest of the signed token is kept; `replaced_by_token`
/// holds the digest of the successor or one of the revocation sentinels.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub token_hash: String,
    pub user_id: String,
    pub family_id: String,
    pub expires_at: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token: Option<String>,
}

impl RefreshTokenRecord {
    /// Not revoked and not yet expired.
    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_revoked && self.expires_at > now
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID).
    pub sub: String,
    pub username: String,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// Subject (user ID).
    pub sub: String,
    #[serde(rename = "familyId")]
    pub family_id: String,
    /// Random token id; keeps two tokens minted in the same second distinct.
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
}

/// Every token this service signs, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TokenClaims {
    Access(AccessClaims),
    Refresh(RefreshClaims),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expires_in: Duration, revoked: bool) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id: "r1".into(),
            token_hash: "h".into(),
            user_id: "u1".into(),
            family_id: "f1".into(),
            expires_at: Utc::now() + expires_in,
            is_revoked: revoked,
            revoked_at: None,
            replaced_by_token: None,
        }
    }

    #[test]
    fn active_requires_unrevoked_and_unexpired() {
        assert!(record(Duration::minutes(5), false).is_active());
        assert!(!record(Duration::minutes(5), true).is_active());
        assert!(!record(Duration::minutes(-5), false).is_active());
    }

    #[test]
    fn claims_are_tagged_by_type() {
        let claims = TokenClaims::Refresh(RefreshClaims {
            sub: "u1".into(),
            family_id: "fam".into(),
            jti: "j".into(),
            exp: 10,
            iat: 1,
        });
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["type"], "refresh");
        assert_eq!(json["familyId"], "fam");
        assert_eq!(serde_json::from_value::<TokenClaims>(json).unwrap(), claims);
    }
}
