//! Storage interfaces for the auth core.
//!
//! Both stores are accessed through single-row atomic operations; nothing in
//! the auth core needs a multi-statement transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::AuthError;
use super::lockout::LockoutPolicy;
use crate::models::auth::{LoginAttempts, NewUser, RefreshTokenRecord, User};

/// `replaced_by_token` marker for tokens revoked because their family was compromised.
pub const FAMILY_REVOKED_SENTINEL: &str = "family-revoked";

/// `replaced_by_token` marker for tokens revoked by a logout-everywhere.
pub const LOGOUT_ALL_SENTINEL: &str = "logout-all";

/// True when `replaced_by_token` names a real successor rather than a sentinel.
pub fn is_successor(replaced_by: Option<&str>) -> bool {
    matches!(replaced_by, Some(r) if r != FAMILY_REVOKED_SENTINEL && r != LOGOUT_ALL_SENTINEL)
}

/// Persistent user records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up by username or email, case-insensitively.
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AuthError>;

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, AuthError>;

    /// Apply `policy` to the user's lockout state for a failed login at `now`
    /// as one atomic step, returning the state as stored. Concurrent failures
    /// must each be counted. `None` when the user is unknown.
    async fn record_failed_login(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginAttempts>, AuthError>;

    /// Overwrite the user's lockout bookkeeping. Used to clear it after a
    /// successful login.
    async fn update_lockout_state(
        &self,
        user_id: &str,
        attempts: &LoginAttempts,
    ) -> Result<(), AuthError>;

    /// Persist a new user. Duplicate username or email is a `ValidationError`.
    async fn save(&self, user: NewUser) -> Result<User, AuthError>;
}

/// Append-mostly store of issued refresh tokens, keyed by token digest.
#[async_trait]
pub trait RefreshTokenLedger: Send + Sync {
    /// Insert a new active record.
    async fn issue(
        &self,
        token_hash: &str,
        user_id: &str,
        family_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, AuthError>;

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AuthError>;

    /// Revoke one token, recording its successor. Already-revoked tokens keep
    /// their original revocation data.
    async fn revoke(&self, token_hash: &str, replaced_by: Option<&str>)
    -> Result<(), AuthError>;

    /// Revoke every active token in a family. Returns the number revoked.
    async fn revoke_family(&self, user_id: &str, family_id: &str) -> Result<u64, AuthError>;

    /// Revoke every active token a user holds. Returns the number revoked.
    async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64, AuthError>;

    /// Count unrevoked, unexpired tokens in a family.
    async fn count_active_in_family(
        &self,
        user_id: &str,
        family_id: &str,
    ) -> Result<u64, AuthError>;

    /// Delete records past their expiry. Returns the number removed.
    async fn purge_expired(&self) -> Result<u64, AuthError>;

    /// True when the family holds more than `threshold` active tokens.
    async fn detect_suspicious_activity(
        &self,
        user_id: &str,
        family_id: &str,
        threshold: u64,
    ) -> Result<bool, AuthError> {
        Ok(self.count_active_in_family(user_id, family_id).await? > threshold)
    }
}
