//! In-process implementations of the auth stores.
//!
//! Used by tests and by the server's `--in-memory` development mode. State is
//! lost on restart and is not shared between processes.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::AuthError;
use super::lockout::LockoutPolicy;
use super::store::{
    CredentialStore, FAMILY_REVOKED_SENTINEL, LOGOUT_ALL_SENTINEL, RefreshTokenLedger,
};
use crate::models::auth::{LoginAttempts, NewUser, RefreshTokenRecord, User};
use crate::uuid::uuidv7;

fn poisoned<T>(_: T) -> AuthError {
    AuthError::Internal("user store lock poisoned".into())
}

/// Users keyed by ID behind a single lock, so uniqueness checks and inserts
/// happen atomically.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, User>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Change a user's blocked flag. Returns false when the user is unknown.
    pub fn set_blocked(&self, user_id: &str, blocked: bool) -> Result<bool, AuthError> {
        let mut users = self.users.write().map_err(poisoned)?;
        Ok(users
            .get_mut(user_id)
            .map(|u| u.is_blocked = blocked)
            .is_some())
    }

    /// Change a user's access level. Returns false when the user is unknown.
    pub fn set_access_level(&self, user_id: &str, level: i32) -> Result<bool, AuthError> {
        let mut users = self.users.write().map_err(poisoned)?;
        Ok(users
            .get_mut(user_id)
            .map(|u| u.access_level = level)
            .is_some())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AuthError> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users
            .values()
            .find(|u| {
                u.username.eq_ignore_ascii_case(identifier)
                    || u.email.eq_ignore_ascii_case(identifier)
            })
            .cloned())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        let users = self.users.read().map_err(poisoned)?;
        Ok(users.get(user_id).cloned())
    }

    async fn record_failed_login(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginAttempts>, AuthError> {
        let mut users = self.users.write().map_err(poisoned)?;
        Ok(users.get_mut(user_id).map(|user| {
            user.login_attempts = policy.record_failure(&user.login_attempts, now);
            user.login_attempts.clone()
        }))
    }

    async fn update_lockout_state(
        &self,
        user_id: &str,
        attempts: &LoginAttempts,
    ) -> Result<(), AuthError> {
        let mut users = self.users.write().map_err(poisoned)?;
        if let Some(user) = users.get_mut(user_id) {
            user.login_attempts = attempts.clone();
        }
        Ok(())
    }

    async fn save(&self, user: NewUser) -> Result<User, AuthError> {
        let mut users = self.users.write().map_err(poisoned)?;
        let taken = users.values().any(|u| {
            u.username.eq_ignore_ascii_case(&user.username)
                || u.email.eq_ignore_ascii_case(&user.email)
        });
        if taken {
            return Err(AuthError::ValidationError(
                "Username or email already registered".into(),
            ));
        }
        let record = User {
            id: uuidv7().to_string(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            access_level: user.access_level,
            is_blocked: false,
            login_attempts: LoginAttempts::default(),
        };
        users.insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

/// Refresh token ledger keyed by token digest.
#[derive(Debug, Default)]
pub struct MemoryRefreshTokenLedger {
    tokens: DashMap<String, RefreshTokenRecord>,
}

impl MemoryRefreshTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records for a family, active or not.
    pub fn family(&self, family_id: &str) -> Vec<RefreshTokenRecord> {
        self.tokens
            .iter()
            .filter(|r| r.family_id == family_id)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    fn revoke_where(
        &self,
        sentinel: &str,
        matches: impl Fn(&RefreshTokenRecord) -> bool,
    ) -> u64 {
        let now = Utc::now();
        let mut revoked = 0;
        for mut entry in self.tokens.iter_mut() {
            let record = entry.value_mut();
            if !record.is_revoked && matches(&*record) {
                record.is_revoked = true;
                record.revoked_at = Some(now);
                record.replaced_by_token = Some(sentinel.to_string());
                revoked += 1;
            }
        }
        revoked
    }
}

#[async_trait]
impl RefreshTokenLedger for MemoryRefreshTokenLedger {
    async fn issue(
        &self,
        token_hash: &str,
        user_id: &str,
        family_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, AuthError> {
        let record = RefreshTokenRecord {
            id: uuidv7().to_string(),
            token_hash: token_hash.to_string(),
            user_id: user_id.to_string(),
            family_id: family_id.to_string(),
            expires_at,
            is_revoked: false,
            revoked_at: None,
            replaced_by_token: None,
        };
        match self.tokens.entry(token_hash.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(AuthError::Internal(
                "duplicate refresh token hash".into(),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        Ok(self.tokens.get(token_hash).map(|r| r.value().clone()))
    }

    async fn revoke(
        &self,
        token_hash: &str,
        replaced_by: Option<&str>,
    ) -> Result<(), AuthError> {
        if let Some(mut record) = self.tokens.get_mut(token_hash)
            && !record.is_revoked
        {
            record.is_revoked = true;
            record.revoked_at = Some(Utc::now());
            record.replaced_by_token = replaced_by.map(str::to_string);
        }
        Ok(())
    }

    async fn revoke_family(&self, user_id: &str, family_id: &str) -> Result<u64, AuthError> {
        Ok(self.revoke_where(FAMILY_REVOKED_SENTINEL, |r| {
            r.user_id == user_id && r.family_id == family_id
        }))
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64, AuthError> {
        Ok(self.revoke_where(LOGOUT_ALL_SENTINEL, |r| r.user_id == user_id))
    }

    async fn count_active_in_family(
        &self,
        user_id: &str,
        family_id: &str,
    ) -> Result<u64, AuthError> {
        let now = Utc::now();
        Ok(self
            .tokens
            .iter()
            .filter(|r| r.user_id == user_id && r.family_id == family_id && r.is_active_at(now))
            .count() as u64)
    }

    async fn purge_expired(&self) -> Result<u64, AuthError> {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, r| r.expires_at > now);
        Ok(before.saturating_sub(self.tokens.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.into(),
            email: email.into(),
            password_hash: "hash".into(),
            access_level: 1,
        }
    }

    #[tokio::test]
    async fn identifier_lookup_is_case_insensitive() {
        let store = MemoryCredentialStore::new();
        let saved = store.save(new_user("Alice", "alice@example.com")).await.unwrap();
        let by_name = store.find_by_identifier("ALICE").await.unwrap().unwrap();
        let by_email = store
            .find_by_identifier("Alice@Example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, saved.id);
        assert_eq!(by_email.id, saved.id);
    }

    #[tokio::test]
    async fn failed_logins_are_applied_in_place() {
        let store = MemoryCredentialStore::new();
        let saved = store.save(new_user("alice", "a@example.com")).await.unwrap();
        let policy = LockoutPolicy::default();
        let now = Utc::now();

        for expected in 1..=5 {
            let attempts = store
                .record_failed_login(&saved.id, &policy, now)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(attempts.count, expected);
        }
        let locked = store
            .record_failed_login(&saved.id, &policy, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(locked.count, 5);
        assert_eq!(locked.locked_until, Some(now + policy.lock_duration));
        assert!(
            store
                .record_failed_login("missing", &policy, now)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_username_or_email_is_rejected() {
        let store = MemoryCredentialStore::new();
        store.save(new_user("alice", "a@example.com")).await.unwrap();
        let dup_name = store.save(new_user("ALICE", "other@example.com")).await;
        let dup_email = store.save(new_user("bob", "A@example.com")).await;
        assert!(matches!(dup_name, Err(AuthError::ValidationError(_))));
        assert!(matches!(dup_email, Err(AuthError::ValidationError(_))));
    }

    #[tokio::test]
    async fn revoke_keeps_first_successor() {
        let ledger = MemoryRefreshTokenLedger::new();
        let expires = Utc::now() + Duration::days(1);
        ledger.issue("t1", "u1", "f1", expires).await.unwrap();
        ledger.revoke("t1", Some("t2")).await.unwrap();
        ledger.revoke("t1", Some("t3")).await.unwrap();
        let record = ledger.find("t1").await.unwrap().unwrap();
        assert!(!record.is_active());
        assert_eq!(record.replaced_by_token.as_deref(), Some("t2"));
    }

    #[tokio::test]
    async fn family_revocation_is_scoped() {
        let ledger = MemoryRefreshTokenLedger::new();
        let expires = Utc::now() + Duration::days(1);
        ledger.issue("a1", "u1", "fa", expires).await.unwrap();
        ledger.issue("a2", "u1", "fa", expires).await.unwrap();
        ledger.issue("b1", "u1", "fb", expires).await.unwrap();

        assert_eq!(ledger.revoke_family("u1", "fa").await.unwrap(), 2);
        assert_eq!(ledger.count_active_in_family("u1", "fa").await.unwrap(), 0);
        assert_eq!(ledger.count_active_in_family("u1", "fb").await.unwrap(), 1);
        let a1 = ledger.find("a1").await.unwrap().unwrap();
        assert_eq!(
            a1.replaced_by_token.as_deref(),
            Some(FAMILY_REVOKED_SENTINEL)
        );
    }

    #[tokio::test]
    async fn revoke_all_marks_logout_sentinel() {
        let ledger = MemoryRefreshTokenLedger::new();
        let expires = Utc::now() + Duration::days(1);
        ledger.issue("a1", "u1", "fa", expires).await.unwrap();
        ledger.issue("b1", "u1", "fb", expires).await.unwrap();
        ledger.issue("c1", "u2", "fc", expires).await.unwrap();

        assert_eq!(ledger.revoke_all_for_user("u1").await.unwrap(), 2);
        let b1 = ledger.find("b1").await.unwrap().unwrap();
        assert_eq!(b1.replaced_by_token.as_deref(), Some(LOGOUT_ALL_SENTINEL));
        assert!(ledger.find("c1").await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn suspicious_only_above_threshold() {
        let ledger = MemoryRefreshTokenLedger::new();
        let expires = Utc::now() + Duration::days(1);
        ledger.issue("t1", "u1", "f", expires).await.unwrap();
        ledger.issue("t2", "u1", "f", expires).await.unwrap();
        assert!(!ledger.detect_suspicious_activity("u1", "f", 2).await.unwrap());
        ledger.issue("t3", "u1", "f", expires).await.unwrap();
        assert!(ledger.detect_suspicious_activity("u1", "f", 2).await.unwrap());
    }

    #[tokio::test]
    async fn expired_tokens_are_inactive_and_purged() {
        let ledger = MemoryRefreshTokenLedger::new();
        ledger
            .issue("old", "u1", "f", Utc::now() - Duration::seconds(1))
            .await
            .unwrap();
        ledger
            .issue("new", "u1", "f", Utc::now() + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(ledger.count_active_in_family("u1", "f").await.unwrap(), 1);
        assert_eq!(ledger.purge_expired().await.unwrap(), 1);
        assert!(ledger.find("old").await.unwrap().is_none());
        assert_eq!(ledger.len(), 1);
    }
}
