//! Authentication service: login, token issuance with rotation, silent
//! refresh, authorization and logout.
//!
//! One `AuthService` is built per process and shared by reference. All session
//! truth lives in the stores and in the signed tokens; the service itself holds
//! no mutable state.

use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::AuthError;
use super::jwt::TokenCodec;
use super::lockout::{FailureOutcome, LockoutPolicy};
use super::password::PasswordHasher;
use super::store::{CredentialStore, RefreshTokenLedger, is_successor};
use crate::models::auth::{NewUser, RefreshClaims, RefreshTokenRecord, User, UserProfile};

/// Active tokens a family may hold before it is treated as compromised.
pub const DEFAULT_REUSE_DETECTION_THRESHOLD: u64 = 2;

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Access level given to newly registered users.
pub const DEFAULT_ACCESS_LEVEL: i32 = 1;

/// Tunables for `AuthService`.
#[derive(Debug, Clone, Copy)]
pub struct AuthSettings {
    /// More than this many active tokens in one family signals reuse.
    pub reuse_detection_threshold: u64,
    pub lockout: LockoutPolicy,
    pub default_access_level: i32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            reuse_detection_threshold: DEFAULT_REUSE_DETECTION_THRESHOLD,
            lockout: LockoutPolicy::default(),
            default_access_level: DEFAULT_ACCESS_LEVEL,
        }
    }
}

/// A freshly minted access token and, when the chain was touched, its refresh token.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Identity established for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub username: String,
    /// Set when the access token was re-minted from the refresh token.
    pub refreshed_access_token: Option<String>,
}

/// SHA-256 hex digest of a refresh token, the form kept in the ledger.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Random identifier for a new token family.
fn new_family_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub struct AuthService {
    users: Arc<dyn CredentialStore>,
    ledger: Arc<dyn RefreshTokenLedger>,
    codec: TokenCodec,
    hasher: PasswordHasher,
    settings: AuthSettings,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("codec", &self.codec)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(
        users: Arc<dyn CredentialStore>,
        ledger: Arc<dyn RefreshTokenLedger>,
        codec: TokenCodec,
        hasher: PasswordHasher,
        settings: AuthSettings,
    ) -> Self {
        Self {
            users,
            ledger,
            codec,
            hasher,
            settings,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    // -----------------------------------------------------------------------
    // Token issuance
    // -----------------------------------------------------------------------

    /// Mint an access token and, when `rotate` is set, a refresh token.
    ///
    /// With `old_refresh_token` the new refresh token continues that token's
    /// family and the old one is revoked in favour of it; a family showing
    /// signs of reuse is revoked as a whole and `SuspiciousActivity` returned.
    /// Without it a new family is started.
    pub async fn issue_tokens(
        &self,
        user: &User,
        old_refresh_token: Option<&str>,
        rotate: bool,
    ) -> Result<TokenPair, AuthError> {
        let access_token = self.codec.sign_access(&user.id, &user.username)?;
        if !rotate {
            return Ok(TokenPair {
                access_token,
                refresh_token: None,
            });
        }

        let old_hash = old_refresh_token.map(hash_refresh_token);
        let family_id = match &old_hash {
            Some(hash) => {
                let record = self
                    .ledger
                    .find(hash)
                    .await?
                    .filter(|r| r.user_id == user.id)
                    .ok_or(AuthError::TokenInvalid)?;
                self.guard_family(&record).await?;
                record.family_id
            }
            None => new_family_id(),
        };

        let refresh_token = self.codec.sign_refresh(&user.id, &family_id)?;
        let new_hash = hash_refresh_token(&refresh_token);
        let expires_at = Utc::now() + self.codec.refresh_ttl();
        self.ledger
            .issue(&new_hash, &user.id, &family_id, expires_at)
            .await?;

        if let Some(old) = &old_hash {
            self.ledger.revoke(old, Some(&new_hash)).await?;
            debug!(user_id = %user.id, family_id = %family_id, "refresh token rotated");
        } else {
            debug!(user_id = %user.id, family_id = %family_id, "token family started");
        }

        Ok(TokenPair {
            access_token,
            refresh_token: Some(refresh_token),
        })
    }

    /// Revoke the family and fail when `record` shows the chain was forked.
    async fn guard_family(&self, record: &RefreshTokenRecord) -> Result<(), AuthError> {
        let replayed = record.is_revoked && is_successor(record.replaced_by_token.as_deref());
        let crowded = !replayed
            && self
                .ledger
                .detect_suspicious_activity(
                    &record.user_id,
                    &record.family_id,
                    self.settings.reuse_detection_threshold,
                )
                .await?;
        if replayed || crowded {
            let revoked = self
                .ledger
                .revoke_family(&record.user_id, &record.family_id)
                .await?;
            warn!(
                user_id = %record.user_id,
                family_id = %record.family_id,
                replayed,
                revoked,
                "refresh token reuse detected, token family revoked"
            );
            return Err(AuthError::SuspiciousActivity);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Login / registration
    // -----------------------------------------------------------------------

    /// Authenticate with username-or-email + password and start a new session.
    ///
    /// Unknown users and wrong passwords produce the same error. Failed
    /// attempts are persisted before the error is returned.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
    ) -> Result<(User, TokenPair), AuthError> {
        let Some(user) = self.users.find_by_identifier(identifier).await? else {
            debug!("login for unknown identifier");
            return Err(AuthError::InvalidCredentials);
        };

        let now = Utc::now();
        let policy = self.settings.lockout;
        if let Some(minutes) = policy.remaining_lock_minutes(&user.login_attempts, now) {
            debug!(user_id = %user.id, minutes, "login attempt on locked account");
            return Err(AuthError::AccountLocked { minutes });
        }

        if !self.hasher.verify(password, &user.password_hash) {
            let attempts = self
                .users
                .record_failed_login(&user.id, &policy, now)
                .await?
                .ok_or(AuthError::InvalidCredentials)?;
            return match policy.failure_outcome(&attempts, now) {
                FailureOutcome::Locked { minutes } => {
                    warn!(user_id = %user.id, minutes, "account locked after failed logins");
                    Err(AuthError::AccountLocked { minutes })
                }
                FailureOutcome::Counted { remaining } => {
                    debug!(user_id = %user.id, remaining, "failed login");
                    Err(AuthError::InvalidCredentials)
                }
            };
        }

        if user.is_blocked {
            warn!(user_id = %user.id, "login by blocked user");
            return Err(AuthError::AccountBlocked);
        }

        let mut user = user;
        if let Some(reset) = policy.record_success(&user.login_attempts) {
            self.users.update_lockout_state(&user.id, &reset).await?;
            user.login_attempts = reset;
        }

        let pair = self.issue_tokens(&user, None, true).await?;
        info!(user_id = %user.id, "user logged in");
        Ok((user, pair))
    }

    /// Create a user. The password is hashed before anything is persisted.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let username = username.trim();
        let email = email.trim();
        if username.len() < 3 {
            return Err(AuthError::ValidationError(
                "Username must be at least 3 characters".into(),
            ));
        }
        if !email.contains('@') {
            return Err(AuthError::ValidationError("Invalid email address".into()));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::ValidationError(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let password_hash = self.hasher.hash(password)?;
        let user = self
            .users
            .save(NewUser {
                username: username.to_string(),
                email: email.to_string(),
                password_hash,
                access_level: self.settings.default_access_level,
            })
            .await?;
        info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    // -----------------------------------------------------------------------
    // Refresh
    // -----------------------------------------------------------------------

    /// Verify a refresh token and load the ledger record and user behind it.
    async fn resolve_refresh(
        &self,
        refresh_token: &str,
    ) -> Result<(RefreshClaims, RefreshTokenRecord, User), AuthError> {
        let claims = self.codec.verify_refresh(refresh_token)?;
        let record = self
            .ledger
            .find(&hash_refresh_token(refresh_token))
            .await?
            .filter(|r| r.user_id == claims.sub && r.family_id == claims.family_id)
            .ok_or(AuthError::TokenInvalid)?;
        let user = self
            .users
            .find_by_id(&claims.sub)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        Ok((claims, record, user))
    }

    /// Exchange a refresh token for a new pair, rotating the chain.
    pub async fn refresh(&self, refresh_token: &str) -> Result<(User, TokenPair), AuthError> {
        let (_, record, user) = self.resolve_refresh(refresh_token).await?;
        let replayed = record.is_revoked && is_successor(record.replaced_by_token.as_deref());
        if !record.is_active() && !replayed {
            return Err(AuthError::TokenInvalid);
        }
        if user.is_blocked {
            // Reuse is acted on even for a blocked account.
            self.guard_family(&record).await?;
            return Err(AuthError::AccountBlocked);
        }
        let pair = self.issue_tokens(&user, Some(refresh_token), true).await?;
        Ok((user, pair))
    }

    /// Mint a new access token from an active refresh token without touching
    /// the refresh chain.
    pub async fn refresh_access(&self, refresh_token: &str) -> Result<(User, String), AuthError> {
        let (_, record, user) = self.resolve_refresh(refresh_token).await?;
        if !record.is_active() {
            return Err(AuthError::TokenInvalid);
        }
        if user.is_blocked {
            return Err(AuthError::AccountBlocked);
        }
        let pair = self.issue_tokens(&user, None, false).await?;
        Ok((user, pair.access_token))
    }

    // -----------------------------------------------------------------------
    // Request authentication
    // -----------------------------------------------------------------------

    /// Establish identity from the request's tokens, silently re-minting the
    /// access token from the refresh token when needed.
    pub async fn authenticate(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<Session, AuthError> {
        let access_error = match access_token {
            Some(token) => match self.codec.verify_access(token) {
                Ok(claims) => {
                    return Ok(Session {
                        user_id: claims.sub,
                        username: claims.username,
                        refreshed_access_token: None,
                    });
                }
                Err(e) => e,
            },
            None => AuthError::TokenInvalid,
        };

        let Some(refresh_token) = refresh_token else {
            return Err(access_error);
        };
        let (user, access_token) = self.refresh_access(refresh_token).await?;
        debug!(user_id = %user.id, "access token silently refreshed");
        Ok(Session {
            user_id: user.id,
            username: user.username,
            refreshed_access_token: Some(access_token),
        })
    }

    /// Check the user's current access level and blocked flag from the store.
    ///
    /// A level of zero or less admits any authenticated user without a lookup.
    pub async fn authorize(&self, user_id: &str, min_access_level: i32) -> Result<(), AuthError> {
        if min_access_level <= 0 {
            return Ok(());
        }
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::TokenInvalid)?;
        if user.is_blocked {
            return Err(AuthError::AccountBlocked);
        }
        if user.access_level < min_access_level {
            return Err(AuthError::InsufficientAccess);
        }
        Ok(())
    }

    /// Public profile of a user, if they still exist.
    pub async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, AuthError> {
        Ok(self
            .users
            .find_by_id(user_id)
            .await?
            .map(|u| UserProfile::from(&u)))
    }

    // -----------------------------------------------------------------------
    // Logout
    // -----------------------------------------------------------------------

    /// Revoke one refresh token. Unknown or already-revoked tokens are ignored.
    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), AuthError> {
        if let Some(token) = refresh_token {
            self.ledger.revoke(&hash_refresh_token(token), None).await?;
        }
        Ok(())
    }

    /// Revoke every refresh token the user holds.
    pub async fn logout_all(&self, user_id: &str) -> Result<u64, AuthError> {
        let revoked = self.ledger.revoke_all_for_user(user_id).await?;
        info!(user_id, revoked, "logged out everywhere");
        Ok(revoked)
    }

    /// Delete expired ledger rows.
    pub async fn purge_expired_tokens(&self) -> Result<u64, AuthError> {
        self.ledger.purge_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::{MemoryCredentialStore, MemoryRefreshTokenLedger};
    use crate::auth::store::FAMILY_REVOKED_SENTINEL;
    use chrono::Duration;

    struct Fixture {
        service: Arc<AuthService>,
        users: Arc<MemoryCredentialStore>,
        ledger: Arc<MemoryRefreshTokenLedger>,
    }

    async fn fixture() -> Fixture {
        let users = Arc::new(MemoryCredentialStore::new());
        let ledger = Arc::new(MemoryRefreshTokenLedger::new());
        let service = Arc::new(AuthService::new(
            users.clone(),
            ledger.clone(),
            TokenCodec::new(
                b"access",
                b"refresh",
                Duration::minutes(15),
                Duration::days(30),
            ),
            PasswordHasher::new("pepper", 4),
            AuthSettings::default(),
        ));
        service
            .register("alice", "alice@example.com", "correct-pw")
            .await
            .unwrap();
        Fixture {
            service,
            users,
            ledger,
        }
    }

    fn refresh_of(pair: &TokenPair) -> &str {
        pair.refresh_token.as_deref().unwrap()
    }

    async fn record(f: &Fixture, token: &str) -> RefreshTokenRecord {
        f.ledger
            .find(&hash_refresh_token(token))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn login_starts_a_family_with_one_active_token() {
        let f = fixture().await;
        let (_, pair) = f.service.login("alice", "correct-pw").await.unwrap();
        let rec = record(&f, refresh_of(&pair)).await;
        assert!(rec.is_active());
        assert_eq!(f.ledger.len(), 1);
        assert_eq!(
            f.ledger
                .count_active_in_family(&rec.user_id, &rec.family_id)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn each_login_gets_a_new_family() {
        let f = fixture().await;
        let (_, a) = f.service.login("alice", "correct-pw").await.unwrap();
        let (_, b) = f.service.login("alice", "correct-pw").await.unwrap();
        assert_ne!(
            record(&f, refresh_of(&a)).await.family_id,
            record(&f, refresh_of(&b)).await.family_id
        );
    }

    #[tokio::test]
    async fn rotation_revokes_old_and_keeps_family() {
        let f = fixture().await;
        let (_, first) = f.service.login("alice", "correct-pw").await.unwrap();
        let family = record(&f, refresh_of(&first)).await.family_id;

        let mut current = refresh_of(&first).to_string();
        for _ in 0..4 {
            let (_, next) = f.service.refresh(&current).await.unwrap();
            let next_token = refresh_of(&next).to_string();
            let old = record(&f, &current).await;
            assert!(!old.is_active());
            assert_eq!(
                old.replaced_by_token.as_deref(),
                Some(hash_refresh_token(&next_token).as_str())
            );
            let new = record(&f, &next_token).await;
            assert!(new.is_active());
            assert_eq!(new.family_id, family);
            current = next_token;
        }
        let active = f
            .ledger
            .family(&family)
            .into_iter()
            .filter(|r| r.is_active())
            .count();
        assert_eq!(active, 1);
    }

    #[tokio::test]
    async fn replaying_a_rotated_token_revokes_the_family() {
        let f = fixture().await;
        let (_, first) = f.service.login("alice", "correct-pw").await.unwrap();
        let stolen = refresh_of(&first).to_string();
        let (_, second) = f.service.refresh(&stolen).await.unwrap();

        let err = f.service.refresh(&stolen).await.unwrap_err();
        assert!(matches!(err, AuthError::SuspiciousActivity));

        let family = record(&f, &stolen).await.family_id;
        assert!(f.ledger.family(&family).iter().all(|r| !r.is_active()));
        let legit = record(&f, refresh_of(&second)).await;
        assert_eq!(
            legit.replaced_by_token.as_deref(),
            Some(FAMILY_REVOKED_SENTINEL)
        );
        assert!(matches!(
            f.service.refresh(refresh_of(&second)).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn crowded_family_is_detected_and_revoked() {
        let f = fixture().await;
        let (user, first) = f.service.login("alice", "correct-pw").await.unwrap();
        let token = refresh_of(&first).to_string();
        let family = record(&f, &token).await.family_id;

        // Two rotations raced on the same token before either revoked it.
        let expires = Utc::now() + Duration::days(30);
        f.ledger
            .issue("raced-1", &user.id, &family, expires)
            .await
            .unwrap();
        f.ledger
            .issue("raced-2", &user.id, &family, expires)
            .await
            .unwrap();
        assert!(
            f.ledger
                .detect_suspicious_activity(&user.id, &family, 2)
                .await
                .unwrap()
        );

        let err = f.service.refresh(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::SuspiciousActivity));
        assert_eq!(
            f.ledger.count_active_in_family(&user.id, &family).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn threshold_is_configurable() {
        let f = fixture().await;
        let service = AuthService::new(
            f.users.clone(),
            f.ledger.clone(),
            f.service.codec().clone(),
            PasswordHasher::new("pepper", 4),
            AuthSettings {
                reuse_detection_threshold: 5,
                ..AuthSettings::default()
            },
        );
        let (user, first) = service.login("alice", "correct-pw").await.unwrap();
        let token = refresh_of(&first).to_string();
        let family = record(&f, &token).await.family_id;
        let expires = Utc::now() + Duration::days(30);
        for i in 0..3 {
            f.ledger
                .issue(&format!("extra-{i}"), &user.id, &family, expires)
                .await
                .unwrap();
        }
        assert!(service.refresh(&token).await.is_ok());
    }

    #[tokio::test]
    async fn rotate_false_leaves_the_chain_alone() {
        let f = fixture().await;
        let (user, first) = f.service.login("alice", "correct-pw").await.unwrap();
        let pair = f
            .service
            .issue_tokens(&user, Some(refresh_of(&first)), false)
            .await
            .unwrap();
        assert!(pair.refresh_token.is_none());
        assert!(record(&f, refresh_of(&first)).await.is_active());
        assert_eq!(f.ledger.len(), 1);
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() {
        let f = fixture().await;
        let unknown = f.service.login("mallory", "whatever1").await.unwrap_err();
        let wrong = f.service.login("alice", "wrong-pass").await.unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert!(matches!(unknown, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn lockout_boundary() {
        let f = fixture().await;
        for _ in 0..4 {
            assert!(matches!(
                f.service.login("alice", "wrong-pass").await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        assert!(matches!(
            f.service.login("alice", "wrong-pass").await,
            Err(AuthError::AccountLocked { minutes: 15 })
        ));

        // Locked: even the right password is refused and nothing is counted.
        assert!(matches!(
            f.service.login("alice", "correct-pw").await,
            Err(AuthError::AccountLocked { .. })
        ));
        let user = f.users.find_by_identifier("alice").await.unwrap().unwrap();
        assert_eq!(user.login_attempts.count, 5);

        // Lapse the lock and log in successfully.
        let mut attempts = user.login_attempts.clone();
        attempts.locked_until = Some(Utc::now() - Duration::seconds(1));
        f.users
            .update_lockout_state(&user.id, &attempts)
            .await
            .unwrap();
        f.service.login("alice", "correct-pw").await.unwrap();
        let user = f.users.find_by_identifier("alice").await.unwrap().unwrap();
        assert_eq!(user.login_attempts, Default::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn parallel_guesses_still_lock_after_five() {
        let f = fixture().await;
        let guesses: Vec<_> = (0..16)
            .map(|i| {
                let service = f.service.clone();
                tokio::spawn(async move { service.login("alice", &format!("guess-{i}")).await })
            })
            .collect();

        let (mut invalid, mut locked) = (0, 0);
        for guess in guesses {
            match guess.await.unwrap() {
                Err(AuthError::InvalidCredentials) => invalid += 1,
                Err(AuthError::AccountLocked { .. }) => locked += 1,
                other => panic!("unexpected login result: {other:?}"),
            }
        }
        assert_eq!(invalid, 4);
        assert_eq!(locked, 12);

        let user = f.users.find_by_identifier("alice").await.unwrap().unwrap();
        assert_eq!(user.login_attempts.count, 5);
        assert!(user.login_attempts.locked_until.is_some());
        assert!(matches!(
            f.service.login("alice", "correct-pw").await,
            Err(AuthError::AccountLocked { .. })
        ));
    }

    #[tokio::test]
    async fn blocked_user_cannot_log_in_or_refresh() {
        let f = fixture().await;
        let (user, pair) = f.service.login("alice", "correct-pw").await.unwrap();
        f.users.set_blocked(&user.id, true).unwrap();
        assert!(matches!(
            f.service.login("alice", "correct-pw").await,
            Err(AuthError::AccountBlocked)
        ));
        assert!(matches!(
            f.service.refresh(refresh_of(&pair)).await,
            Err(AuthError::AccountBlocked)
        ));
    }

    #[tokio::test]
    async fn replay_by_blocked_user_still_revokes_family() {
        let f = fixture().await;
        let (user, first) = f.service.login("alice", "correct-pw").await.unwrap();
        let (_, second) = f.service.refresh(refresh_of(&first)).await.unwrap();
        f.users.set_blocked(&user.id, true).unwrap();

        assert!(matches!(
            f.service.refresh(refresh_of(&first)).await,
            Err(AuthError::SuspiciousActivity)
        ));
        let current = record(&f, refresh_of(&second)).await;
        assert!(!current.is_active());
        assert_eq!(
            current.replaced_by_token.as_deref(),
            Some(FAMILY_REVOKED_SENTINEL)
        );
    }

    #[tokio::test]
    async fn authenticate_falls_back_to_refresh_token() {
        let f = fixture().await;
        let (user, pair) = f.service.login("alice", "correct-pw").await.unwrap();

        let direct = f
            .service
            .authenticate(Some(&pair.access_token), None)
            .await
            .unwrap();
        assert_eq!(direct.user_id, user.id);
        assert!(direct.refreshed_access_token.is_none());

        let silent = f
            .service
            .authenticate(Some("garbage"), pair.refresh_token.as_deref())
            .await
            .unwrap();
        assert_eq!(silent.username, "alice");
        assert!(silent.refreshed_access_token.is_some());
        assert!(record(&f, refresh_of(&pair)).await.is_active());

        assert!(f.service.authenticate(None, None).await.is_err());
        assert!(f.service.authenticate(Some("garbage"), None).await.is_err());
    }

    #[tokio::test]
    async fn silent_refresh_rejects_logged_out_token() {
        let f = fixture().await;
        let (_, pair) = f.service.login("alice", "correct-pw").await.unwrap();
        f.service.logout(pair.refresh_token.as_deref()).await.unwrap();
        assert!(matches!(
            f.service.authenticate(None, pair.refresh_token.as_deref()).await,
            Err(AuthError::TokenInvalid)
        ));
    }

    #[tokio::test]
    async fn authorize_reads_current_level() {
        let f = fixture().await;
        let (user, _) = f.service.login("alice", "correct-pw").await.unwrap();
        assert!(f.service.authorize(&user.id, 0).await.is_ok());
        assert!(f.service.authorize(&user.id, 1).await.is_ok());
        assert!(matches!(
            f.service.authorize(&user.id, 2).await,
            Err(AuthError::InsufficientAccess)
        ));
        f.users.set_access_level(&user.id, 2).unwrap();
        assert!(f.service.authorize(&user.id, 2).await.is_ok());
        f.users.set_blocked(&user.id, true).unwrap();
        assert!(matches!(
            f.service.authorize(&user.id, 1).await,
            Err(AuthError::AccountBlocked)
        ));
    }

    #[tokio::test]
    async fn logout_is_idempotent_and_logout_all_clears_every_family() {
        let f = fixture().await;
        let (user, a) = f.service.login("alice", "correct-pw").await.unwrap();
        let (_, b) = f.service.login("alice", "correct-pw").await.unwrap();

        f.service.logout(a.refresh_token.as_deref()).await.unwrap();
        f.service.logout(a.refresh_token.as_deref()).await.unwrap();
        f.service.logout(None).await.unwrap();
        assert!(!record(&f, refresh_of(&a)).await.is_active());
        assert!(record(&f, refresh_of(&b)).await.is_active());

        assert_eq!(f.service.logout_all(&user.id).await.unwrap(), 1);
        assert!(!record(&f, refresh_of(&b)).await.is_active());
    }

    #[tokio::test]
    async fn register_validates_and_hashes() {
        let f = fixture().await;
        assert!(matches!(
            f.service.register("bob", "bob@example.com", "short").await,
            Err(AuthError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.register("bob", "not-an-email", "long-enough").await,
            Err(AuthError::ValidationError(_))
        ));
        assert!(matches!(
            f.service
                .register("bob", "bob@example.com", &"x".repeat(100))
                .await,
            Err(AuthError::ValidationError(_))
        ));
        assert!(matches!(
            f.service
                .register("ALICE", "other@example.com", "long-enough")
                .await,
            Err(AuthError::ValidationError(_))
        ));
        let bob = f
            .service
            .register("bob", "bob@example.com", "long-enough")
            .await
            .unwrap();
        assert_ne!(bob.password_hash, "long-enough");
        assert_eq!(bob.access_level, DEFAULT_ACCESS_LEVEL);
    }
}
