//! PostgreSQL implementations of the auth stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::AuthError;
use super::lockout::LockoutPolicy;
use super::store::{
    CredentialStore, FAMILY_REVOKED_SENTINEL, LOGOUT_ALL_SENTINEL, RefreshTokenLedger,
};
use crate::models::auth::{LoginAttempts, NewUser, RefreshTokenRecord, User};
use crate::uuid::uuidv7;

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

type UserRow = (
    String,
    String,
    String,
    String,
    i32,
    bool,
    i32,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

const USER_COLUMNS: &str = "id::text, username, email, password_hash, access_level, is_blocked, \
     login_count, last_attempt, locked_until";

fn user_from_row(row: UserRow) -> User {
    let (id, username, email, password_hash, access_level, is_blocked, count, last, locked) = row;
    User {
        id,
        username,
        email,
        password_hash,
        access_level,
        is_blocked,
        login_attempts: LoginAttempts {
            count: count.max(0) as u32,
            last_attempt: last,
            locked_until: locked,
        },
    }
}

type TokenRow = (
    String,
    String,
    String,
    String,
    DateTime<Utc>,
    bool,
    Option<DateTime<Utc>>,
    Option<String>,
);

const TOKEN_COLUMNS: &str = "id::text, token_hash, user_id::text, family_id, expires_at, \
     is_revoked, revoked_at, replaced_by_token";

fn token_from_row(row: TokenRow) -> RefreshTokenRecord {
    let (id, token_hash, user_id, family_id, expires_at, is_revoked, revoked_at, replaced) = row;
    RefreshTokenRecord {
        id,
        token_hash,
        user_id,
        family_id,
        expires_at,
        is_revoked,
        revoked_at,
        replaced_by_token: replaced,
    }
}

/// User IDs are UUIDs; anything else cannot match a row.
fn parse_user_id(user_id: &str) -> Option<Uuid> {
    Uuid::parse_str(user_id).ok()
}

/// `users` table access.
#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_identifier(&self, identifier: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users \
             WHERE lower(username) = lower($1) OR lower(email) = lower($1) \
             LIMIT 1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        let Some(id) = parse_user_id(user_id) else {
            return Ok(None);
        };
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn record_failed_login(
        &self,
        user_id: &str,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginAttempts>, AuthError> {
        let Some(id) = parse_user_id(user_id) else {
            return Ok(None);
        };
        // Right-hand sides see the row as it was before this update; the row
        // lock serialises concurrent failures. Mirrors LockoutPolicy::record_failure.
        let row = sqlx::query_as::<_, (i32, Option<DateTime<Utc>>, Option<DateTime<Utc>>)>(
            "UPDATE users SET \
                 login_count = CASE \
                     WHEN locked_until > $2 THEN login_count \
                     WHEN locked_until IS NOT NULL THEN 1 \
                     ELSE login_count + 1 END, \
                 last_attempt = CASE WHEN locked_until > $2 THEN last_attempt ELSE $2 END, \
                 locked_until = CASE \
                     WHEN locked_until > $2 THEN locked_until \
                     WHEN (CASE WHEN locked_until IS NOT NULL THEN 1 \
                                ELSE login_count + 1 END) >= $3 THEN $4 \
                     ELSE NULL END \
             WHERE id = $1 \
             RETURNING login_count, last_attempt, locked_until",
        )
        .bind(id)
        .bind(now)
        .bind(policy.max_failed_attempts as i32)
        .bind(now + policy.lock_duration)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(count, last_attempt, locked_until)| LoginAttempts {
            count: count.max(0) as u32,
            last_attempt,
            locked_until,
        }))
    }

    async fn update_lockout_state(
        &self,
        user_id: &str,
        attempts: &LoginAttempts,
    ) -> Result<(), AuthError> {
        let Some(id) = parse_user_id(user_id) else {
            return Ok(());
        };
        sqlx::query(
            "UPDATE users SET login_count = $2, last_attempt = $3, locked_until = $4 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(attempts.count as i32)
        .bind(attempts.last_attempt)
        .bind(attempts.locked_until)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(&self, user: NewUser) -> Result<User, AuthError> {
        let result = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (username, email, password_hash, access_level) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.access_level)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(user_from_row(row)),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(AuthError::ValidationError(
                    "Username or email already registered".into(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `refresh_tokens` table access.
#[derive(Clone, Debug)]
pub struct PgRefreshTokenLedger {
    pool: PgPool,
}

impl PgRefreshTokenLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenLedger for PgRefreshTokenLedger {
    async fn issue(
        &self,
        token_hash: &str,
        user_id: &str,
        family_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<RefreshTokenRecord, AuthError> {
        let user = parse_user_id(user_id)
            .ok_or_else(|| AuthError::ValidationError("malformed user id".into()))?;
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "INSERT INTO refresh_tokens (id, token_hash, user_id, family_id, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(uuidv7())
        .bind(token_hash)
        .bind(user)
        .bind(family_id)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(token_from_row(row))
    }

    async fn find(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AuthError> {
        let row = sqlx::query_as::<_, TokenRow>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token_hash = $1"
        ))
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(token_from_row))
    }

    async fn revoke(
        &self,
        token_hash: &str,
        replaced_by: Option<&str>,
    ) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE refresh_tokens \
             SET is_revoked = TRUE, revoked_at = now(), replaced_by_token = $2 \
             WHERE token_hash = $1 AND is_revoked = FALSE",
        )
        .bind(token_hash)
        .bind(replaced_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_family(&self, user_id: &str, family_id: &str) -> Result<u64, AuthError> {
        let Some(user) = parse_user_id(user_id) else {
            return Ok(0);
        };
        let result = sqlx::query(
            "UPDATE refresh_tokens \
             SET is_revoked = TRUE, revoked_at = now(), replaced_by_token = $3 \
             WHERE user_id = $1 AND family_id = $2 AND is_revoked = FALSE",
        )
        .bind(user)
        .bind(family_id)
        .bind(FAMILY_REVOKED_SENTINEL)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64, AuthError> {
        let Some(user) = parse_user_id(user_id) else {
            return Ok(0);
        };
        let result = sqlx::query(
            "UPDATE refresh_tokens \
             SET is_revoked = TRUE, revoked_at = now(), replaced_by_token = $2 \
             WHERE user_id = $1 AND is_revoked = FALSE",
        )
        .bind(user)
        .bind(LOGOUT_ALL_SENTINEL)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn count_active_in_family(
        &self,
        user_id: &str,
        family_id: &str,
    ) -> Result<u64, AuthError> {
        let Some(user) = parse_user_id(user_id) else {
            return Ok(0);
        };
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM refresh_tokens \
             WHERE user_id = $1 AND family_id = $2 \
               AND is_revoked = FALSE AND expires_at > now()",
        )
        .bind(user)
        .bind(family_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn purge_expired(&self) -> Result<u64, AuthError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
