//! Account lockout state machine.
//!
//! Unlocked (count 0) → Accumulating (1..threshold-1 failures) → Locked
//! (`locked_until` in the future). Only the login path drives transitions.

use chrono::{DateTime, Duration, Utc};

use crate::models::auth::LoginAttempts;

/// Consecutive failures that trigger a lock.
pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 5;

/// Lock duration: 15 minutes.
pub const DEFAULT_LOCK_DURATION_MINS: i64 = 15;

/// Thresholds for the lockout state machine.
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lock_duration: Duration::minutes(DEFAULT_LOCK_DURATION_MINS),
        }
    }
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still accumulating; `remaining` attempts before a lock.
    Counted { remaining: u32 },
    /// This failure locked the account.
    Locked { minutes: i64 },
}

impl LockoutPolicy {
    /// Minutes left on an active lock, rounded up, or `None` when unlocked.
    pub fn remaining_lock_minutes(
        &self,
        attempts: &LoginAttempts,
        now: DateTime<Utc>,
    ) -> Option<i64> {
        let until = attempts.locked_until?;
        if until <= now {
            return None;
        }
        let secs = (until - now).num_seconds();
        Some((secs + 59) / 60)
    }

    /// Apply a failed login at `now`.
    ///
    /// A lock that has already lapsed starts a fresh count. An active lock is
    /// left untouched so racing failures cannot push the count past the
    /// threshold. Stores run this under their own atomicity.
    pub fn record_failure(&self, attempts: &LoginAttempts, now: DateTime<Utc>) -> LoginAttempts {
        let base = match attempts.locked_until {
            Some(until) if until > now => return attempts.clone(),
            Some(_) => 0,
            None => attempts.count,
        };
        let count = base.saturating_add(1);
        LoginAttempts {
            count,
            last_attempt: Some(now),
            locked_until: (count >= self.max_failed_attempts).then(|| now + self.lock_duration),
        }
    }

    /// Classify the state a failed login left behind.
    pub fn failure_outcome(&self, attempts: &LoginAttempts, now: DateTime<Utc>) -> FailureOutcome {
        match self.remaining_lock_minutes(attempts, now) {
            Some(minutes) => FailureOutcome::Locked { minutes },
            None => FailureOutcome::Counted {
                remaining: self.max_failed_attempts.saturating_sub(attempts.count),
            },
        }
    }

    /// State after a successful login, or `None` when nothing needs persisting.
    pub fn record_success(&self, attempts: &LoginAttempts) -> Option<LoginAttempts> {
        if attempts.count == 0 && attempts.locked_until.is_none() {
            None
        } else {
            Some(LoginAttempts::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifth_failure_locks_for_fifteen_minutes() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let mut attempts = LoginAttempts::default();
        for i in 1..5 {
            attempts = policy.record_failure(&attempts, now);
            assert_eq!(
                policy.failure_outcome(&attempts, now),
                FailureOutcome::Counted { remaining: 5 - i }
            );
        }
        let locked = policy.record_failure(&attempts, now);
        assert_eq!(
            policy.failure_outcome(&locked, now),
            FailureOutcome::Locked { minutes: 15 }
        );
        assert_eq!(locked.count, 5);
        assert_eq!(locked.locked_until, Some(now + Duration::minutes(15)));
        assert_eq!(policy.remaining_lock_minutes(&locked, now), Some(15));
    }

    #[test]
    fn remaining_minutes_round_up() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let attempts = LoginAttempts {
            count: 5,
            last_attempt: Some(now),
            locked_until: Some(now + Duration::seconds(61)),
        };
        assert_eq!(policy.remaining_lock_minutes(&attempts, now), Some(2));
    }

    #[test]
    fn lapsed_lock_is_unlocked_and_restarts_count() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let attempts = LoginAttempts {
            count: 5,
            last_attempt: Some(now - Duration::minutes(20)),
            locked_until: Some(now - Duration::minutes(5)),
        };
        assert_eq!(policy.remaining_lock_minutes(&attempts, now), None);
        let next = policy.record_failure(&attempts, now);
        assert_eq!(next.count, 1);
        assert_eq!(next.locked_until, None);
        assert_eq!(
            policy.failure_outcome(&next, now),
            FailureOutcome::Counted { remaining: 4 }
        );
    }

    #[test]
    fn failure_during_lock_changes_nothing() {
        let policy = LockoutPolicy::default();
        let now = Utc::now();
        let locked = LoginAttempts {
            count: 5,
            last_attempt: Some(now - Duration::minutes(1)),
            locked_until: Some(now + Duration::minutes(14)),
        };
        assert_eq!(policy.record_failure(&locked, now), locked);
        assert_eq!(
            policy.failure_outcome(&locked, now),
            FailureOutcome::Locked { minutes: 14 }
        );
    }

    #[test]
    fn success_resets_only_when_dirty() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.record_success(&LoginAttempts::default()), None);
        let dirty = LoginAttempts {
            count: 3,
            last_attempt: Some(Utc::now()),
            locked_until: None,
        };
        assert_eq!(
            policy.record_success(&dirty),
            Some(LoginAttempts::default())
        );
    }
}
