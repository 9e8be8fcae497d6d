//! Fixed-window request rate limiting.
//!
//! A limiter counts hits per key inside a fixed window and denies once the
//! window's maximum is exceeded. The counter store is pluggable so that a
//! multi-instance deployment can share counts; `MemoryRateLimitStore` covers a
//! single process.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;

/// Longest accepted window: one day.
pub const MAX_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Rate limiter errors.
#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit store error: {0}")]
    Store(String),
}

/// Counter state after recording a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Hits in the current window, including this one.
    pub count: u32,
    /// When the current window ends.
    pub resets_at: DateTime<Utc>,
}

/// Backing store for fixed-window counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Record one hit for `key`, opening a new window when the previous one
    /// has ended.
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, RateLimitError>;
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after_secs: i64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Limits for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    /// `window_secs` is clamped to `1..=MAX_WINDOW_SECS`; an empty window
    /// would restart on every hit and never deny.
    pub fn new(max_requests: u32, window_secs: i64) -> Self {
        Self {
            max_requests,
            window: Duration::seconds(window_secs.clamp(1, MAX_WINDOW_SECS)),
        }
    }

    fn has_valid_window(&self) -> bool {
        self.window >= Duration::seconds(1) && self.window <= Duration::seconds(MAX_WINDOW_SECS)
    }
}

/// A named fixed-window limiter.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    name: &'static str,
    policy: RateLimitPolicy,
    message: String,
    store: Arc<dyn RateLimitStore>,
}

impl std::fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl FixedWindowLimiter {
    pub fn new(
        name: &'static str,
        policy: RateLimitPolicy,
        message: impl Into<String>,
        store: Arc<dyn RateLimitStore>,
    ) -> Self {
        let policy = if policy.has_valid_window() {
            policy
        } else {
            warn!(
                limiter = name,
                window_secs = policy.window.num_seconds(),
                "rate limit window out of range, clamping"
            );
            RateLimitPolicy::new(policy.max_requests, policy.window.num_seconds())
        };
        Self {
            name,
            policy,
            message: message.into(),
            store,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Message shown to a limited client.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Record a hit for `key` and decide whether it may proceed.
    pub async fn check(&self, key: &str) -> Result<Decision, RateLimitError> {
        self.check_at(key, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Decision, RateLimitError> {
        let scoped = format!("{}:{key}", self.name);
        let hit = self.store.hit(&scoped, self.policy.window, now).await?;
        if hit.count > self.policy.max_requests {
            let retry_after_secs = (hit.resets_at - now).num_seconds().max(1);
            Ok(Decision::Limited { retry_after_secs })
        } else {
            Ok(Decision::Allowed {
                remaining: self.policy.max_requests - hit.count,
            })
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    started: DateTime<Utc>,
}

/// In-process counter store.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, Window>,
}

impl MemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop windows that ended more than `max_window` ago.
    pub fn cleanup(&self, max_window: Duration) {
        let cutoff = Utc::now() - max_window;
        self.windows.retain(|_, w| w.started > cutoff);
    }

    /// Spawn a periodic cleanup task.
    pub fn spawn_cleanup_task(
        self: &Arc<Self>,
        max_window: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                store.cleanup(max_window);
            }
        })
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowHit, RateLimitError> {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });
        if now - entry.started >= window {
            *entry = Window {
                count: 0,
                started: now,
            };
        }
        entry.count = entry.count.saturating_add(1);
        Ok(WindowHit {
            count: entry.count,
            resets_at: entry.started + window,
        })
    }
}
