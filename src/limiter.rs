//! Per-client cooldown.
//!
//! A client may not send a second request to a rate-limited path within the
//! cooldown window. The table of last-request times is a moka cache: each
//! entry expires once its cooldown has passed, and the number of tracked
//! clients is capped, least recently seen evicted first.
//!
//! The check and the update happen in one atomic step per client, so two
//! concurrent requests from the same client cannot both get through.

use std::time::{Duration, Instant};

use moka::ops::compute::{CompResult, Op};
use moka::sync::Cache;
use tracing::debug;

use crate::telemetry;

/// Configuration for the rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Minimum gap between two requests from one client. Default: 3 s.
    pub cooldown: Duration,
    /// Maximum number of clients tracked at once. Default: 10,000.
    pub max_clients: u64,
    /// Path prefixes the cooldown applies to.
    pub paths: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3),
            max_clients: 10_000,
            paths: vec!["/api/chat".to_string(), "/chat".to_string()],
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn max_clients(mut self, n: u64) -> Self {
        self.max_clients = n;
        self
    }

    pub fn paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// How long the client should wait. Zero when allowed.
    pub retry_after: Duration,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    fn rejected(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }

    /// `retry_after` in whole seconds, rounded up (for the `Retry-After` header).
    pub fn retry_after_secs(&self) -> u64 {
        if self.allowed {
            return 0;
        }
        ceil_secs(self.retry_after).max(1)
    }
}

/// Per-client cooldown enforcement.
pub struct RateLimiter {
    clients: Cache<String, Instant>,
    cooldown: Duration,
    paths: Vec<String>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let mut builder = Cache::builder().max_capacity(config.max_clients);
        if !config.cooldown.is_zero() {
            builder = builder.time_to_live(config.cooldown);
        }
        Self {
            clients: builder.build(),
            cooldown: config.cooldown,
            paths: config.paths.clone(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether requests to `path` are subject to the cooldown.
    ///
    /// Prefixes match whole path segments: `/chat` covers `/chat` and
    /// `/chat/stream` but not `/chatter`.
    pub fn applies_to(&self, path: &str) -> bool {
        self.paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/');
            path == prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Admit or reject a request from `client` arriving at `now`.
    ///
    /// An admitted request starts a new cooldown window; a rejected one
    /// leaves the existing window untouched.
    pub fn admit(&self, client: &str, now: Instant) -> Admission {
        if self.cooldown.is_zero() {
            return Admission::allowed();
        }

        let mut wait = self.cooldown;
        let outcome = self
            .clients
            .entry(client.to_string())
            .and_compute_with(|existing| {
                if let Some(entry) = existing {
                    let elapsed = now.saturating_duration_since(*entry.value());
                    if elapsed < self.cooldown {
                        let residual = self.cooldown - elapsed;
                        wait = Duration::from_secs(ceil_secs(residual)).min(self.cooldown);
                        return Op::Nop;
                    }
                }
                Op::Put(now)
            });

        let admission = match outcome {
            CompResult::Inserted(_) | CompResult::ReplacedWith(_) => Admission::allowed(),
            CompResult::Unchanged(_) | CompResult::Removed(_) | CompResult::StillNone(_) => {
                Admission::rejected(wait)
            }
        };

        if !admission.allowed {
            metrics::counter!(telemetry::RATE_LIMITED_TOTAL).increment(1);
            debug!(client = %client, retry_after = ?admission.retry_after, "client in cooldown");
        }
        admission
    }

    /// Number of clients currently tracked (approximate).
    pub fn tracked_clients(&self) -> u64 {
        self.clients.entry_count()
    }

    /// Flush moka's pending maintenance so counts are exact. Used by tests.
    pub fn sync(&self) {
        self.clients.run_pending_tasks();
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}
