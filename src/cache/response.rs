//! Response cache for stateless chat requests.
//!
//! [`ResponseCache`] remembers the reply to a message that arrived without
//! conversation history, so the same question asked again (in any casing or
//! spacing) is answered without a backend call. Requests that carry history
//! never touch the cache: the same message can mean something different in
//! a different conversation.
//!
//! # Keys
//!
//! Entries are keyed on a [`Fingerprint`] of the normalised message text:
//! trimmed, lowercased, internal whitespace runs collapsed to one space.
//!
//! ```rust
//! # use huginn::cache::fingerprint;
//! assert_eq!(fingerprint("Who made you?"), fingerprint("  who   MADE you? "));
//! ```
//!
//! # Bounds
//!
//! Backed by moka's LRU + TTL cache: at most `max_entries` replies, each
//! kept for at most `ttl`. Replies of `max_response_chars` characters or
//! more are not stored at all.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use moka::future::Cache;
use tracing::debug;

use crate::telemetry;

/// Configuration for the response cache.
///
/// ```rust
/// # use huginn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(500)
///     .ttl(Duration::from_secs(600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached replies. Default: 1,000.
    pub max_entries: u64,
    /// Time-to-live for cached replies. Default: 1 hour.
    pub ttl: Duration,
    /// Replies this long (in characters) or longer are not cached. Default: 4,000.
    pub max_response_chars: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
            max_response_chars: 4_000,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached replies.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the time-to-live for cached replies.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the size ceiling for cacheable replies.
    pub fn max_response_chars(mut self, n: usize) -> Self {
        self.max_response_chars = n;
        self
    }
}

/// Digest of a normalised message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Normalise a message the way cache lookups see it.
pub fn normalize(message: &str) -> String {
    message
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fingerprint of the normalised form of `message`.
pub fn fingerprint(message: &str) -> Fingerprint {
    let mut hasher = DefaultHasher::new();
    normalize(message).hash(&mut hasher);
    Fingerprint(hasher.finish())
}

/// A cached reply and the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedReply {
    pub text: String,
    pub model: String,
}

/// In-memory LRU + TTL cache of replies to stateless requests.
pub struct ResponseCache {
    cache: Cache<Fingerprint, CachedReply>,
    max_response_chars: usize,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self {
            cache,
            max_response_chars: config.max_response_chars,
        }
    }

    /// Look up a reply. Emits cache hit/miss metrics.
    pub async fn get(&self, key: Fingerprint) -> Option<CachedReply> {
        match self.cache.get(&key).await {
            Some(reply) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Some(reply)
            }
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Store a reply, unless it is over the size ceiling.
    ///
    /// Returns whether the reply was stored.
    pub async fn put(&self, key: Fingerprint, reply: CachedReply) -> bool {
        if !self.accepts(&reply.text) {
            debug!(chars = reply.text.chars().count(), "reply too large to cache");
            return false;
        }
        self.cache.insert(key, reply).await;
        true
    }

    /// Whether a reply of this text would be stored.
    pub fn accepts(&self, text: &str) -> bool {
        text.chars().count() < self.max_response_chars
    }

    /// Evict every entry.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries (moka applies writes lazily).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Flush moka's pending maintenance so counts are exact. Used by tests.
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> CachedReply {
        CachedReply {
            text: text.to_string(),
            model: "gemini-1.5-flash".to_string(),
        }
    }

    #[test]
    fn normalisation_collapses_case_and_whitespace() {
        assert_eq!(normalize("  Who\tmade \n YOU?  "), "who made you?");
        assert_eq!(fingerprint("Who made you?"), fingerprint("who made you?"));
        assert_ne!(fingerprint("who made you?"), fingerprint("who made you"));
    }

    #[tokio::test]
    async fn put_then_get() {
        let cache = ResponseCache::new(&CacheConfig::default());
        let key = fingerprint("hello");
        assert!(cache.get(key).await.is_none());

        assert!(cache.put(key, reply("hi there")).await);
        assert_eq!(cache.get(key).await, Some(reply("hi there")));
    }

    #[tokio::test]
    async fn size_ceiling_is_exclusive() {
        let cache = ResponseCache::new(&CacheConfig::new().max_response_chars(5));
        assert!(cache.put(fingerprint("a"), reply("1234")).await);
        assert!(!cache.put(fingerprint("b"), reply("12345")).await);
        assert!(cache.get(fingerprint("b")).await.is_none());
    }

    #[tokio::test]
    async fn clear_evicts_everything() {
        let cache = ResponseCache::new(&CacheConfig::default());
        cache.put(fingerprint("one"), reply("1")).await;
        cache.put(fingerprint("two"), reply("2")).await;
        cache.clear();
        assert!(cache.get(fingerprint("one")).await.is_none());
        assert!(cache.get(fingerprint("two")).await.is_none());
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache = ResponseCache::new(&CacheConfig::new().max_entries(10));
        for i in 0..100 {
            cache.put(fingerprint(&format!("message {i}")), reply("x")).await;
        }
        cache.sync().await;
        assert!(cache.entry_count() <= 10);
    }
}
