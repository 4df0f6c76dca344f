//! Caching subsystem.
//!
//! - [`response::ResponseCache`]: LRU + TTL cache of replies to stateless
//!   chat requests, keyed on a [`Fingerprint`] of the normalised message.

pub mod response;

pub use response::{CacheConfig, CachedReply, Fingerprint, ResponseCache, fingerprint, normalize};
