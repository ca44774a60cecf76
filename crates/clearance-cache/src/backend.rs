//! Cache backend effect
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementations**: [`crate::MemoryCacheBackend`] (in-process fallback),
//!   [`crate::RespCacheBackend`] (networked primary)
//! - **Usage**: only through [`crate::ScopedCache`], which absorbs every error
//!
//! Entries are disposable. Losing all of them changes latency, never results.

use async_trait::async_trait;
use std::time::Duration;

/// Backend failure. Never surfaced past the scoped cache.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// Backend could not be reached.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
    /// Backend did not answer in time.
    #[error("Cache operation timed out after {0:?}")]
    Timeout(Duration),
    /// Backend answered something unexpected.
    #[error("Cache protocol error: {0}")]
    Protocol(String),
    /// Value could not be encoded or decoded.
    #[error("Cache value encoding failed: {0}")]
    Encoding(String),
    /// Value could not be encrypted or decrypted.
    #[error("Cache value encryption failed: {0}")]
    Crypto(String),
    /// Backend or cipher is misconfigured.
    #[error("Cache misconfigured: {0}")]
    Config(String),
}

/// Key/value store with TTL and prefix invalidation.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Value for `key`, or `None` on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key` for `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key starting with `prefix`. Returns how many were removed.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
