//! Error-absorbing, namespaced cache front
//!
//! [`ScopedCache`] is the only way the rest of the system touches a
//! [`CacheBackend`]. Backend, cipher and codec failures are logged and turned
//! into misses or no-ops, so a cache outage costs latency and nothing else.
//! Each namespace carries its own TTL and encryption setting.

use crate::backend::{CacheBackend, CacheError};
use crate::encryption::ValueCipher;
use crate::scope_key::{scope_key, CacheScope};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Partition of the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheNamespace {
    /// Retrieval results keyed by query and cache scope
    Retrieval,
    /// Per-user conversation history
    Conversation,
}

impl CacheNamespace {
    /// Key prefix, without the trailing separator.
    pub fn as_str(self) -> &'static str {
        match self {
            CacheNamespace::Retrieval => "retrieval",
            CacheNamespace::Conversation => "conversation",
        }
    }

    /// Prefix matching every key of the namespace.
    pub fn prefix(self) -> String {
        format!("{}:", self.as_str())
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL and encryption for one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespacePolicy {
    /// Entry lifetime
    pub ttl: Duration,
    /// Seal values before they reach the backend
    pub encrypt: bool,
}

/// Per-namespace policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopedCacheConfig {
    /// Retrieval results
    pub retrieval: NamespacePolicy,
    /// Conversation history
    pub conversation: NamespacePolicy,
}

impl Default for ScopedCacheConfig {
    fn default() -> Self {
        Self {
            retrieval: NamespacePolicy {
                ttl: Duration::from_secs(300),
                encrypt: false,
            },
            conversation: NamespacePolicy {
                ttl: Duration::from_secs(3600),
                encrypt: true,
            },
        }
    }
}

impl ScopedCacheConfig {
    /// Policy for `namespace`.
    pub fn policy(&self, namespace: CacheNamespace) -> NamespacePolicy {
        match namespace {
            CacheNamespace::Retrieval => self.retrieval,
            CacheNamespace::Conversation => self.conversation,
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Successful writes
    pub writes: u64,
    /// Absorbed backend, cipher or codec failures
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// Namespaced cache that never fails its caller.
pub struct ScopedCache {
    backend: Arc<dyn CacheBackend>,
    cipher: Option<ValueCipher>,
    config: ScopedCacheConfig,
    counters: Counters,
}

impl fmt::Debug for ScopedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCache")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("cipher", &self.cipher.is_some())
            .finish()
    }
}

impl ScopedCache {
    /// Cache over `backend`.
    ///
    /// Fails if a namespace asks for encryption and no cipher is given.
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        config: ScopedCacheConfig,
        cipher: Option<ValueCipher>,
    ) -> Result<Self, CacheError> {
        for namespace in [CacheNamespace::Retrieval, CacheNamespace::Conversation] {
            if config.policy(namespace).encrypt && cipher.is_none() {
                return Err(CacheError::Config(format!(
                    "namespace {namespace} requires an encryption key"
                )));
            }
            if config.policy(namespace).ttl.is_zero() {
                return Err(CacheError::Config(format!(
                    "namespace {namespace} has a zero ttl"
                )));
            }
        }
        Ok(Self {
            backend,
            cipher,
            config,
            counters: Counters::default(),
        })
    }

    /// Active namespace policies.
    pub fn config(&self) -> &ScopedCacheConfig {
        &self.config
    }

    /// Name of the underlying backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Retrieval key for a normalized query under `scope`.
    pub fn retrieval_key(&self, normalized_query: &str, scope: &CacheScope) -> String {
        scope_key(CacheNamespace::Retrieval.as_str(), normalized_query, scope)
    }

    fn absorb(&self, op: &'static str, key: &str, error: &CacheError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!(
            backend = self.backend.name(),
            op,
            key,
            error = %error,
            "Cache error absorbed"
        );
    }

    fn miss<T>(&self) -> Option<T> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Cached value under `key`, or `None` on miss or any failure.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        namespace: CacheNamespace,
        key: &str,
    ) -> Option<T> {
        let stored = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return self.miss(),
            Err(error) => {
                self.absorb("get", key, &error);
                return self.miss();
            }
        };

        let plain = if self.config.policy(namespace).encrypt {
            match self.open(key, &stored) {
                Ok(plain) => plain,
                Err(error) => {
                    self.absorb("decrypt", key, &error);
                    return self.miss();
                }
            }
        } else {
            stored
        };

        match serde_json::from_slice(&plain) {
            Ok(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %namespace, key, "Cache hit");
                Some(value)
            }
            Err(error) => {
                self.absorb("decode", key, &CacheError::Encoding(error.to_string()));
                self.miss()
            }
        }
    }

    /// Store `value` under `key` with the namespace TTL. Failures are logged.
    pub async fn put_json<T: Serialize>(&self, namespace: CacheNamespace, key: &str, value: &T) {
        let policy = self.config.policy(namespace);
        let encoded = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(error) => {
                self.absorb("encode", key, &CacheError::Encoding(error.to_string()));
                return;
            }
        };
        let stored = if policy.encrypt {
            match self.seal(key, &encoded) {
                Ok(blob) => blob,
                Err(error) => {
                    self.absorb("encrypt", key, &error);
                    return;
                }
            }
        } else {
            encoded
        };

        match self.backend.set(key, stored, policy.ttl).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                debug!(namespace = %namespace, key, ttl_secs = policy.ttl.as_secs(), "Cache write");
            }
            Err(error) => self.absorb("set", key, &error),
        }
    }

    /// Drop `key`. Failures are logged.
    pub async fn remove(&self, key: &str) {
        if let Err(error) = self.backend.delete(key).await {
            self.absorb("delete", key, &error);
        }
    }

    /// Drop every entry of `namespace`. Returns how many were removed, zero
    /// on failure.
    pub async fn invalidate(&self, namespace: CacheNamespace) -> usize {
        let prefix = namespace.prefix();
        match self.backend.invalidate_prefix(&prefix).await {
            Ok(removed) => {
                debug!(namespace = %namespace, removed, "Cache namespace invalidated");
                removed
            }
            Err(error) => {
                self.absorb("invalidate", &prefix, &error);
                0
            }
        }
    }

    /// Counters since construction.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    fn seal(&self, key: &str, plain: &[u8]) -> Result<Vec<u8>, CacheError> {
        match &self.cipher {
            Some(cipher) => cipher.encrypt(key, plain),
            None => Err(CacheError::Config("no encryption key".to_string())),
        }
    }

    fn open(&self, key: &str, blob: &[u8]) -> Result<Vec<u8>, CacheError> {
        match &self.cipher {
            Some(cipher) => cipher.decrypt(key, blob),
            None => Err(CacheError::Config("no encryption key".to_string())),
        }
    }
}
