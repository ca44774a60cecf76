//! Cache backend that is always down

use async_trait::async_trait;
use clearance_cache::{CacheBackend, CacheError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Backend whose every operation fails with `Unavailable`.
#[derive(Debug, Default)]
pub struct FailingCacheBackend {
    attempts: AtomicUsize,
}

impl FailingCacheBackend {
    /// New failing backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations attempted so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T, CacheError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("failing backend".into()))
    }
}

#[async_trait]
impl CacheBackend for FailingCacheBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.fail()
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), CacheError> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        self.fail()
    }

    async fn invalidate_prefix(&self, _prefix: &str) -> Result<usize, CacheError> {
        self.fail()
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
