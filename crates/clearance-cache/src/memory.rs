//! In-process cache backend
//!
//! Concurrency-safe ordered map with TTL read through the [`PhysicalClock`].
//! Expired entries are invisible immediately and reclaimed lazily. When the
//! map is full, expired entries are purged first, then the entry closest to
//! expiry is evicted.

use crate::backend::{CacheBackend, CacheError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clearance_core::PhysicalClock;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Default capacity of the in-process backend.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// Local fallback backend.
pub struct MemoryCacheBackend {
    entries: RwLock<BTreeMap<String, Entry>>,
    clock: Arc<dyn PhysicalClock>,
    max_entries: usize,
}

impl MemoryCacheBackend {
    /// Backend holding at most `max_entries` entries.
    pub fn new(clock: Arc<dyn PhysicalClock>, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            clock,
            max_entries: max_entries.max(1),
        }
    }

    /// Entries currently stored, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn make_room(entries: &mut BTreeMap<String, Entry>, now: DateTime<Utc>, max: usize) {
        if entries.len() < max {
            return;
        }
        entries.retain(|_, e| e.expires_at > now);
        while entries.len() >= max {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match victim {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CacheError::Config(format!("ttl out of range: {e}")))?;
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| CacheError::Config(format!("ttl of {ttl} runs past the calendar")))?;

        let mut entries = self.entries.write();
        if !entries.contains_key(key) {
            Self::make_room(&mut entries, now, self.max_entries);
        }
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries.write();
        let doomed: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.remove(key);
        }
        Ok(doomed.len())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
