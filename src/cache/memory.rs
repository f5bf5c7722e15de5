//! Process-local cache backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use parking_lot::Mutex;

use super::{expiry_for, CacheEntry, CacheError, CacheStats, CacheStore};
use crate::clock::Clock;

/// In-memory [`CacheStore`]. Each operation holds the map lock for its whole
/// read-modify-write.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Copy of the stored entry, expired or not, without touching its
    /// access accounting.
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            log::debug!("Cache entry {} expired; deleted on read", key);
            return Ok(None);
        }

        Ok(entries.get_mut(key).map(|entry| {
            entry.access_count += 1;
            entry.last_accessed_at = Some(now);
            entry.value.clone()
        }))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = self.clock.now();
        let expires_at = expiry_for(now, ttl);
        let mut entries = self.entries.lock();

        match entries.get_mut(key) {
            Some(entry) => {
                entry.value = value;
                entry.expires_at = expires_at;
                entry.updated_at = now;
            }
            None => {
                entries.insert(
                    key.to_string(),
                    CacheEntry {
                        key: key.to_string(),
                        value,
                        expires_at,
                        access_count: 0,
                        last_accessed_at: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => return Ok(false),
        };
        if expired {
            entries.remove(key);
        }
        Ok(!expired)
    }

    async fn clear_expired(&self) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    async fn clear_all(&self) -> Result<u64, CacheError> {
        let mut entries = self.entries.lock();
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = self.clock.now();
        let entries = self.entries.lock();
        let mut stats = CacheStats::default();
        for entry in entries.values() {
            stats.total += 1;
            if entry.is_expired(now) {
                stats.expired += 1;
            } else {
                stats.active += 1;
            }
            stats.accesses += entry.access_count;
        }
        Ok(stats)
    }
}
