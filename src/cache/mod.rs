//! # Cache layer
//!
//! A TTL key/value store that sits in front of every external call.
//!
//! - Values are opaque strings to the store; [`Cache`] adds typed JSON
//!   (de)serialization on top.
//! - Reading an expired entry deletes it and reports a miss, so correctness
//!   never depends on a background sweep. [`CacheStore::clear_expired`]
//!   exists for hygiene only.
//! - Every hit bumps the entry's access counter and last-access timestamp.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::errors::PersistenceError;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The value could not be serialized. Raised before anything is written.
    #[error("Cache value for {key} is not serializable: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value did not decode into the requested type.
    #[error("Cached value for {key} could not be decoded: {source}")]
    Deserialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backing store failed.
    #[error("Cache backend error: {0}")]
    Backend(#[from] PersistenceError),
}

/// One stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_count: u64,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    /// An entry is expired once its expiry instant has been reached.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(false, |expires_at| expires_at <= now)
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// All stored entries, live or expired.
    pub total: u64,
    /// Entries that have not yet expired.
    pub active: u64,
    /// Entries past their expiry that have not been read or swept yet.
    pub expired: u64,
    /// Sum of access counters over all stored entries.
    pub accesses: u64,
}

/// Expiry instant for a write at `now` with optional `ttl`.
pub(crate) fn expiry_for(now: DateTime<Utc>, ttl: Option<Duration>) -> Option<DateTime<Utc>> {
    ttl.map(|ttl| now + ttl)
}

// ---------------------------------------------------------------------------
// CacheStore
// ---------------------------------------------------------------------------

/// Backend contract shared by the in-memory and SQLite caches.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Live value for `key`. Deletes the entry and returns `None` if expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Insert or replace `key`. `ttl = None` never expires.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Remove `key`. Returns whether an entry existed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Whether a live entry exists. Does not count as an access.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every expired entry, returning how many were removed.
    async fn clear_expired(&self) -> Result<u64, CacheError>;

    /// Remove every entry, returning how many were removed.
    async fn clear_all(&self) -> Result<u64, CacheError>;

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// Cloneable handle over a [`CacheStore`] with typed JSON helpers.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Process-local cache driven by `clock`.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(MemoryCache::new(clock)))
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Decode the live value for `key`.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.store.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|source| CacheError::Deserialization {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Encode and store `value`. Encoding failures are returned before the
    /// store is touched.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value).map_err(|source| CacheError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.store.set(key, raw, ttl).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.store.get(key).await
    }

    pub async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        self.store.set(key, value, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.store.delete(key).await
    }

    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.store.exists(key).await
    }

    pub async fn clear_expired(&self) -> Result<u64, CacheError> {
        self.store.clear_expired().await
    }

    pub async fn clear_all(&self) -> Result<u64, CacheError> {
        self.store.clear_all().await
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        self.store.stats().await
    }
}
