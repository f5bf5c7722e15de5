//! SQLite cache backend (`cache_entries` table).
//!
//! Timestamps are stored as Unix milliseconds.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use rusqlite::{params, OptionalExtension};

use super::{expiry_for, CacheError, CacheStats, CacheStore};
use crate::clock::Clock;
use crate::storage::database::Database;
use crate::storage::{from_millis, to_millis};

/// Persistent [`CacheStore`] sharing the engine's [`Database`].
pub struct SqliteCache {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl SqliteCache {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Access count and last access of `key`, for diagnostics.
    pub async fn access_info(
        &self,
        key: &str,
    ) -> Result<Option<(u64, Option<chrono::DateTime<chrono::Utc>>)>, CacheError> {
        let key = key.to_string();
        let row = self
            .db
            .run(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT access_count, last_accessed_at FROM cache_entries WHERE key = ?1",
                        params![key],
                        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        Ok(row.map(|(count, last)| (count.max(0) as u64, last.map(from_millis))))
    }
}

#[async_trait]
impl CacheStore for SqliteCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = to_millis(self.clock.now());
        let key = key.to_string();
        let value = self
            .db
            .run(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT value, expires_at FROM cache_entries WHERE key = ?1",
                        params![key],
                        |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?)),
                    )
                    .optional()?;

                let Some((value, expires_at)) = row else {
                    return Ok(None);
                };
                if expires_at.map_or(false, |expires_at| expires_at <= now) {
                    conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                    log::debug!("Cache entry {} expired; deleted on read", key);
                    return Ok(None);
                }

                conn.execute(
                    "UPDATE cache_entries
                     SET access_count = access_count + 1, last_accessed_at = ?2
                     WHERE key = ?1",
                    params![key, now],
                )?;
                Ok(Some(value))
            })
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), CacheError> {
        let now = self.clock.now();
        let expires_at = expiry_for(now, ttl).map(to_millis);
        let now = to_millis(now);
        let key = key.to_string();
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO cache_entries (key, value, expires_at, access_count, created_at, updated_at)
                     VALUES (?1, ?2, ?3, 0, ?4, ?4)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at,
                        updated_at = excluded.updated_at",
                    params![key, value, expires_at, now],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        let removed = self
            .db
            .run(move |conn| {
                Ok(conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?)
            })
            .await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = to_millis(self.clock.now());
        let key = key.to_string();
        let exists = self
            .db
            .run(move |conn| {
                let expires_at = conn
                    .query_row(
                        "SELECT expires_at FROM cache_entries WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, Option<i64>>(0),
                    )
                    .optional()?;
                match expires_at {
                    None => Ok(false),
                    Some(Some(expires_at)) if expires_at <= now => {
                        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                        Ok(false)
                    }
                    Some(_) => Ok(true),
                }
            })
            .await?;
        Ok(exists)
    }

    async fn clear_expired(&self) -> Result<u64, CacheError> {
        let now = to_millis(self.clock.now());
        let removed = self
            .db
            .run(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now],
                )?)
            })
            .await?;
        Ok(removed as u64)
    }

    async fn clear_all(&self) -> Result<u64, CacheError> {
        let removed = self
            .db
            .run(|conn| Ok(conn.execute("DELETE FROM cache_entries", [])?))
            .await?;
        Ok(removed as u64)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let now = to_millis(self.clock.now());
        let (total, expired, accesses) = self
            .db
            .run(move |conn| {
                Ok(conn.query_row(
                    "SELECT
                        COUNT(*),
                        COALESCE(SUM(CASE WHEN expires_at IS NOT NULL AND expires_at <= ?1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(access_count), 0)
                     FROM cache_entries",
                    params![now],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, i64>(2)?,
                        ))
                    },
                )?)
            })
            .await?;

        let total = total.max(0) as u64;
        let expired = expired.max(0) as u64;
        Ok(CacheStats {
            total,
            active: total - expired,
            expired,
            accesses: accesses.max(0) as u64,
        })
    }
}
