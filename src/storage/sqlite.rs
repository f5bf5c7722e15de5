//! SQLite persistence for aggregates and the usage ledger.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use super::database::Database;
use super::{
    from_millis, to_millis, AggregateRecord, AggregateStore, AggregateUpdate, UsageLedger,
    UsageRecord,
};
use crate::errors::PersistenceError;

/// [`AggregateStore`] and [`UsageLedger`] over the shared [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

fn read_aggregate(
    conn: &Connection,
    target_id: &str,
) -> Result<Option<AggregateRecord>, PersistenceError> {
    let row = conn
        .query_row(
            "SELECT data, last_enriched_at, cache_expires_at, created_at, updated_at
             FROM aggregate_records WHERE target_id = ?1",
            params![target_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((data, last_enriched_at, cache_expires_at, created_at, updated_at)) => {
            Ok(Some(AggregateRecord {
                target_id: target_id.to_string(),
                data: serde_json::from_str(&data)?,
                last_enriched_at: last_enriched_at.map(from_millis),
                cache_expires_at: cache_expires_at.map(from_millis),
                created_at: from_millis(created_at),
                updated_at: from_millis(updated_at),
            }))
        }
        None => Ok(None),
    }
}

fn write_aggregate(conn: &Connection, record: &AggregateRecord) -> Result<(), PersistenceError> {
    conn.execute(
        "INSERT INTO aggregate_records
            (target_id, data, last_enriched_at, cache_expires_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(target_id) DO UPDATE SET
            data = excluded.data,
            last_enriched_at = excluded.last_enriched_at,
            cache_expires_at = excluded.cache_expires_at,
            updated_at = excluded.updated_at",
        params![
            record.target_id,
            serde_json::to_string(&record.data)?,
            record.last_enriched_at.map(to_millis),
            record.cache_expires_at.map(to_millis),
            to_millis(record.created_at),
            to_millis(record.updated_at),
        ],
    )?;
    Ok(())
}

#[async_trait]
impl AggregateStore for SqliteStore {
    async fn load(&self, target_id: &str) -> Result<Option<AggregateRecord>, PersistenceError> {
        let target_id = target_id.to_string();
        self.db
            .run(move |conn| read_aggregate(conn, &target_id))
            .await
    }

    async fn save(&self, record: &AggregateRecord) -> Result<(), PersistenceError> {
        let record = record.clone();
        self.db
            .run(move |conn| write_aggregate(conn, &record))
            .await
    }

    async fn merge(
        &self,
        target_id: &str,
        update: &AggregateUpdate,
    ) -> Result<AggregateRecord, PersistenceError> {
        let target_id = target_id.to_string();
        let update = update.clone();
        self.db
            .run(move |conn| {
                // IMMEDIATE takes the write lock up front, so another process
                // cannot interleave between the read and the upsert.
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut record = read_aggregate(&tx, &target_id)?
                    .unwrap_or_else(|| AggregateRecord::new(&target_id, update.enriched_at));
                record.apply(&update);
                write_aggregate(&tx, &record)?;
                tx.commit()?;
                Ok(record)
            })
            .await
    }
}

#[async_trait]
impl UsageLedger for SqliteStore {
    async fn append(&self, record: UsageRecord) -> Result<(), PersistenceError> {
        self.db
            .run(move |conn| {
                conn.execute(
                    "INSERT INTO usage_records (actor_id, service, call_count, recorded_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        record.actor_id,
                        record.service,
                        record.call_count,
                        to_millis(record.recorded_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn count_since(
        &self,
        actor_id: &str,
        service: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        let actor_id = actor_id.to_string();
        let service = service.to_string();
        let since = to_millis(since);
        let count = self
            .db
            .run(move |conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM usage_records
                     WHERE actor_id = ?1 AND service = ?2 AND recorded_at > ?3",
                    params![actor_id, service, since],
                    |row| row.get::<_, i64>(0),
                )?)
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn oldest_since(
        &self,
        actor_id: &str,
        service: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, PersistenceError> {
        let actor_id = actor_id.to_string();
        let service = service.to_string();
        let since = to_millis(since);
        let oldest = self
            .db
            .run(move |conn| {
                Ok(conn.query_row(
                    "SELECT MIN(recorded_at) FROM usage_records
                     WHERE actor_id = ?1 AND service = ?2 AND recorded_at > ?3",
                    params![actor_id, service, since],
                    |row| row.get::<_, Option<i64>>(0),
                )?)
            })
            .await?;
        Ok(oldest.map(from_millis))
    }

    async fn calls_by_service_since(
        &self,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<String, u64>, PersistenceError> {
        let actor_id = actor_id.to_string();
        let since = to_millis(since);
        self.db
            .run(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT service, SUM(call_count) FROM usage_records
                     WHERE actor_id = ?1 AND recorded_at > ?2
                     GROUP BY service",
                )?;
                let rows = stmt.query_map(params![actor_id, since], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;

                let mut totals = BTreeMap::new();
                for row in rows {
                    let (service, calls) = row?;
                    totals.insert(service, calls.max(0) as u64);
                }
                Ok(totals)
            })
            .await
    }
}
