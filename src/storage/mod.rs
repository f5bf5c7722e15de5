//! # Persistence collaborators
//!
//! The orchestrator never owns storage. It talks to four narrow traits:
//!
//! - [`TargetRepository`] — the addresses being enriched, scoped to their owner
//! - [`PreferenceStore`] — per-actor preferences handed to capabilities
//! - [`AggregateStore`] — one [`AggregateRecord`] per target
//! - [`UsageLedger`] — append-only [`UsageRecord`]s for throttling and cost
//!
//! [`MemoryStore`] implements all four for embedding and tests;
//! [`SqliteStore`] persists aggregates and usage.

pub mod database;
pub mod memory;
pub mod sqlite;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capabilities::Preferences;
use crate::errors::PersistenceError;

pub use database::Database;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// A real-world address owned by an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub owner_id: String,
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Extra facts about the target (listing price, bedrooms, ...) passed to
    /// capabilities as context.
    #[serde(default)]
    pub context: HashMap<String, Value>,
}

/// Merged output of every capability for one target.
///
/// Keys are capability names. A run only ever replaces the entries of the
/// capabilities that succeeded in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub target_id: String,
    pub data: BTreeMap<String, Value>,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub cache_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AggregateRecord {
    /// Empty record, not yet persisted.
    pub fn new(target_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            target_id: target_id.to_string(),
            data: BTreeMap::new(),
            last_enriched_at: None,
            cache_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the stored payload of one capability.
    pub fn merge_payload(&mut self, capability: &str, payload: Value) {
        self.data.insert(capability.to_string(), payload);
    }

    pub fn payload(&self, capability: &str) -> Option<&Value> {
        self.data.get(capability)
    }

    /// Apply one run's changes on top of this record.
    pub fn apply(&mut self, update: &AggregateUpdate) {
        for (capability, payload) in &update.payloads {
            self.merge_payload(capability, payload.clone());
        }
        self.last_enriched_at = Some(update.enriched_at);
        self.updated_at = update.enriched_at;
        if let Some(expires_at) = update.cache_expires_at {
            self.cache_expires_at = Some(expires_at);
        }
    }
}

/// What one enrichment run changes in a target's aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateUpdate {
    /// Successful payloads of the run, by capability name.
    pub payloads: BTreeMap<String, Value>,
    pub enriched_at: DateTime<Utc>,
    /// Set when the run fetched anything fresh.
    pub cache_expires_at: Option<DateTime<Utc>>,
}

/// One ledger line: `call_count` external calls made for `actor_id` against
/// `service` at `recorded_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub actor_id: String,
    pub service: String,
    pub call_count: u32,
    pub recorded_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(actor_id: &str, service: &str, call_count: u32, recorded_at: DateTime<Utc>) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            service: service.to_string(),
            call_count,
            recorded_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TargetRepository: Send + Sync {
    /// The target, only if it exists and is owned by `actor_id`.
    async fn load_target(&self, id: &str, actor_id: &str) -> Result<Option<Target>, PersistenceError>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn load_preferences(&self, actor_id: &str) -> Result<Option<Preferences>, PersistenceError>;
}

#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn load(&self, target_id: &str) -> Result<Option<AggregateRecord>, PersistenceError>;

    /// Insert or replace the whole record.
    async fn save(&self, record: &AggregateRecord) -> Result<(), PersistenceError>;

    /// Load the record (or start a new one), apply `update` and save it, as
    /// one atomic step. Concurrent merges on the same target never drop each
    /// other's capability keys.
    async fn merge(
        &self,
        target_id: &str,
        update: &AggregateUpdate,
    ) -> Result<AggregateRecord, PersistenceError>;
}

#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn append(&self, record: UsageRecord) -> Result<(), PersistenceError>;

    /// Number of records for (`actor_id`, `service`) strictly after `since`.
    async fn count_since(
        &self,
        actor_id: &str,
        service: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, PersistenceError>;

    /// Timestamp of the oldest record for (`actor_id`, `service`) strictly
    /// after `since`.
    async fn oldest_since(
        &self,
        actor_id: &str,
        service: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, PersistenceError>;

    /// Sum of `call_count` per service for `actor_id` strictly after `since`.
    async fn calls_by_service_since(
        &self,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<String, u64>, PersistenceError>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}
