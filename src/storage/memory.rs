//! In-memory implementation of every persistence collaborator.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    AggregateRecord, AggregateStore, AggregateUpdate, PreferenceStore, Target, TargetRepository,
    UsageLedger, UsageRecord,
};
use crate::capabilities::Preferences;
use crate::errors::PersistenceError;

/// Process-local store for targets, preferences, aggregates and usage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    targets: RwLock<HashMap<String, Target>>,
    preferences: RwLock<HashMap<String, Preferences>>,
    aggregates: RwLock<HashMap<String, AggregateRecord>>,
    usage: RwLock<Vec<UsageRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_target(&self, target: Target) {
        self.targets.write().insert(target.id.clone(), target);
    }

    pub fn set_preferences(&self, actor_id: &str, preferences: Preferences) {
        self.preferences
            .write()
            .insert(actor_id.to_string(), preferences);
    }

    /// Every usage record, in append order.
    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage.read().clone()
    }
}

#[async_trait]
impl TargetRepository for MemoryStore {
    async fn load_target(&self, id: &str, actor_id: &str) -> Result<Option<Target>, PersistenceError> {
        Ok(self
            .targets
            .read()
            .get(id)
            .filter(|target| target.owner_id == actor_id)
            .cloned())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn load_preferences(&self, actor_id: &str) -> Result<Option<Preferences>, PersistenceError> {
        Ok(self.preferences.read().get(actor_id).cloned())
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn load(&self, target_id: &str) -> Result<Option<AggregateRecord>, PersistenceError> {
        Ok(self.aggregates.read().get(target_id).cloned())
    }

    async fn save(&self, record: &AggregateRecord) -> Result<(), PersistenceError> {
        self.aggregates
            .write()
            .insert(record.target_id.clone(), record.clone());
        Ok(())
    }

    async fn merge(
        &self,
        target_id: &str,
        update: &AggregateUpdate,
    ) -> Result<AggregateRecord, PersistenceError> {
        let mut aggregates = self.aggregates.write();
        let record = aggregates
            .entry(target_id.to_string())
            .or_insert_with(|| AggregateRecord::new(target_id, update.enriched_at));
        record.apply(update);
        Ok(record.clone())
    }
}

#[async_trait]
impl UsageLedger for MemoryStore {
    async fn append(&self, record: UsageRecord) -> Result<(), PersistenceError> {
        self.usage.write().push(record);
        Ok(())
    }

    async fn count_since(
        &self,
        actor_id: &str,
        service: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, PersistenceError> {
        Ok(self
            .usage
            .read()
            .iter()
            .filter(|r| r.actor_id == actor_id && r.service == service && r.recorded_at > since)
            .count() as u64)
    }

    async fn oldest_since(
        &self,
        actor_id: &str,
        service: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, PersistenceError> {
        Ok(self
            .usage
            .read()
            .iter()
            .filter(|r| r.actor_id == actor_id && r.service == service && r.recorded_at > since)
            .map(|r| r.recorded_at)
            .min())
    }

    async fn calls_by_service_since(
        &self,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<String, u64>, PersistenceError> {
        let mut totals = BTreeMap::new();
        for record in self
            .usage
            .read()
            .iter()
            .filter(|r| r.actor_id == actor_id && r.recorded_at > since)
        {
            *totals.entry(record.service.clone()).or_insert(0) += u64::from(record.call_count);
        }
        Ok(totals)
    }
}
