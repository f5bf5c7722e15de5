//! Request options and the per-run summary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::capabilities::{CapabilityResult, Category};
use crate::storage::AggregateRecord;

/// Options of one `enrich_target` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichOptions {
    /// Serve cache hits. `false` forces fresh fetches and is throttled.
    pub use_cached: bool,
    /// Restrict the run to these capability names.
    pub capabilities: Option<Vec<String>>,
    /// Restrict the run to these categories.
    pub categories: Option<Vec<Category>>,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            use_cached: true,
            capabilities: None,
            categories: None,
        }
    }
}

impl EnrichOptions {
    /// Bypass the cache.
    pub fn fresh() -> Self {
        Self {
            use_cached: false,
            ..Self::default()
        }
    }

    pub fn use_cached(mut self, use_cached: bool) -> Self {
        self.use_cached = use_cached;
        self
    }

    pub fn only<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn in_categories<I>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = Category>,
    {
        self.categories = Some(categories.into_iter().collect());
        self
    }

    /// Whether a capability passes both filters.
    pub fn selects(&self, name: &str, category: Category) -> bool {
        let by_name = self
            .capabilities
            .as_ref()
            .map_or(true, |names| names.iter().any(|n| n == name));
        let by_category = self
            .categories
            .as_ref()
            .map_or(true, |categories| categories.contains(&category));
        by_name && by_category
    }
}

/// Summary of one enrichment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    /// Identifies this run in logs.
    pub run_id: Uuid,
    pub target_id: String,
    /// Capabilities run.
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Successful results served from the cache.
    pub cached: usize,
    /// External calls made by this run.
    pub external_calls: u32,
    /// Per-capability outcome, keyed by capability name.
    pub results: BTreeMap<String, CapabilityResult>,
    /// The aggregate as persisted by this run.
    pub record: AggregateRecord,
}

impl EnrichmentReport {
    pub(crate) fn new(
        run_id: Uuid,
        target_id: &str,
        results: BTreeMap<String, CapabilityResult>,
        record: AggregateRecord,
    ) -> Self {
        let successful = results.values().filter(|r| r.is_success()).count();
        Self {
            run_id,
            target_id: target_id.to_string(),
            total: results.len(),
            successful,
            failed: results.len() - successful,
            cached: results.values().filter(|r| r.cache_hit()).count(),
            external_calls: results.values().map(CapabilityResult::external_calls).sum(),
            results,
            record,
        }
    }

    pub fn result(&self, capability: &str) -> Option<&CapabilityResult> {
        self.results.get(capability)
    }

    /// Failure messages by capability name.
    pub fn errors(&self) -> BTreeMap<&str, &str> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.error().map(|e| (name.as_str(), e)))
            .collect()
    }

    /// Payloads produced by this run, by capability name.
    pub fn payloads(&self) -> BTreeMap<&str, &Value> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.payload().map(|p| (name.as_str(), p)))
            .collect()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.record.last_enriched_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filters_intersect() {
        let options = EnrichOptions::default()
            .only(["climate", "flood_risk"])
            .in_categories([Category::Risk]);

        assert!(options.selects("flood_risk", Category::Risk));
        assert!(!options.selects("climate", Category::Climate));
        assert!(!options.selects("walkability", Category::Risk));
        assert!(EnrichOptions::default().selects("anything", Category::Commute));
    }

    #[test]
    fn test_counts() {
        let results = BTreeMap::from([
            ("a".to_string(), CapabilityResult::success("a", json!(1), 2)),
            ("b".to_string(), CapabilityResult::cached("b", json!(2))),
            ("c".to_string(), CapabilityResult::failure("c", "boom", 3)),
        ]);
        let record = AggregateRecord::new("t", Utc::now());
        let report = EnrichmentReport::new(Uuid::new_v4(), "t", results, record);

        assert_eq!(report.total, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.cached, 1);
        assert_eq!(report.external_calls, 5);
        assert_eq!(report.errors(), BTreeMap::from([("c", "boom")]));
        assert_eq!(report.payloads().len(), 2);
    }
}
