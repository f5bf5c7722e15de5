//! # Enrichment orchestrator
//!
//! Runs every applicable capability for one target concurrently, then merges
//! the outcomes into the target's [`AggregateRecord`].
//!
//! ## Flow of `enrich_target`
//!
//! 1. Load the target, scoped to the actor (`NotFound` otherwise)
//! 2. Non-cached runs only: admit the run through the per-actor [`Throttle`]
//! 3. Resolve actor preferences (empty when none are stored)
//! 4. Select: enabled, matching the filters, `should_run(preferences)`
//! 5. Fan out: cache lookup, then fetch and cache on a miss, under one
//!    request deadline
//! 6. Fan in: merge successful payloads by capability name and save
//! 7. Record usage for every capability that made external calls
//!
//! Capability failures never fail the run, panics included; only steps 1,
//! 2 and the persistence writes do.

pub mod report;
pub mod single_flight;
pub mod throttle;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::{Cache, CacheError, MemoryCache, SqliteCache};
use crate::capabilities::{
    CallMeter, Capability, CapabilityDescriptor, CapabilityError, CapabilityRegistry,
    CapabilityResult, EnrichmentRequest,
};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::errors::{EnrichmentError, PersistenceError};
use crate::storage::{
    AggregateRecord, AggregateStore, AggregateUpdate, Database, MemoryStore, PreferenceStore,
    SqliteStore, TargetRepository, UsageLedger, UsageRecord,
};

pub use report::{EnrichOptions, EnrichmentReport};
pub use single_flight::SingleFlight;
pub use throttle::{Throttle, ENRICHMENT_SERVICE};

/// The persistence collaborators an orchestrator talks to.
#[derive(Clone)]
pub struct Stores {
    pub targets: Arc<dyn TargetRepository>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub aggregates: Arc<dyn AggregateStore>,
    pub ledger: Arc<dyn UsageLedger>,
}

impl Stores {
    /// Every collaborator backed by the same in-memory store.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            targets: store.clone(),
            preferences: store.clone(),
            aggregates: store.clone(),
            ledger: store,
        }
    }
}

/// Fan-out/fan-in engine over a [`CapabilityRegistry`].
pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    cache: Cache,
    stores: Stores,
    clock: Arc<dyn Clock>,
    throttle: Throttle,
    single_flight: Option<SingleFlight>,
    deadline: Option<std::time::Duration>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("throttle", &self.throttle)
            .field("single_flight", &self.single_flight.is_some())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Orchestrator with default limits: 10 non-cached runs per hour, a 30s
    /// request deadline and single-flight enabled.
    pub fn new(registry: Arc<CapabilityRegistry>, cache: Cache, stores: Stores) -> Self {
        let defaults = Settings::default();
        Self {
            registry,
            cache,
            stores,
            clock: Arc::new(SystemClock),
            throttle: Throttle::from(&defaults.rate_limit),
            single_flight: defaults.orchestrator.single_flight.then(SingleFlight::new),
            deadline: defaults.orchestrator.request_deadline(),
        }
    }

    /// Build the default registry and storage from `settings`.
    ///
    /// With a `database_path`, the cache, aggregates and usage ledger share
    /// one SQLite file; otherwise they live in memory. Targets and
    /// preferences always come from the host.
    pub fn from_settings(
        settings: &Settings,
        targets: Arc<dyn TargetRepository>,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Result<Self, PersistenceError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let registry = Arc::new(CapabilityRegistry::with_defaults(settings));

        let (cache, aggregates, ledger): (Cache, Arc<dyn AggregateStore>, Arc<dyn UsageLedger>) =
            match &settings.database_path {
                Some(path) => {
                    let db = Database::open(path)?;
                    let store = Arc::new(SqliteStore::new(db.clone()));
                    log::info!("Using SQLite storage at {}", path.display());
                    (
                        Cache::new(Arc::new(SqliteCache::new(db, clock.clone()))),
                        store.clone(),
                        store,
                    )
                }
                None => {
                    let store = Arc::new(MemoryStore::new());
                    (
                        Cache::new(Arc::new(MemoryCache::new(clock.clone()))),
                        store.clone(),
                        store,
                    )
                }
            };

        let stores = Stores {
            targets,
            preferences,
            aggregates,
            ledger,
        };
        Ok(Self::new(registry, cache, stores)
            .with_clock(clock)
            .with_settings(settings))
    }

    /// Apply the rate-limit and orchestrator sections of `settings`.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.throttle = Throttle::from(&settings.rate_limit);
        self.single_flight = settings.orchestrator.single_flight.then(SingleFlight::new);
        self.deadline = settings.orchestrator.request_deadline();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rate_limit(mut self, ceiling: u32, window: Duration) -> Self {
        self.throttle = Throttle::new(ceiling, window);
        self
    }

    /// `None` disables the deadline.
    pub fn with_deadline(mut self, deadline: Option<std::time::Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled.then(SingleFlight::new);
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn list_capabilities(&self) -> Vec<CapabilityDescriptor> {
        self.registry.descriptors()
    }

    pub fn capability_health(&self) -> BTreeMap<String, bool> {
        self.registry.health()
    }

    pub fn missing_configuration(&self) -> BTreeMap<String, Vec<String>> {
        self.registry.missing_configuration()
    }

    /// Non-cached runs `actor_id` may still start in the current window.
    pub async fn remaining_enrichments(&self, actor_id: &str) -> Result<u32, EnrichmentError> {
        self.throttle
            .remaining(self.stores.ledger.as_ref(), actor_id, self.clock.now())
            .await
    }

    /// External calls per service made for `actor_id` since `since`.
    pub async fn usage_since(
        &self,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<BTreeMap<String, u64>, EnrichmentError> {
        Ok(self
            .stores
            .ledger
            .calls_by_service_since(actor_id, since)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Enrichment
    // -----------------------------------------------------------------------

    /// Enrich one target on behalf of `actor_id`.
    pub async fn enrich_target(
        &self,
        target_id: &str,
        actor_id: &str,
        options: &EnrichOptions,
    ) -> Result<EnrichmentReport, EnrichmentError> {
        let target = self
            .stores
            .targets
            .load_target(target_id, actor_id)
            .await?
            .ok_or_else(|| EnrichmentError::NotFound {
                resource: "target",
                id: target_id.to_string(),
            })?;

        if !options.use_cached {
            self.throttle
                .admit(self.stores.ledger.as_ref(), actor_id, self.clock.now())
                .await?;
        }

        let preferences = self
            .stores
            .preferences
            .load_preferences(actor_id)
            .await?
            .unwrap_or_default();

        let selected: Vec<Arc<dyn Capability>> = self
            .registry
            .enabled()
            .into_iter()
            .filter(|c| {
                let descriptor = c.descriptor();
                options.selects(&descriptor.name, descriptor.category)
            })
            .filter(|c| c.should_run(Some(&preferences)))
            .collect();

        let run_id = Uuid::new_v4();
        log::debug!(
            "Run {}: enriching target {} with {} capabilities (use_cached={})",
            run_id,
            target_id,
            selected.len(),
            options.use_cached
        );

        let request = Arc::new(
            EnrichmentRequest::new(target.latitude, target.longitude, &target.address)
                .with_context(target.context.clone())
                .with_preferences(preferences),
        );
        let deadline = self.deadline.map(|d| Instant::now() + d);

        let results = join_all(selected.iter().map(|capability| {
            self.run_capability(
                Arc::clone(capability),
                Arc::clone(&request),
                options.use_cached,
                deadline,
            )
        }))
        .await;

        let results: BTreeMap<String, CapabilityResult> = results
            .into_iter()
            .map(|r| (r.capability().to_string(), r))
            .collect();

        let now = self.clock.now();
        let record = self.merge_and_save(target_id, &selected, &results, now).await?;
        self.record_usage(actor_id, &results, now).await?;

        let report = EnrichmentReport::new(run_id, target_id, results, record);
        log::info!(
            "Run {}: enriched target {}: {} run, {} ok, {} failed, {} cached, {} external calls",
            run_id,
            target_id,
            report.total,
            report.successful,
            report.failed,
            report.cached,
            report.external_calls
        );
        Ok(report)
    }

    /// Cache-then-fetch for one capability, bounded by `deadline`.
    ///
    /// A panic anywhere in the capability is reported as its failure.
    async fn run_capability(
        &self,
        capability: Arc<dyn Capability>,
        request: Arc<EnrichmentRequest>,
        use_cached: bool,
        deadline: Option<Instant>,
    ) -> CapabilityResult {
        let name = capability.descriptor().name.clone();
        let meter = CallMeter::new();
        let request = Arc::new(request.as_ref().clone().with_call_meter(meter.clone()));

        let task = async {
            let key = capability.cache_key(&request);
            if use_cached {
                match self.cache.get_json::<Value>(&key).await {
                    Ok(Some(payload)) => {
                        log::debug!("Cache hit for {}", key);
                        return CapabilityResult::cached(&name, payload);
                    }
                    Ok(None) => log::debug!("Cache miss for {}", key),
                    Err(e) => log::warn!("Cache read for {} failed, fetching: {}", key, e),
                }
            }

            let fetch = fetch_and_store(
                Arc::clone(&capability),
                Arc::clone(&request),
                self.cache.clone(),
                key.clone(),
            );
            match &self.single_flight {
                Some(flights) => flights.run(&key, fetch).await,
                None => fetch.await,
            }
        };
        let task = AssertUnwindSafe(task).catch_unwind().map(|outcome| {
            outcome.unwrap_or_else(|_| {
                log::error!("Capability {} panicked", name);
                CapabilityResult::failure(&name, PANICKED, meter.count())
            })
        });

        match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, task).await {
                Ok(result) => result,
                Err(_) => {
                    log::warn!("Capability {} did not finish before the request deadline", name);
                    CapabilityResult::failure(
                        &name,
                        CapabilityError::Timeout.to_string(),
                        meter.count(),
                    )
                }
            },
            None => task.await,
        }
    }

    /// Merge successful payloads into the stored aggregate.
    async fn merge_and_save(
        &self,
        target_id: &str,
        selected: &[Arc<dyn Capability>],
        results: &BTreeMap<String, CapabilityResult>,
        now: DateTime<Utc>,
    ) -> Result<AggregateRecord, EnrichmentError> {
        let mut payloads = BTreeMap::new();
        let mut shortest_ttl: Option<Duration> = None;
        for capability in selected {
            let descriptor = capability.descriptor();
            let Some(result) = results.get(&descriptor.name) else {
                continue;
            };
            let Some(payload) = result.payload() else {
                continue;
            };
            payloads.insert(descriptor.name.clone(), payload.clone());
            if !result.cache_hit() {
                let ttl = descriptor.cache_ttl();
                shortest_ttl = Some(shortest_ttl.map_or(ttl, |current| current.min(ttl)));
            }
        }

        let update = AggregateUpdate {
            payloads,
            enriched_at: now,
            cache_expires_at: shortest_ttl.map(|ttl| now + ttl),
        };
        match self.stores.aggregates.merge(target_id, &update).await {
            Ok(record) => Ok(record),
            Err(e) => {
                log::error!("Failed to save aggregate for target {}: {}", target_id, e);
                Err(e.into())
            }
        }
    }

    /// One ledger line per capability that called out.
    async fn record_usage(
        &self,
        actor_id: &str,
        results: &BTreeMap<String, CapabilityResult>,
        now: DateTime<Utc>,
    ) -> Result<(), EnrichmentError> {
        for (name, result) in results {
            if result.external_calls() == 0 {
                continue;
            }
            let record = UsageRecord::new(actor_id, name, result.external_calls(), now);
            if let Err(e) = self.stores.ledger.append(record).await {
                log::error!("Failed to record usage of {} for actor {}: {}", name, actor_id, e);
                return Err(e.into());
            }
        }
        Ok(())
    }
}

/// Failure message of a capability that panicked.
const PANICKED: &str = "capability panicked";

/// Fetch from upstream and cache a successful payload under the
/// capability's TTL. Owns its inputs so it can be shared across callers.
async fn fetch_and_store(
    capability: Arc<dyn Capability>,
    request: Arc<EnrichmentRequest>,
    cache: Cache,
    key: String,
) -> CapabilityResult {
    let result = match AssertUnwindSafe(capability.enrich(&request)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            let name = &capability.descriptor().name;
            log::error!("Capability {} panicked", name);
            return CapabilityResult::failure(name, PANICKED, request.calls().count());
        }
    };
    let Some(payload) = result.payload() else {
        return result;
    };

    let ttl = capability.descriptor().cache_ttl();
    match cache.set_json(&key, payload, Some(ttl)).await {
        Ok(()) => result,
        Err(e @ CacheError::Serialization { .. }) => {
            log::error!("Payload of {} cannot be cached: {}", result.capability(), e);
            result.into_failure(e.to_string())
        }
        Err(e) => {
            log::warn!("Failed to cache {}: {}", key, e);
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityDescriptor, Category, Preferences};
    use crate::clock::ManualClock;
    use crate::storage::Target;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns `{"n": <call number>}`, optionally failing or stalling.
    struct Counting {
        descriptor: CapabilityDescriptor,
        calls: AtomicU32,
        fail: bool,
        stall: Option<std::time::Duration>,
    }

    impl Counting {
        fn new(name: &str) -> Self {
            Self {
                descriptor: CapabilityDescriptor::new(name, Category::Environmental).ttl_days(90),
                calls: AtomicU32::new(0),
                fail: false,
                stall: None,
            }
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }

        fn stalling(mut self, by: std::time::Duration) -> Self {
            self.stall = Some(by);
            self
        }

        fn ttl_days(mut self, days: u64) -> Self {
            self.descriptor = self.descriptor.ttl_days(days);
            self
        }
    }

    #[async_trait]
    impl Capability for Counting {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn enrich(&self, _request: &EnrichmentRequest) -> CapabilityResult {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            if self.fail {
                CapabilityResult::failure(&self.descriptor.name, "connection reset", 1)
            } else {
                CapabilityResult::success(&self.descriptor.name, json!({ "n": n }), 1)
            }
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(capabilities: Vec<Arc<dyn Capability>>) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        store.insert_target(Target {
            id: "t-1".to_string(),
            owner_id: "alice".to_string(),
            address: "1 Main St".to_string(),
            latitude: 40.7128,
            longitude: -74.006,
            context: HashMap::new(),
        });
        let orchestrator = Orchestrator::new(
            Arc::new(CapabilityRegistry::with_capabilities(capabilities)),
            Cache::in_memory(clock.clone()),
            Stores::in_memory(store.clone()),
        )
        .with_clock(clock.clone());
        Fixture {
            orchestrator,
            store,
            clock,
        }
    }

    #[tokio::test]
    async fn test_unknown_or_foreign_target_is_not_found() {
        let f = fixture(vec![Arc::new(Counting::new("a"))]);

        let missing = f
            .orchestrator
            .enrich_target("nope", "alice", &EnrichOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(missing, EnrichmentError::NotFound { .. }));

        let foreign = f
            .orchestrator
            .enrich_target("t-1", "mallory", &EnrichOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(foreign, EnrichmentError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cache_then_fetch() {
        let cap = Arc::new(Counting::new("a"));
        let f = fixture(vec![cap.clone()]);

        let first = f
            .orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::default())
            .await
            .unwrap();
        let second = f
            .orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::default())
            .await
            .unwrap();

        assert_eq!(first.external_calls, 1);
        assert_eq!(second.external_calls, 0);
        assert_eq!(second.cached, 1);
        assert_eq!(cap.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            second.result("a").unwrap().payload(),
            first.result("a").unwrap().payload()
        );
        // Cache hits are not billed.
        assert_eq!(f.store.usage_records().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_run_bypasses_cache_and_is_throttled() {
        let cap = Arc::new(Counting::new("a"));
        let f = fixture(vec![cap.clone()]);
        let orchestrator = f.orchestrator.with_rate_limit(1, Duration::hours(1));

        orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::default())
            .await
            .unwrap();
        let fresh = orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::fresh())
            .await
            .unwrap();
        assert_eq!(fresh.external_calls, 1);
        assert_eq!(fresh.result("a").unwrap().payload(), Some(&json!({"n": 2})));

        let err = orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::fresh())
            .await
            .unwrap_err();
        assert!(err.retry_after_secs().is_some());
        // Cached runs skip the throttle entirely.
        orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::default())
            .await
            .unwrap();
        assert_eq!(orchestrator.remaining_enrichments("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_not_merged() {
        let f = fixture(vec![
            Arc::new(Counting::new("a")),
            Arc::new(Counting::new("b").failing()),
        ]);

        let report = f
            .orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::default())
            .await
            .unwrap();

        assert_eq!((report.total, report.successful, report.failed), (2, 1, 1));
        assert_eq!(report.errors().get("b"), Some(&"connection reset"));
        assert!(report.record.payload("b").is_none());
        // The failure is billed but not cached.
        assert_eq!(f.store.usage_records().len(), 2);
        assert!(!f
            .orchestrator
            .cache()
            .exists("b:40.7128:-74.0060")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_filters_and_should_run() {
        struct NeedsPref(CapabilityDescriptor);

        #[async_trait]
        impl Capability for NeedsPref {
            fn descriptor(&self) -> &CapabilityDescriptor {
                &self.0
            }
            async fn enrich(&self, _request: &EnrichmentRequest) -> CapabilityResult {
                CapabilityResult::success(&self.0.name, json!(true), 1)
            }
            fn should_run(&self, preferences: Option<&Preferences>) -> bool {
                preferences.map_or(false, |p| p.contains_key("wanted"))
            }
        }

        let f = fixture(vec![
            Arc::new(Counting::new("a")),
            Arc::new(NeedsPref(CapabilityDescriptor::new("p", Category::Risk))),
            Arc::new(Counting {
                descriptor: CapabilityDescriptor::new("off", Category::Risk).enabled(false),
                ..Counting::new("off")
            }),
        ]);

        let all = f
            .orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::default())
            .await
            .unwrap();
        assert_eq!(all.results.keys().collect::<Vec<_>>(), vec!["a"]);

        let mut prefs = Preferences::new();
        prefs.insert("wanted".to_string(), json!(1));
        f.store.set_preferences("alice", prefs);
        let risk = f
            .orchestrator
            .enrich_target(
                "t-1",
                "alice",
                &EnrichOptions::default().in_categories([Category::Risk]),
            )
            .await
            .unwrap();
        assert_eq!(risk.results.keys().collect::<Vec<_>>(), vec!["p"]);
    }

    #[tokio::test]
    async fn test_deadline_marks_stragglers_as_timeout() {
        let f = fixture(vec![
            Arc::new(Counting::new("fast")),
            Arc::new(Counting::new("slow").stalling(std::time::Duration::from_secs(5))),
        ]);
        let orchestrator = f
            .orchestrator
            .with_deadline(Some(std::time::Duration::from_millis(50)));

        let report = orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::default())
            .await
            .unwrap();

        assert!(report.result("fast").unwrap().is_success());
        let slow = report.result("slow").unwrap();
        assert_eq!(slow.error(), Some("timeout"));
        assert_eq!(slow.external_calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_expiry_tracks_shortest_fresh_ttl() {
        let f = fixture(vec![
            Arc::new(Counting::new("long").ttl_days(365)),
            Arc::new(Counting::new("short").ttl_days(7)),
        ]);
        let start = f.clock.now();

        let report = f
            .orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::default())
            .await
            .unwrap();
        assert_eq!(report.record.cache_expires_at, Some(start + Duration::days(7)));
        assert_eq!(report.record.last_enriched_at, Some(start));
    }

    #[tokio::test]
    async fn test_single_flight_bills_once() {
        let cap = Arc::new(Counting::new("a").stalling(std::time::Duration::from_millis(50)));
        let f = fixture(vec![cap.clone()]);

        let options = EnrichOptions::default();
        let (one, two) = tokio::join!(
            f.orchestrator.enrich_target("t-1", "alice", &options),
            f.orchestrator.enrich_target("t-1", "alice", &options),
        );

        assert_eq!(cap.calls.load(Ordering::SeqCst), 1);
        assert_eq!(one.unwrap().external_calls + two.unwrap().external_calls, 1);
        assert_eq!(f.store.usage_records().len(), 1);
    }

    #[tokio::test]
    async fn test_status_views() {
        let f = fixture(vec![Arc::new(Counting::new("a"))]);
        assert_eq!(f.orchestrator.list_capabilities().len(), 1);
        assert_eq!(
            f.orchestrator.capability_health(),
            BTreeMap::from([("a".to_string(), true)])
        );
        assert!(f.orchestrator.missing_configuration().is_empty());

        f.orchestrator
            .enrich_target("t-1", "alice", &EnrichOptions::fresh())
            .await
            .unwrap();
        let usage = f
            .orchestrator
            .usage_since("alice", f.clock.now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(usage.get("a"), Some(&1));
        assert_eq!(usage.get(ENRICHMENT_SERVICE), Some(&1));
    }

    #[tokio::test]
    async fn test_from_settings_with_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            database_path: Some(dir.path().join("enrich.db")),
            ..Settings::default()
        };
        let store = Arc::new(MemoryStore::new());

        let orchestrator = Orchestrator::from_settings(&settings, store.clone(), store).unwrap();

        assert_eq!(orchestrator.list_capabilities().len(), 7);
        assert!(dir.path().join("enrich.db").exists());
    }
}
