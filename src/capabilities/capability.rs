//! Capability contract — the unit of pluggable enrichment.
//!
//! A capability produces one kind of signal for a location (walkability,
//! flood zone, commute times, ...). It declares a static
//! [`CapabilityDescriptor`] and implements [`Capability::enrich`], the only
//! operation that performs I/O. `enrich` never fails: every problem is
//! captured in the returned [`CapabilityResult`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::cache_key::cache_key;
use crate::http::HttpError;

/// Free-form actor preferences (thresholds, points of interest, ...).
pub type Preferences = HashMap<String, Value>;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// Kind of signal a capability produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Walk/transit/bike scores.
    Location,
    /// Air quality, noise.
    Environmental,
    /// Flood and other hazard exposure.
    Risk,
    /// Nearby points of interest.
    Amenities,
    /// Travel times to the actor's own destinations.
    Commute,
    /// Long-run weather normals.
    Climate,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Location,
        Category::Environmental,
        Category::Risk,
        Category::Amenities,
        Category::Commute,
        Category::Climate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Location => "location",
            Category::Environmental => "environmental",
            Category::Risk => "risk",
            Category::Amenities => "amenities",
            Category::Commute => "commute",
            Category::Climate => "climate",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| format!("unknown capability category: {}", s))
    }
}

// ---------------------------------------------------------------------------
// CapabilityDescriptor
// ---------------------------------------------------------------------------

/// Static description of a capability, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Unique registry key; also the cache-key prefix and the aggregate key.
    pub name: String,
    pub category: Category,
    pub enabled: bool,
    pub requires_credentials: bool,
    /// Estimated cost of one external call, in USD.
    pub cost_per_call: f64,
    /// How long a successful payload stays cached.
    pub cache_ttl_secs: u64,
    /// Upstream call budget per hour, if the provider publishes one.
    pub max_calls_per_hour: Option<u32>,
    /// Names of capabilities whose output this one builds on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl CapabilityDescriptor {
    /// Enabled, credential-free, free-of-charge descriptor with a one-day TTL.
    pub fn new(name: &str, category: Category) -> Self {
        Self {
            name: name.to_string(),
            category,
            enabled: true,
            requires_credentials: false,
            cost_per_call: 0.0,
            cache_ttl_secs: 86_400,
            max_calls_per_hour: None,
            dependencies: Vec::new(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn requires_credentials(mut self, requires: bool) -> Self {
        self.requires_credentials = requires;
        self
    }

    pub fn cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    pub fn ttl_days(mut self, days: u64) -> Self {
        self.cache_ttl_secs = days * 86_400;
        self
    }

    pub fn ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = secs;
        self
    }

    pub fn max_calls_per_hour(mut self, max: u32) -> Self {
        self.max_calls_per_hour = Some(max);
        self
    }

    pub fn depends_on(mut self, capability: &str) -> Self {
        self.dependencies.push(capability.to_string());
        self
    }

    /// TTL as a duration, capped at a century.
    pub fn cache_ttl(&self) -> Duration {
        const MAX_TTL_SECS: u64 = 100 * 365 * 86_400;
        Duration::seconds(self.cache_ttl_secs.min(MAX_TTL_SECS) as i64)
    }
}

// ---------------------------------------------------------------------------
// EnrichmentRequest
// ---------------------------------------------------------------------------

/// Running count of external calls made for one request.
///
/// Clones share the count, so the orchestrator can still read it after the
/// capability future was dropped at the request deadline.
#[derive(Debug, Clone, Default)]
pub struct CallMeter(Arc<AtomicU32>);

impl CallMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one call about to be made.
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Inputs handed to every capability for one target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    /// Facts about the target itself.
    pub context: Option<HashMap<String, Value>>,
    pub preferences: Option<Preferences>,
    #[serde(skip)]
    calls: CallMeter,
}

impl EnrichmentRequest {
    pub fn new(latitude: f64, longitude: f64, address: &str) -> Self {
        Self {
            latitude,
            longitude,
            address: address.to_string(),
            context: None,
            preferences: None,
            calls: CallMeter::new(),
        }
    }

    /// Count external calls on `meter` instead of this request's own.
    pub fn with_call_meter(mut self, meter: CallMeter) -> Self {
        self.calls = meter;
        self
    }

    /// Where capabilities count their external calls.
    pub fn calls(&self) -> &CallMeter {
        &self.calls
    }

    pub fn with_context(mut self, context: HashMap<String, Value>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = Some(preferences);
        self
    }

    /// Look up one preference value.
    pub fn preference(&self, key: &str) -> Option<&Value> {
        self.preferences.as_ref().and_then(|p| p.get(key))
    }
}

// ---------------------------------------------------------------------------
// CapabilityResult
// ---------------------------------------------------------------------------

/// Success payload or failure message of one capability run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum CapabilityOutcome {
    Success(Value),
    Failure(String),
}

/// Outcome of running one capability for one request.
///
/// Constructed only through [`success`](Self::success),
/// [`failure`](Self::failure) and [`cached`](Self::cached), which keeps
/// `cache_hit ⇒ external_calls == 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    capability: String,
    outcome: CapabilityOutcome,
    external_calls: u32,
    cache_hit: bool,
    completed_at: DateTime<Utc>,
}

impl CapabilityResult {
    /// Freshly fetched payload.
    pub fn success(capability: &str, payload: Value, external_calls: u32) -> Self {
        Self {
            capability: capability.to_string(),
            outcome: CapabilityOutcome::Success(payload),
            external_calls,
            cache_hit: false,
            completed_at: Utc::now(),
        }
    }

    /// Failed run; `external_calls` counts calls made before the failure.
    pub fn failure(capability: &str, error: impl Into<String>, external_calls: u32) -> Self {
        Self {
            capability: capability.to_string(),
            outcome: CapabilityOutcome::Failure(error.into()),
            external_calls,
            cache_hit: false,
            completed_at: Utc::now(),
        }
    }

    /// Payload served from the cache.
    pub fn cached(capability: &str, payload: Value) -> Self {
        Self {
            capability: capability.to_string(),
            outcome: CapabilityOutcome::Success(payload),
            external_calls: 0,
            cache_hit: true,
            completed_at: Utc::now(),
        }
    }

    /// Same outcome, reported by a caller that did not make the calls.
    pub fn shared(&self) -> Self {
        Self {
            external_calls: 0,
            cache_hit: false,
            ..self.clone()
        }
    }

    pub fn capability(&self) -> &str {
        &self.capability
    }

    pub fn outcome(&self) -> &CapabilityOutcome {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, CapabilityOutcome::Success(_))
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            CapabilityOutcome::Success(payload) => Some(payload),
            CapabilityOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            CapabilityOutcome::Failure(error) => Some(error),
            CapabilityOutcome::Success(_) => None,
        }
    }

    pub fn external_calls(&self) -> u32 {
        self.external_calls
    }

    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    /// Turn a successful result into a failure, keeping its call count.
    pub(crate) fn into_failure(self, error: impl Into<String>) -> Self {
        Self {
            outcome: CapabilityOutcome::Failure(error.into()),
            cache_hit: false,
            ..self
        }
    }
}

// ---------------------------------------------------------------------------
// CapabilityError
// ---------------------------------------------------------------------------

/// Failure inside one capability run. Rendered into the result, never
/// propagated across the fan-out.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error(transparent)]
    Http(#[from] HttpError),

    #[error("Unexpected response shape: {0}")]
    Parse(String),

    #[error("Missing required setting: {0}")]
    MissingCredential(String),

    #[error("timeout")]
    Timeout,
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// Contract every enrichment provider implements.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Static descriptor; must return the same value on every call.
    fn descriptor(&self) -> &CapabilityDescriptor;

    /// Fetch the signal for `request`. All failures are captured in the
    /// returned result.
    async fn enrich(&self, request: &EnrichmentRequest) -> CapabilityResult;

    /// Setting names this capability needs but does not have.
    fn missing_configuration(&self) -> Vec<String> {
        Vec::new()
    }

    /// Health check: is the capability configured to run?
    fn validate_configuration(&self) -> bool {
        self.missing_configuration().is_empty()
    }

    /// Whether this capability is relevant for an actor with `preferences`.
    fn should_run(&self, _preferences: Option<&Preferences>) -> bool {
        self.descriptor().enabled
    }

    /// Parameters besides the coordinates that change the payload.
    fn cache_params(&self, _request: &EnrichmentRequest) -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    /// Cache key for `request`.
    fn cache_key(&self, request: &EnrichmentRequest) -> String {
        cache_key(
            &self.descriptor().name,
            request.latitude,
            request.longitude,
            self.cache_params(request),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Stub {
        descriptor: CapabilityDescriptor,
    }

    #[async_trait]
    impl Capability for Stub {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn enrich(&self, _request: &EnrichmentRequest) -> CapabilityResult {
            CapabilityResult::success(&self.descriptor.name, json!({}), 1)
        }
    }

    #[test]
    fn test_descriptor_builder() {
        let d = CapabilityDescriptor::new("walkability", Category::Location)
            .requires_credentials(true)
            .cost_per_call(0.002)
            .ttl_days(90)
            .max_calls_per_hour(5000)
            .depends_on("geocode");

        assert_eq!(d.cache_ttl(), Duration::days(90));
        assert_eq!(d.max_calls_per_hour, Some(5000));
        assert_eq!(d.dependencies, vec!["geocode".to_string()]);
        assert!(d.enabled);
    }

    #[test]
    fn test_category_parse_and_display() {
        assert_eq!("Risk".parse::<Category>().unwrap(), Category::Risk);
        assert_eq!(Category::Environmental.to_string(), "environmental");
        assert!("weather".parse::<Category>().is_err());
        assert_eq!(
            serde_json::to_string(&Category::Amenities).unwrap(),
            "\"amenities\""
        );
    }

    #[test]
    fn test_result_constructors_keep_cache_invariant() {
        let cached = CapabilityResult::cached("climate", json!({"t": 1}));
        assert!(cached.cache_hit());
        assert_eq!(cached.external_calls(), 0);
        assert!(cached.is_success());

        let failed = CapabilityResult::failure("climate", "boom", 2);
        assert_eq!(failed.error(), Some("boom"));
        assert!(failed.payload().is_none());
        assert!(!failed.cache_hit());

        let fetched = CapabilityResult::success("climate", json!({"t": 1}), 3);
        let shared = fetched.shared();
        assert_eq!(shared.external_calls(), 0);
        assert_eq!(shared.payload(), fetched.payload());
    }

    #[test]
    fn test_call_meter_is_shared_by_clones() {
        let meter = CallMeter::new();
        let request = EnrichmentRequest::new(1.0, 2.0, "x").with_call_meter(meter.clone());
        let copy = request.clone();

        request.calls().record();
        copy.calls().record();
        assert_eq!(meter.count(), 2);
        assert_eq!(EnrichmentRequest::new(1.0, 2.0, "x").calls().count(), 0);
    }

    #[test]
    fn test_default_trait_behavior() {
        let enabled = Stub {
            descriptor: CapabilityDescriptor::new("stub", Category::Risk),
        };
        let disabled = Stub {
            descriptor: CapabilityDescriptor::new("stub", Category::Risk).enabled(false),
        };

        assert!(enabled.should_run(None));
        assert!(!disabled.should_run(None));
        assert!(enabled.validate_configuration());

        let request = EnrichmentRequest::new(25.76168, -80.19179, "Miami, FL");
        assert_eq!(enabled.cache_key(&request), "stub:25.7617:-80.1918");
    }
}
