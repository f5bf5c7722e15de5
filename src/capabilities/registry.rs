//! Capability Registry — the startup-built set of enrichment capabilities.
//!
//! The registry is an ordinary value: built once (usually through
//! [`CapabilityRegistry::with_defaults`]), then shared read-only behind an
//! `Arc`. Registration takes `&mut self`, so it cannot happen mid-request.
//!
//! Iteration follows registration order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::capability::{Capability, CapabilityDescriptor, Category};
use super::providers;
use crate::config::Settings;

/// Capabilities indexed by name, in registration order.
#[derive(Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.capabilities.iter().map(|c| &c.descriptor().name))
            .finish()
    }
}

impl CapabilityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding exactly `capabilities`, registered in order.
    pub fn with_capabilities<I>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Capability>>,
    {
        let mut registry = Self::new();
        for capability in capabilities {
            registry.register(capability);
        }
        registry
    }

    /// Registry with every built-in capability, configured from `settings`.
    ///
    /// Capabilities missing credentials are still registered; they surface
    /// through [`health`](Self::health) and
    /// [`missing_configuration`](Self::missing_configuration).
    pub fn with_defaults(settings: &Settings) -> Self {
        let registry = Self::with_capabilities(providers::default_capabilities(settings));

        for (name, missing) in registry.missing_configuration() {
            log::warn!(
                "Capability {} is missing configuration: {}",
                name,
                missing.join(", ")
            );
        }
        for (name, unknown) in registry.unknown_dependencies() {
            log::warn!(
                "Capability {} depends on unregistered capabilities: {}",
                name,
                unknown.join(", ")
            );
        }
        registry
    }

    /// Register a capability. A capability with the same name is replaced in
    /// place, keeping its position.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.descriptor().name.clone();
        match self.index.get(&name) {
            Some(&position) => {
                log::warn!("Capability {} re-registered; replacing previous entry", name);
                self.capabilities[position] = capability;
            }
            None => {
                self.index.insert(name, self.capabilities.len());
                self.capabilities.push(capability);
            }
        }
    }

    /// Every registered capability.
    pub fn all(&self) -> &[Arc<dyn Capability>] {
        &self.capabilities
    }

    /// Capabilities whose descriptor is enabled.
    pub fn enabled(&self) -> Vec<Arc<dyn Capability>> {
        self.capabilities
            .iter()
            .filter(|c| c.descriptor().enabled)
            .cloned()
            .collect()
    }

    /// Capabilities in `category`, enabled or not.
    pub fn by_category(&self, category: Category) -> Vec<Arc<dyn Capability>> {
        self.capabilities
            .iter()
            .filter(|c| c.descriptor().category == category)
            .cloned()
            .collect()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.index
            .get(name)
            .map(|&position| Arc::clone(&self.capabilities[position]))
    }

    pub fn descriptors(&self) -> Vec<CapabilityDescriptor> {
        self.capabilities
            .iter()
            .map(|c| c.descriptor().clone())
            .collect()
    }

    /// `validate_configuration` of every capability, by name.
    pub fn health(&self) -> BTreeMap<String, bool> {
        self.capabilities
            .iter()
            .map(|c| (c.descriptor().name.clone(), c.validate_configuration()))
            .collect()
    }

    /// Missing setting names, for capabilities that have any.
    pub fn missing_configuration(&self) -> BTreeMap<String, Vec<String>> {
        self.capabilities
            .iter()
            .filter_map(|c| {
                let missing = c.missing_configuration();
                (!missing.is_empty()).then(|| (c.descriptor().name.clone(), missing))
            })
            .collect()
    }

    /// Declared dependencies that name no registered capability.
    pub fn unknown_dependencies(&self) -> BTreeMap<String, Vec<String>> {
        self.capabilities
            .iter()
            .filter_map(|c| {
                let unknown: Vec<String> = c
                    .descriptor()
                    .dependencies
                    .iter()
                    .filter(|dep| !self.index.contains_key(dep.as_str()))
                    .cloned()
                    .collect();
                (!unknown.is_empty()).then(|| (c.descriptor().name.clone(), unknown))
            })
            .collect()
    }

    /// Get the total number of registered capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::capability::{CapabilityResult, EnrichmentRequest};
    use async_trait::async_trait;
    use serde_json::json;

    struct Named {
        descriptor: CapabilityDescriptor,
        missing: Vec<String>,
    }

    fn make_cap(name: &str, category: Category, enabled: bool) -> Arc<dyn Capability> {
        Arc::new(Named {
            descriptor: CapabilityDescriptor::new(name, category).enabled(enabled),
            missing: vec![],
        })
    }

    #[async_trait]
    impl Capability for Named {
        fn descriptor(&self) -> &CapabilityDescriptor {
            &self.descriptor
        }

        async fn enrich(&self, _request: &EnrichmentRequest) -> CapabilityResult {
            CapabilityResult::success(&self.descriptor.name, json!(null), 0)
        }

        fn missing_configuration(&self) -> Vec<String> {
            self.missing.clone()
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = CapabilityRegistry::with_capabilities(vec![
            make_cap("walkability", Category::Location, true),
            make_cap("flood_risk", Category::Risk, true),
            make_cap("highway_noise", Category::Environmental, false),
        ]);

        assert_eq!(registry.len(), 3);
        assert!(registry.by_name("flood_risk").is_some());
        assert!(registry.by_name("unknown").is_none());

        let enabled: Vec<String> = registry
            .enabled()
            .iter()
            .map(|c| c.descriptor().name.clone())
            .collect();
        assert_eq!(enabled, vec!["walkability", "flood_risk"]);

        assert_eq!(registry.by_category(Category::Environmental).len(), 1);
        assert!(registry.by_category(Category::Climate).is_empty());
    }

    #[test]
    fn test_reregister_overwrites_in_place() {
        let mut registry = CapabilityRegistry::new();
        registry.register(make_cap("a", Category::Risk, true));
        registry.register(make_cap("b", Category::Risk, true));
        registry.register(make_cap("a", Category::Climate, false));

        assert_eq!(registry.len(), 2);
        let a = registry.by_name("a").unwrap();
        assert_eq!(a.descriptor().category, Category::Climate);
        assert_eq!(registry.all()[0].descriptor().name, "a");
        assert_eq!(registry.enabled().len(), 1);
    }

    #[test]
    fn test_health_and_missing_configuration() {
        let mut registry = CapabilityRegistry::new();
        registry.register(make_cap("ok", Category::Risk, true));
        registry.register(Arc::new(Named {
            descriptor: CapabilityDescriptor::new("needs_key", Category::Location),
            missing: vec!["WALKSCORE_API_KEY".to_string()],
        }));

        let health = registry.health();
        assert_eq!(health.get("ok"), Some(&true));
        assert_eq!(health.get("needs_key"), Some(&false));

        let missing = registry.missing_configuration();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing["needs_key"], vec!["WALKSCORE_API_KEY".to_string()]);
    }

    #[test]
    fn test_unknown_dependencies() {
        let mut registry = CapabilityRegistry::new();
        registry.register(make_cap("climate", Category::Climate, true));
        registry.register(Arc::new(Named {
            descriptor: CapabilityDescriptor::new("derived", Category::Risk)
                .depends_on("climate")
                .depends_on("elevation"),
            missing: vec![],
        }));

        let unknown = registry.unknown_dependencies();
        assert_eq!(unknown["derived"], vec!["elevation".to_string()]);
        assert!(!unknown.contains_key("climate"));
    }

    #[test]
    fn test_defaults_are_registered_in_fixed_order() {
        let registry = CapabilityRegistry::with_defaults(&Settings::default());
        let names: Vec<String> = registry
            .descriptors()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "walkability",
                "air_quality",
                "flood_risk",
                "highway_noise",
                "amenities",
                "commute",
                "climate"
            ]
        );
    }
}
