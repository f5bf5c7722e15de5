//! Built-in enrichment capabilities.
//!
//! Each provider owns one [`ResilientClient`](crate::http::ResilientClient)
//! and reduces its upstream response to a small JSON summary. The list
//! returned by [`default_capabilities`] is the complete, statically known set.

pub mod air_quality;
pub mod amenities;
pub mod climate;
pub mod commute;
pub mod flood_risk;
pub mod highway_noise;
pub mod walkability;

use std::sync::Arc;

use serde_json::Value;

use super::capability::{Capability, CapabilityError, CapabilityResult, EnrichmentRequest};
use crate::config::Settings;

pub use air_quality::AirQualityCapability;
pub use amenities::AmenitiesCapability;
pub use climate::ClimateCapability;
pub use commute::CommuteCapability;
pub use flood_risk::FloodRiskCapability;
pub use highway_noise::HighwayNoiseCapability;
pub use walkability::WalkabilityCapability;

/// Every built-in capability, in registration order.
pub fn default_capabilities(settings: &Settings) -> Vec<Arc<dyn Capability>> {
    vec![
        Arc::new(WalkabilityCapability::new(settings)),
        Arc::new(AirQualityCapability::new(settings)),
        Arc::new(FloodRiskCapability::new(settings)),
        Arc::new(HighwayNoiseCapability::new(settings)),
        Arc::new(AmenitiesCapability::new(settings)),
        Arc::new(CommuteCapability::new(settings)),
        Arc::new(ClimateCapability::new(settings)),
    ]
}

/// Wrap a fetch outcome into a [`CapabilityResult`], logging failures.
pub(crate) fn finish(
    capability: &str,
    external_calls: u32,
    outcome: Result<Value, CapabilityError>,
) -> CapabilityResult {
    match outcome {
        Ok(payload) => CapabilityResult::success(capability, payload, external_calls),
        Err(e) => {
            log::warn!("Capability {} failed: {}", capability, e);
            CapabilityResult::failure(capability, e.to_string(), external_calls)
        }
    }
}

/// Great-circle distance in metres.
pub(crate) fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();
    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// String list preference; accepts a JSON array of strings or a
/// comma-separated string.
pub(crate) fn preference_list(request: &EnrichmentRequest, key: &str) -> Vec<String> {
    match request.preference(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// Positive integer preference, falling back to `default`.
pub(crate) fn preference_u64(request: &EnrichmentRequest, key: &str, default: u64) -> u64 {
    request
        .preference(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_haversine_known_distance() {
        // Times Square to the Empire State Building is about 1.1 km.
        let d = haversine_m(40.7580, -73.9855, 40.7484, -73.9857);
        assert!((d - 1068.0).abs() < 20.0, "got {}", d);
        assert_eq!(haversine_m(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_preference_helpers() {
        let mut prefs = crate::capabilities::Preferences::new();
        prefs.insert("types".to_string(), json!(["park", " ", "school"]));
        prefs.insert("csv".to_string(), json!("a, b,,c"));
        prefs.insert("radius".to_string(), json!("800"));
        prefs.insert("zero".to_string(), json!(0));
        let request = EnrichmentRequest::new(0.0, 0.0, "").with_preferences(prefs);

        assert_eq!(preference_list(&request, "types"), vec!["park", "school"]);
        assert_eq!(preference_list(&request, "csv"), vec!["a", "b", "c"]);
        assert!(preference_list(&request, "missing").is_empty());
        assert_eq!(preference_u64(&request, "radius", 100), 800);
        assert_eq!(preference_u64(&request, "zero", 100), 100);
        assert_eq!(preference_u64(&request, "missing", 100), 100);
    }

    #[test]
    fn test_every_provider_honors_its_toggle() {
        let names = [
            walkability::NAME,
            air_quality::NAME,
            flood_risk::NAME,
            highway_noise::NAME,
            amenities::NAME,
            commute::NAME,
            climate::NAME,
        ];
        let mut settings = Settings::default();
        for name in names {
            settings.capabilities.insert(
                name.to_string(),
                crate::config::CapabilityToggle { enabled: false },
            );
        }

        let caps = default_capabilities(&settings);
        assert_eq!(caps.len(), names.len());
        assert!(caps.iter().all(|c| !c.descriptor().enabled));
        assert!(default_capabilities(&Settings::default())
            .iter()
            .all(|c| c.descriptor().enabled));
    }

    #[test]
    fn test_default_capabilities_have_unique_names() {
        let caps = default_capabilities(&Settings::default());
        let mut names: Vec<&str> = caps.iter().map(|c| c.descriptor().name.as_str()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), caps.len());
    }
}
