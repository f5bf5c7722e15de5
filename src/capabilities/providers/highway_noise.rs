//! Highway noise exposure from OpenStreetMap (Overpass API).
//!
//! Finds major roads around the point and estimates the noise level from the
//! nearest one, using a reference level per road class at 15 m and 3 dB of
//! attenuation per doubling of distance (line source).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{finish, haversine_m, preference_u64};
use crate::capabilities::capability::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityResult, Category,
    EnrichmentRequest,
};
use crate::config::Settings;
use crate::http::ResilientClient;

pub const NAME: &str = "highway_noise";
const BASE_URL: &str = "https://overpass-api.de/api";
const DEFAULT_RADIUS_M: u64 = 1000;
const REFERENCE_DISTANCE_M: f64 = 15.0;
/// Overpass asks clients to stay at or below one request per second.
const MAX_CALLS_PER_SECOND: f64 = 1.0;
/// Overpass operators ask clients to identify themselves.
const USER_AGENT: &str = concat!("location-enrichment/", env!("CARGO_PKG_VERSION"));

pub struct HighwayNoiseCapability {
    descriptor: CapabilityDescriptor,
    client: ResilientClient,
}

impl HighwayNoiseCapability {
    pub fn new(settings: &Settings) -> Self {
        let client = ResilientClient::new(NAME, BASE_URL, &settings.http)
            .with_calls_per_second(settings.http.calls_per_second.min(MAX_CALLS_PER_SECOND))
            .with_default_header("User-Agent", USER_AGENT);
        Self::with_client(client).enabled(settings.capability_enabled(NAME, true))
    }

    pub fn with_client(client: ResilientClient) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(NAME, Category::Environmental).ttl_days(180),
            client,
        }
    }

    /// Toggle the capability without changing anything else.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.descriptor = self.descriptor.enabled(enabled);
        self
    }

    fn radius_m(request: &EnrichmentRequest) -> u64 {
        preference_u64(request, "noise_radius_m", DEFAULT_RADIUS_M)
    }

    async fn fetch(&self, request: &EnrichmentRequest) -> Result<Value, CapabilityError> {
        let radius = Self::radius_m(request);
        let query = format!(
            "[out:json][timeout:25];way(around:{},{},{})[highway~\"^(motorway|trunk|primary)$\"];out center tags;",
            radius, request.latitude, request.longitude
        );

        request.calls().record();
        let body = self.client.get("/interpreter", &[("data", query)]).await?;

        let elements = body
            .get("elements")
            .and_then(Value::as_array)
            .ok_or_else(|| CapabilityError::Parse("missing elements".to_string()))?;

        let mut nearest: Option<(f64, &Value, &str)> = None;
        for element in elements {
            let (Some(lat), Some(lon), Some(class)) = (
                element.pointer("/center/lat").and_then(Value::as_f64),
                element.pointer("/center/lon").and_then(Value::as_f64),
                element.pointer("/tags/highway").and_then(Value::as_str),
            ) else {
                continue;
            };
            let distance = haversine_m(request.latitude, request.longitude, lat, lon);
            if nearest.map_or(true, |(best, _, _)| distance < best) {
                nearest = Some((distance, element, class));
            }
        }

        let Some((distance, element, class)) = nearest else {
            return Ok(json!({
                "radius_m": radius,
                "roads_within_radius": 0,
                "nearest_highway": null,
                "highway_class": null,
                "distance_m": null,
                "estimated_db": null,
                "noise_level": "low",
            }));
        };

        let name = element
            .pointer("/tags/name")
            .or_else(|| element.pointer("/tags/ref"))
            .cloned()
            .unwrap_or(Value::Null);
        let db = estimated_db(class, distance);

        let mut classes: BTreeMap<&str, u32> = BTreeMap::new();
        for class in elements
            .iter()
            .filter_map(|e| e.pointer("/tags/highway").and_then(Value::as_str))
        {
            *classes.entry(class).or_default() += 1;
        }

        Ok(json!({
            "radius_m": radius,
            "roads_within_radius": elements.len(),
            "roads_by_class": classes,
            "nearest_highway": name,
            "highway_class": class,
            "distance_m": distance.round(),
            "estimated_db": (db * 10.0).round() / 10.0,
            "noise_level": noise_level(db),
        }))
    }
}

/// Estimated A-weighted level at `distance_m` from a road of `class`.
pub fn estimated_db(class: &str, distance_m: f64) -> f64 {
    let reference = match class {
        "motorway" => 75.0,
        "trunk" => 70.0,
        _ => 65.0,
    };
    let distance = distance_m.max(REFERENCE_DISTANCE_M);
    reference - 10.0 * (distance / REFERENCE_DISTANCE_M).log10()
}

pub fn noise_level(db: f64) -> &'static str {
    if db >= 65.0 {
        "high"
    } else if db >= 55.0 {
        "moderate"
    } else {
        "low"
    }
}

#[async_trait]
impl Capability for HighwayNoiseCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> CapabilityResult {
        let outcome = self.fetch(request).await;
        finish(NAME, request.calls().count(), outcome)
    }

    fn cache_params(&self, request: &EnrichmentRequest) -> BTreeMap<String, String> {
        BTreeMap::from([("radius_m".to_string(), Self::radius_m(request).to_string())])
    }
}
