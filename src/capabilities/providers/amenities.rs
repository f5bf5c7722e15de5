//! Nearby amenities from Google Places (Nearby Search).
//!
//! One call per amenity type. A failure on any type fails the whole run,
//! with the calls already made still counted.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{finish, haversine_m, preference_list, preference_u64};
use crate::capabilities::capability::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityResult, Category,
    EnrichmentRequest,
};
use crate::config::Settings;
use crate::http::ResilientClient;

pub const NAME: &str = "amenities";
const BASE_URL: &str = "https://maps.googleapis.com/maps/api/place";
const CREDENTIAL: &str = "GOOGLE_MAPS_API_KEY";
const DEFAULT_RADIUS_M: u64 = 1600;
const DEFAULT_TYPES: &[&str] = &[
    "grocery_or_supermarket",
    "park",
    "restaurant",
    "school",
    "transit_station",
];
/// Places returned per type in the payload.
const TOP_PLACES: usize = 3;

pub struct AmenitiesCapability {
    descriptor: CapabilityDescriptor,
    client: ResilientClient,
    api_key: Option<String>,
}

impl AmenitiesCapability {
    pub fn new(settings: &Settings) -> Self {
        Self::with_client(
            ResilientClient::new(NAME, BASE_URL, &settings.http),
            settings.credential(CREDENTIAL).map(String::from),
        )
        .enabled(settings.capability_enabled(NAME, true))
    }

    pub fn with_client(client: ResilientClient, api_key: Option<String>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(NAME, Category::Amenities)
                .requires_credentials(true)
                .cost_per_call(0.032)
                .ttl_days(30),
            client,
            api_key,
        }
    }

    /// Toggle the capability without changing anything else.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.descriptor = self.descriptor.enabled(enabled);
        self
    }

    /// Requested types, sorted and de-duplicated.
    fn types(request: &EnrichmentRequest) -> Vec<String> {
        let mut types = preference_list(request, "amenity_types");
        if types.is_empty() {
            types = DEFAULT_TYPES.iter().map(|t| t.to_string()).collect();
        }
        types.sort();
        types.dedup();
        types
    }

    fn radius_m(request: &EnrichmentRequest) -> u64 {
        preference_u64(request, "amenity_radius_m", DEFAULT_RADIUS_M)
    }

    async fn fetch(&self, request: &EnrichmentRequest) -> Result<Value, CapabilityError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CapabilityError::MissingCredential(CREDENTIAL.to_string()))?;
        let radius = Self::radius_m(request);

        let mut by_type = BTreeMap::new();
        let mut total = 0usize;
        for place_type in Self::types(request) {
            request.calls().record();
            let body = self
                .client
                .get(
                    "/nearbysearch/json",
                    &[
                        ("location", format!("{},{}", request.latitude, request.longitude)),
                        ("radius", radius.to_string()),
                        ("type", place_type.clone()),
                        ("key", api_key.to_string()),
                    ],
                )
                .await?;

            match body.get("status").and_then(Value::as_str) {
                Some("OK") | Some("ZERO_RESULTS") => {}
                Some(status) => {
                    let detail = body
                        .get("error_message")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    return Err(CapabilityError::Parse(
                        format!("Places status {} {}", status, detail).trim_end().to_string(),
                    ));
                }
                None => return Err(CapabilityError::Parse("missing status".to_string())),
            }

            let results = body
                .get("results")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            total += results.len();
            by_type.insert(place_type, summarize_places(request, results));
        }

        Ok(json!({
            "radius_m": radius,
            "total": total,
            "by_type": by_type,
        }))
    }
}

fn summarize_places(request: &EnrichmentRequest, results: &[Value]) -> Value {
    let mut places: Vec<(f64, Value)> = results
        .iter()
        .filter_map(|place| {
            let lat = place.pointer("/geometry/location/lat").and_then(Value::as_f64)?;
            let lng = place.pointer("/geometry/location/lng").and_then(Value::as_f64)?;
            let distance = haversine_m(request.latitude, request.longitude, lat, lng);
            Some((
                distance,
                json!({
                    "name": place.get("name").cloned().unwrap_or(Value::Null),
                    "rating": place.get("rating").cloned().unwrap_or(Value::Null),
                    "distance_m": distance.round(),
                }),
            ))
        })
        .collect();
    places.sort_by(|a, b| a.0.total_cmp(&b.0));

    json!({
        "count": results.len(),
        "nearest_m": places.first().map(|(d, _)| d.round()),
        "top": places.into_iter().take(TOP_PLACES).map(|(_, p)| p).collect::<Vec<_>>(),
    })
}

#[async_trait]
impl Capability for AmenitiesCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> CapabilityResult {
        let outcome = self.fetch(request).await;
        finish(NAME, request.calls().count(), outcome)
    }

    fn missing_configuration(&self) -> Vec<String> {
        match self.api_key {
            Some(_) => Vec::new(),
            None => vec![CREDENTIAL.to_string()],
        }
    }

    fn cache_params(&self, request: &EnrichmentRequest) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("radius_m".to_string(), Self::radius_m(request).to_string()),
            ("types".to_string(), Self::types(request).join("|")),
        ])
    }
}
