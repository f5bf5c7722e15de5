//! Travel times to the actor's points of interest (Google Distance Matrix).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::finish;
use crate::capabilities::capability::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityResult, Category,
    EnrichmentRequest, Preferences,
};
use crate::config::Settings;
use crate::http::ResilientClient;

pub const NAME: &str = "commute";
const BASE_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix";
const CREDENTIAL: &str = "GOOGLE_MAPS_API_KEY";
const DEFAULT_MODE: &str = "driving";
const MODES: &[&str] = &["driving", "walking", "bicycling", "transit"];

/// One destination the actor cares about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Destination {
    name: String,
    address: String,
}

pub struct CommuteCapability {
    descriptor: CapabilityDescriptor,
    client: ResilientClient,
    api_key: Option<String>,
}

impl CommuteCapability {
    pub fn new(settings: &Settings) -> Self {
        Self::with_client(
            ResilientClient::new(NAME, BASE_URL, &settings.http),
            settings.credential(CREDENTIAL).map(String::from),
        )
        .enabled(settings.capability_enabled(NAME, true))
    }

    pub fn with_client(client: ResilientClient, api_key: Option<String>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(NAME, Category::Commute)
                .requires_credentials(true)
                .cost_per_call(0.005)
                .ttl_days(7),
            client,
            api_key,
        }
    }

    /// Toggle the capability without changing anything else.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.descriptor = self.descriptor.enabled(enabled);
        self
    }

    async fn fetch(&self, request: &EnrichmentRequest) -> Result<Value, CapabilityError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CapabilityError::MissingCredential(CREDENTIAL.to_string()))?;
        let destinations = request.preferences.as_ref().map(destinations).unwrap_or_default();
        if destinations.is_empty() {
            return Ok(json!({"mode": travel_mode(request), "destinations": []}));
        }
        let mode = travel_mode(request);

        let joined = destinations
            .iter()
            .map(|d| d.address.as_str())
            .collect::<Vec<_>>()
            .join("|");

        request.calls().record();
        let body = self
            .client
            .get(
                "/json",
                &[
                    ("origins", format!("{},{}", request.latitude, request.longitude)),
                    ("destinations", joined),
                    ("mode", mode.to_string()),
                    ("units", "metric".to_string()),
                    ("key", api_key.to_string()),
                ],
            )
            .await?;

        match body.get("status").and_then(Value::as_str) {
            Some("OK") => {}
            Some(status) => {
                return Err(CapabilityError::Parse(format!("Distance Matrix status {}", status)))
            }
            None => return Err(CapabilityError::Parse("missing status".to_string())),
        }

        let elements = body
            .pointer("/rows/0/elements")
            .and_then(Value::as_array)
            .ok_or_else(|| CapabilityError::Parse("missing rows".to_string()))?;

        let legs: Vec<Value> = destinations
            .iter()
            .zip(elements)
            .map(|(destination, element)| {
                let reachable = element.get("status").and_then(Value::as_str) == Some("OK");
                json!({
                    "name": destination.name,
                    "address": destination.address,
                    "reachable": reachable,
                    "duration_minutes": element
                        .pointer("/duration/value")
                        .and_then(Value::as_f64)
                        .filter(|_| reachable)
                        .map(|s| (s / 60.0).round()),
                    "distance_km": element
                        .pointer("/distance/value")
                        .and_then(Value::as_f64)
                        .filter(|_| reachable)
                        .map(|m| (m / 100.0).round() / 10.0),
                })
            })
            .collect();

        Ok(json!({"mode": mode, "destinations": legs}))
    }
}

fn travel_mode(request: &EnrichmentRequest) -> &'static str {
    request
        .preference("commute_mode")
        .and_then(Value::as_str)
        .and_then(|mode| {
            let mode = mode.trim().to_lowercase();
            MODES.iter().copied().find(|m| *m == mode)
        })
        .unwrap_or(DEFAULT_MODE)
}

/// Points of interest, as plain address strings or `{name, address}`
/// objects. Sorted so the request and the cache key are order-independent.
fn destinations(preferences: &Preferences) -> Vec<Destination> {
    let Some(Value::Array(items)) = preferences.get("points_of_interest") else {
        return Vec::new();
    };
    let mut out: Vec<Destination> = items
        .iter()
        .filter_map(|item| match item {
            Value::String(address) => Some(Destination {
                name: address.trim().to_string(),
                address: address.trim().to_string(),
            }),
            Value::Object(map) => {
                let address = map.get("address")?.as_str()?.trim().to_string();
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .map(|n| n.trim().to_string())
                    .unwrap_or_else(|| address.clone());
                Some(Destination { name, address })
            }
            _ => None,
        })
        .filter(|d| !d.address.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[async_trait]
impl Capability for CommuteCapability {
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

    /// Only runs for actors with at least one point of interest.
    fn should_run(&self, preferences: Option<&Preferences>) -> bool {
        self.descriptor.enabled && preferences.map_or(false, |p| !destinations(p).is_empty())
    }

    /// Labels are part of the payload, so they are keyed next to the
    /// addresses, position by position.
    fn cache_params(&self, request: &EnrichmentRequest) -> BTreeMap<String, String> {
        let (labels, addresses): (Vec<String>, Vec<String>) = request
            .preferences
            .as_ref()
            .map(destinations)
            .unwrap_or_default()
            .into_iter()
            .map(|d| (d.name, d.address))
            .unzip();
        BTreeMap::from([
            ("destinations".to_string(), addresses.join("|")),
            ("labels".to_string(), labels.join("|")),
            ("mode".to_string(), travel_mode(request).to_string()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedTransport;
    use std::sync::Arc;

    fn capability(transport: &Arc<ScriptedTransport>) -> CommuteCapability {
        CommuteCapability::with_client(
            ResilientClient::with_transport(NAME, BASE_URL, transport.clone()),
            Some("gkey".to_string()),
        )
    }

    fn prefs(pois: Value) -> Preferences {
        let mut prefs = Preferences::new();
        prefs.insert("points_of_interest".to_string(), pois);
        prefs
    }

    #[test]
    fn test_should_run_only_with_points_of_interest() {
        let transport = Arc::new(ScriptedTransport::new());
        let cap = capability(&transport);
        assert!(!cap.should_run(None));
        assert!(!cap.should_run(Some(&prefs(json!([])))));
        assert!(!cap.should_run(Some(&prefs(json!([{"name": "no address"}])))));
        assert!(cap.should_run(Some(&prefs(json!(["1 Main St"])))));
    }

    #[tokio::test]
    async fn test_durations_per_destination() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({
            "status": "OK",
            "rows": [{"elements": [
                {"status": "OK", "duration": {"value": 1500}, "distance": {"value": 12345}},
                {"status": "ZERO_RESULTS"}
            ]}]
        }));
        let mut preferences = prefs(json!([
            {"name": "Work", "address": "100 Market St"},
            "Island Cabin"
        ]));
        preferences.insert("commute_mode".to_string(), json!("Transit"));
        let request = EnrichmentRequest::new(39.95, -75.16, "x").with_preferences(preferences);

        let result = capability(&transport).enrich(&request).await;

        let payload = result.payload().unwrap();
        assert_eq!(payload["mode"], "transit");
        // Sorted by name: "Island Cabin" < "Work".
        assert_eq!(payload["destinations"][0]["name"], "Island Cabin");
        assert_eq!(payload["destinations"][1]["name"], "Work");
        let sent = &transport.requests()[0];
        assert_eq!(
            sent.query_param("destinations"),
            Some("Island Cabin|100 Market St")
        );
        assert_eq!(sent.query_param("mode"), Some("transit"));
    }

    #[tokio::test]
    async fn test_request_level_error_status() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"status": "OVER_QUERY_LIMIT"}));
        let request = EnrichmentRequest::new(1.0, 1.0, "x").with_preferences(prefs(json!(["a"])));
        let result = capability(&transport).enrich(&request).await;
        assert_eq!(
            result.error(),
            Some("Unexpected response shape: Distance Matrix status OVER_QUERY_LIMIT")
        );
        assert_eq!(result.external_calls(), 1);
    }

    #[test]
    fn test_cache_key_includes_destinations_and_mode() {
        let transport = Arc::new(ScriptedTransport::new());
        let cap = capability(&transport);
        let a = EnrichmentRequest::new(1.0, 1.0, "x").with_preferences(prefs(json!(["b", "a"])));
        let b = EnrichmentRequest::new(1.0, 1.0, "x").with_preferences(prefs(json!(["a", "b"])));
        assert_eq!(cap.cache_key(&a), cap.cache_key(&b));
        assert_eq!(
            cap.cache_key(&a),
            "commute:1.0000:1.0000:destinations=a|b:labels=a|b:mode=driving"
        );
    }

    #[test]
    fn test_cache_key_separates_private_labels() {
        let transport = Arc::new(ScriptedTransport::new());
        let cap = capability(&transport);
        let alice = EnrichmentRequest::new(1.0, 1.0, "x").with_preferences(prefs(json!([
            {"name": "Work", "address": "100 Market St"}
        ])));
        let bob = EnrichmentRequest::new(1.0, 1.0, "x").with_preferences(prefs(json!([
            {"name": "Therapist", "address": "100 Market St"}
        ])));

        assert_ne!(cap.cache_key(&alice), cap.cache_key(&bob));
        assert_eq!(
            cap.cache_key(&bob),
            "commute:1.0000:1.0000:destinations=100 Market St:labels=Therapist:mode=driving"
        );
    }
}
