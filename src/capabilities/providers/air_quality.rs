//! AirNow current observations.
//!
//! The reported AQI is the worst pollutant's AQI among the observations
//! returned for the nearest reporting area.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::finish;
use crate::capabilities::capability::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityResult, Category,
    EnrichmentRequest,
};
use crate::config::Settings;
use crate::http::ResilientClient;

pub const NAME: &str = "air_quality";
const BASE_URL: &str = "https://www.airnowapi.org";
const CREDENTIAL: &str = "AIRNOW_API_KEY";
const SEARCH_DISTANCE_MILES: u32 = 25;

pub struct AirQualityCapability {
    descriptor: CapabilityDescriptor,
    client: ResilientClient,
    api_key: Option<String>,
}

impl AirQualityCapability {
    pub fn new(settings: &Settings) -> Self {
        Self::with_client(
            ResilientClient::new(NAME, BASE_URL, &settings.http),
            settings.credential(CREDENTIAL).map(String::from),
        )
        .enabled(settings.capability_enabled(NAME, true))
    }

    pub fn with_client(client: ResilientClient, api_key: Option<String>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(NAME, Category::Environmental)
                .requires_credentials(true)
                .ttl_days(1)
                .max_calls_per_hour(500),
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

        request.calls().record();
        let body = self
            .client
            .get(
                "/aq/observation/latLong/current/",
                &[
                    ("format", "application/json".to_string()),
                    ("latitude", request.latitude.to_string()),
                    ("longitude", request.longitude.to_string()),
                    ("distance", SEARCH_DISTANCE_MILES.to_string()),
                    ("API_KEY", api_key.to_string()),
                ],
            )
            .await?;

        let observations = body
            .as_array()
            .ok_or_else(|| CapabilityError::Parse("expected an array of observations".to_string()))?;

        Ok(summarize(observations))
    }
}

fn summarize(observations: &[Value]) -> Value {
    let mut pollutants = BTreeMap::new();
    let mut worst: Option<(i64, &Value)> = None;

    for observation in observations {
        let (Some(parameter), Some(aqi)) = (
            observation.get("ParameterName").and_then(Value::as_str),
            observation.get("AQI").and_then(Value::as_i64),
        ) else {
            continue;
        };
        pollutants.insert(parameter.to_string(), aqi);
        if worst.map_or(true, |(best, _)| aqi > best) {
            worst = Some((aqi, observation));
        }
    }

    match worst {
        Some((aqi, observation)) => json!({
            "aqi": aqi,
            "category": observation.pointer("/Category/Name").cloned().unwrap_or(Value::Null),
            "dominant_pollutant": observation.get("ParameterName").cloned().unwrap_or(Value::Null),
            "reporting_area": observation.get("ReportingArea").cloned().unwrap_or(Value::Null),
            "pollutants": pollutants,
        }),
        None => json!({
            "aqi": null,
            "category": null,
            "dominant_pollutant": null,
            "reporting_area": null,
            "pollutants": {},
        }),
    }
}

#[async_trait]
impl Capability for AirQualityCapability {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedTransport;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_worst_pollutant_wins() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!([
            {"ParameterName": "O3", "AQI": 31, "ReportingArea": "Boston", "Category": {"Number": 1, "Name": "Good"}},
            {"ParameterName": "PM2.5", "AQI": 58, "ReportingArea": "Boston", "Category": {"Number": 2, "Name": "Moderate"}}
        ]));
        let cap = AirQualityCapability::with_client(
            ResilientClient::with_transport(NAME, BASE_URL, transport.clone()),
            Some("key".to_string()),
        );

        let result = cap.enrich(&EnrichmentRequest::new(42.36, -71.06, "Boston")).await;
        let payload = result.payload().unwrap();
        assert_eq!(payload["aqi"], 58);
        assert_eq!(payload["category"], "Moderate");
        assert_eq!(payload["dominant_pollutant"], "PM2.5");
        assert_eq!(payload["pollutants"]["O3"], 31);
        assert_eq!(transport.requests()[0].query_param("API_KEY"), Some("key"));
    }

    #[tokio::test]
    async fn test_no_observations_is_success_with_nulls() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!([]));
        let cap = AirQualityCapability::with_client(
            ResilientClient::with_transport(NAME, BASE_URL, transport.clone()),
            Some("key".to_string()),
        );

        let result = cap.enrich(&EnrichmentRequest::new(0.0, 0.0, "ocean")).await;
        assert!(result.is_success());
        assert!(result.payload().unwrap()["aqi"].is_null());
    }

    #[tokio::test]
    async fn test_non_array_body_is_parse_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"error": "bad"}));
        let cap = AirQualityCapability::with_client(
            ResilientClient::with_transport(NAME, BASE_URL, transport.clone()),
            Some("key".to_string()),
        );

        let result = cap.enrich(&EnrichmentRequest::new(0.0, 0.0, "x")).await;
        assert!(!result.is_success());
        assert!(result.error().unwrap().contains("array"));
    }
}
