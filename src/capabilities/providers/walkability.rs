//! Walk Score provider (walk, transit and bike scores).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::finish;
use crate::capabilities::capability::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityResult, Category,
    EnrichmentRequest, Preferences,
};
use crate::config::Settings;
use crate::http::ResilientClient;

pub const NAME: &str = "walkability";
const BASE_URL: &str = "https://api.walkscore.com";
const CREDENTIAL: &str = "WALKSCORE_API_KEY";

/// Preference keys that make walkability relevant to an actor.
pub const THRESHOLD_KEYS: &[&str] = &["min_walk_score", "min_transit_score", "min_bike_score"];

pub struct WalkabilityCapability {
    descriptor: CapabilityDescriptor,
    client: ResilientClient,
    api_key: Option<String>,
}

impl WalkabilityCapability {
    pub fn new(settings: &Settings) -> Self {
        Self::with_client(
            ResilientClient::new(NAME, BASE_URL, &settings.http),
            settings.credential(CREDENTIAL).map(String::from),
        )
        .enabled(settings.capability_enabled(NAME, true))
    }

    pub fn with_client(client: ResilientClient, api_key: Option<String>) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(NAME, Category::Location)
                .requires_credentials(true)
                .ttl_days(90)
                .max_calls_per_hour(200),
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
                "/score",
                &[
                    ("format", "json".to_string()),
                    ("address", request.address.clone()),
                    ("lat", request.latitude.to_string()),
                    ("lon", request.longitude.to_string()),
                    ("transit", "1".to_string()),
                    ("bike", "1".to_string()),
                    ("wsapikey", api_key.to_string()),
                ],
            )
            .await?;

        // Walk Score reports soft failures in-band: 1 is success.
        match body.get("status").and_then(Value::as_i64) {
            Some(1) => {}
            Some(status) => {
                return Err(CapabilityError::Parse(format!(
                    "Walk Score status {}",
                    status
                )))
            }
            None => return Err(CapabilityError::Parse("missing status".to_string())),
        }

        Ok(json!({
            "walk_score": body.get("walkscore").cloned().unwrap_or(Value::Null),
            "walk_description": body.get("description").cloned().unwrap_or(Value::Null),
            "transit_score": body.pointer("/transit/score").cloned().unwrap_or(Value::Null),
            "transit_description": body.pointer("/transit/description").cloned().unwrap_or(Value::Null),
            "bike_score": body.pointer("/bike/score").cloned().unwrap_or(Value::Null),
        }))
    }
}

#[async_trait]
impl Capability for WalkabilityCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> CapabilityResult {
        let outcome = self.fetch(request).await;
        finish(NAME, request.calls().count(), outcome)
    }

    fn missing_configuration(&self) -> Vec<String> {
        if self.api_key.is_some() {
            Vec::new()
        } else {
            vec![CREDENTIAL.to_string()]
        }
    }

    /// Only worth a call when the actor set at least one score threshold.
    fn should_run(&self, preferences: Option<&Preferences>) -> bool {
        self.descriptor.enabled
            && preferences.map_or(false, |prefs| {
                THRESHOLD_KEYS
                    .iter()
                    .any(|key| prefs.get(*key).map_or(false, |v| !v.is_null()))
            })
    }
}
