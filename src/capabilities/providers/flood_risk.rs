//! FEMA National Flood Hazard Layer lookup.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::finish;
use crate::capabilities::capability::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityResult, Category,
    EnrichmentRequest,
};
use crate::config::Settings;
use crate::http::ResilientClient;

pub const NAME: &str = "flood_risk";
const BASE_URL: &str = "https://hazards.fema.gov/arcgis/rest/services/public/NFHL/MapServer";
/// Flood Hazard Zones layer.
const FLOOD_ZONE_LAYER: &str = "/28/query";

pub struct FloodRiskCapability {
    descriptor: CapabilityDescriptor,
    client: ResilientClient,
}

impl FloodRiskCapability {
    pub fn new(settings: &Settings) -> Self {
        Self::with_client(ResilientClient::new(NAME, BASE_URL, &settings.http))
            .enabled(settings.capability_enabled(NAME, true))
    }

    pub fn with_client(client: ResilientClient) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(NAME, Category::Risk).ttl_days(365),
            client,
        }
    }

    /// Toggle the capability without changing anything else.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.descriptor = self.descriptor.enabled(enabled);
        self
    }

    async fn fetch(&self, request: &EnrichmentRequest) -> Result<Value, CapabilityError> {
        request.calls().record();
        let body = self
            .client
            .get(
                FLOOD_ZONE_LAYER,
                &[
                    ("geometry", format!("{},{}", request.longitude, request.latitude)),
                    ("geometryType", "esriGeometryPoint".to_string()),
                    ("inSR", "4326".to_string()),
                    ("spatialRel", "esriSpatialRelIntersects".to_string()),
                    ("outFields", "FLD_ZONE,ZONE_SUBTY,SFHA_TF".to_string()),
                    ("returnGeometry", "false".to_string()),
                    ("f", "json".to_string()),
                ],
            )
            .await?;

        // ArcGIS reports query errors with a 200 and an `error` object.
        if let Some(error) = body.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown ArcGIS error");
            return Err(CapabilityError::Parse(message.to_string()));
        }

        let features = body
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| CapabilityError::Parse("missing features".to_string()))?;

        let Some(attributes) = features.first().and_then(|f| f.get("attributes")) else {
            return Ok(json!({
                "flood_zone": null,
                "zone_subtype": null,
                "special_flood_hazard_area": false,
                "risk_level": "unmapped",
            }));
        };

        let zone = attributes.get("FLD_ZONE").and_then(Value::as_str).unwrap_or("");
        let subtype = attributes.get("ZONE_SUBTY").and_then(Value::as_str);
        let sfha = attributes.get("SFHA_TF").and_then(Value::as_str) == Some("T");

        Ok(json!({
            "flood_zone": zone,
            "zone_subtype": subtype,
            "special_flood_hazard_area": sfha,
            "risk_level": risk_level(zone, subtype),
        }))
    }
}

/// Map a FEMA zone designation to a coarse risk level.
pub fn risk_level(zone: &str, subtype: Option<&str>) -> &'static str {
    let zone = zone.trim().to_uppercase();
    if zone.starts_with('A') || zone.starts_with('V') {
        "high"
    } else if zone == "X" && subtype.map_or(false, |s| s.contains("0.2 PCT")) {
        "moderate"
    } else if zone == "X" || zone == "C" || zone == "B" {
        "low"
    } else {
        "undetermined"
    }
}

#[async_trait]
impl Capability for FloodRiskCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> CapabilityResult {
        let outcome = self.fetch(request).await;
        finish(NAME, request.calls().count(), outcome)
    }
}
