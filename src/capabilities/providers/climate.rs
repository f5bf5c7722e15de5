//! Climate normals from the Open-Meteo climate API (1991-2020 daily series).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::finish;
use crate::capabilities::capability::{
    Capability, CapabilityDescriptor, CapabilityError, CapabilityResult, Category,
    EnrichmentRequest,
};
use crate::config::Settings;
use crate::http::ResilientClient;

pub const NAME: &str = "climate";
const BASE_URL: &str = "https://climate-api.open-meteo.com/v1";
const MODEL: &str = "EC_Earth3P_HR";
const START_DATE: &str = "1991-01-01";
const END_DATE: &str = "2020-12-31";
const YEARS: f64 = 30.0;
const HOT_DAY_C: f64 = 32.0;

pub struct ClimateCapability {
    descriptor: CapabilityDescriptor,
    client: ResilientClient,
}

impl ClimateCapability {
    pub fn new(settings: &Settings) -> Self {
        Self::with_client(ResilientClient::new(NAME, BASE_URL, &settings.http))
            .enabled(settings.capability_enabled(NAME, true))
    }

    pub fn with_client(client: ResilientClient) -> Self {
        Self {
            descriptor: CapabilityDescriptor::new(NAME, Category::Climate).ttl_days(365),
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
                "/climate",
                &[
                    ("latitude", request.latitude.to_string()),
                    ("longitude", request.longitude.to_string()),
                    ("start_date", START_DATE.to_string()),
                    ("end_date", END_DATE.to_string()),
                    ("models", MODEL.to_string()),
                    (
                        "daily",
                        "temperature_2m_max,temperature_2m_min,precipitation_sum".to_string(),
                    ),
                ],
            )
            .await?;

        let highs = series(&body, "temperature_2m_max")?;
        let lows = series(&body, "temperature_2m_min")?;
        let precip = series(&body, "precipitation_sum")?;
        if highs.is_empty() || lows.is_empty() {
            return Err(CapabilityError::Parse("empty temperature series".to_string()));
        }

        Ok(json!({
            "period": format!("{}/{}", &START_DATE[..4], &END_DATE[..4]),
            "avg_high_c": round1(mean(&highs)),
            "avg_low_c": round1(mean(&lows)),
            "annual_precip_mm": (precip.iter().sum::<f64>() / YEARS).round(),
            "hot_days_per_year": round1(highs.iter().filter(|t| **t > HOT_DAY_C).count() as f64 / YEARS),
            "freezing_days_per_year": round1(lows.iter().filter(|t| **t < 0.0).count() as f64 / YEARS),
        }))
    }
}

/// Non-null values of one daily series; missing days are skipped.
fn series(body: &Value, field: &str) -> Result<Vec<f64>, CapabilityError> {
    body.get("daily")
        .and_then(|daily| daily.get(field))
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_f64).collect())
        .ok_or_else(|| CapabilityError::Parse(format!("missing daily.{}", field)))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[async_trait]
impl Capability for ClimateCapability {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn enrich(&self, request: &EnrichmentRequest) -> CapabilityResult {
        let outcome = self.fetch(request).await;
        finish(NAME, request.calls().count(), outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::ScriptedTransport;
    use std::sync::Arc;

    fn capability(transport: &Arc<ScriptedTransport>) -> ClimateCapability {
        ClimateCapability::with_client(ResilientClient::with_transport(
            NAME,
            BASE_URL,
            transport.clone(),
        ))
    }

    #[tokio::test]
    async fn test_normals_are_summarized() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({
            "daily": {
                "time": ["1991-01-01", "1991-01-02", "1991-01-03", "1991-01-04"],
                "temperature_2m_max": [30.0, 34.0, null, 36.0],
                "temperature_2m_min": [-2.0, 10.0, 12.0, 20.0],
                "precipitation_sum": [3.0, 0.0, 27.0, null]
            }
        }));

        let result = capability(&transport)
            .enrich(&EnrichmentRequest::new(33.45, -112.07, "Phoenix"))
            .await;

        let payload = result.payload().unwrap();
        assert_eq!(payload["avg_high_c"], 33.3);
        assert_eq!(payload["avg_low_c"], 10.0);
        assert_eq!(payload["annual_precip_mm"], 1.0);
        // Two hot days and one freezing day over thirty years.
        assert_eq!(payload["hot_days_per_year"], 0.1);
        assert_eq!(payload["freezing_days_per_year"], 0.0);
        assert_eq!(payload["period"], "1991/2020");
        assert_eq!(
            transport.requests()[0].query_param("start_date"),
            Some("1991-01-01")
        );
    }

    #[tokio::test]
    async fn test_missing_series_is_parse_failure() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_json(json!({"daily": {"temperature_2m_max": [1.0]}}));
        let result = capability(&transport)
            .enrich(&EnrichmentRequest::new(0.0, 0.0, "x"))
            .await;
        assert!(result.error().unwrap().contains("daily.temperature_2m_min"));
    }
}
