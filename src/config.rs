//! Runtime settings for the enrichment engine.
//!
//! Settings are resolved once at startup, from an optional YAML file and then
//! from environment variables (which win). Capabilities read their credential
//! keys from the resolved [`Settings`]; nothing re-reads the environment per
//! request.
//!
//! ```yaml
//! database_path: "/var/lib/enrichment/enrichment.db"
//! rate_limit:
//!   max_enrichments_per_hour: 10
//! orchestrator:
//!   request_deadline_secs: 30
//! http:
//!   max_attempts: 3
//!   backoff_base_ms: 1000
//! capabilities:
//!   highway_noise:
//!     enabled: false
//! credentials:
//!   WALKSCORE_API_KEY: "..."
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigurationError;

/// Credential setting names the built-in capabilities know how to use.
pub const KNOWN_CREDENTIAL_KEYS: &[&str] =
    &["WALKSCORE_API_KEY", "AIRNOW_API_KEY", "GOOGLE_MAPS_API_KEY"];

/// Fully resolved engine settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite file backing the cache, aggregates and usage ledger.
    /// `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// Per-actor throttle.
    pub rate_limit: RateLimitSettings,
    /// Fan-out behavior.
    pub orchestrator: OrchestratorSettings,
    /// Defaults for every capability's HTTP client.
    pub http: HttpSettings,
    /// Per-capability overrides, keyed by capability name.
    pub capabilities: HashMap<String, CapabilityToggle>,
    /// Secret values keyed by setting name (e.g. `WALKSCORE_API_KEY`).
    pub credentials: HashMap<String, String>,
}

/// Rolling-window ceiling on non-cached enrichments per actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_enrichments_per_hour: u32,
    pub window_secs: u64,
}

/// Longest accepted throttle window (one leap year).
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 3600;

/// Longest accepted request deadline.
pub const MAX_REQUEST_DEADLINE_SECS: u64 = 3600;

impl RateLimitSettings {
    /// The window as a `chrono` duration, capped at [`MAX_WINDOW_SECS`].
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(MAX_WINDOW_SECS) as i64)
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_enrichments_per_hour: 10,
            window_secs: 3600,
        }
    }
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Deadline for one fan-out. `0` disables it.
    pub request_deadline_secs: u64,
    /// Collapse concurrent misses for the same cache key into one fetch.
    pub single_flight: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            request_deadline_secs: 30,
            single_flight: true,
        }
    }
}

impl OrchestratorSettings {
    pub fn request_deadline(&self) -> Option<Duration> {
        (self.request_deadline_secs > 0).then(|| {
            Duration::from_secs(self.request_deadline_secs.min(MAX_REQUEST_DEADLINE_SECS))
        })
    }
}

/// HTTP substrate defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub calls_per_second: f64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 1000,
            calls_per_second: 5.0,
        }
    }
}

/// Per-capability override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityToggle {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from an optional YAML file, then apply the process
    /// environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut settings = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Parse settings from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse settings from a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigurationError> {
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Overlay values from an environment lookup.
    ///
    /// Recognized variables: `ENRICH_DB_PATH`, `ENRICH_MAX_ENRICHMENTS_PER_HOUR`,
    /// `ENRICH_REQUEST_DEADLINE_SECS`, plus every key in
    /// [`KNOWN_CREDENTIAL_KEYS`].
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ENRICH_DB_PATH").filter(|v| !v.is_empty()) {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("ENRICH_MAX_ENRICHMENTS_PER_HOUR") {
            self.rate_limit.max_enrichments_per_hour = raw.parse().map_err(|_| {
                ConfigurationError::Invalid(format!(
                    "ENRICH_MAX_ENRICHMENTS_PER_HOUR must be an integer, got {:?}",
                    raw
                ))
            })?;
        }
        if let Some(raw) = lookup("ENRICH_REQUEST_DEADLINE_SECS") {
            self.orchestrator.request_deadline_secs = raw.parse().map_err(|_| {
                ConfigurationError::Invalid(format!(
                    "ENRICH_REQUEST_DEADLINE_SECS must be an integer, got {:?}",
                    raw
                ))
            })?;
        }
        for key in KNOWN_CREDENTIAL_KEYS {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                self.credentials.insert(key.to_string(), value);
            }
        }
        self.validate()
    }

    /// Reject settings that would make the engine misbehave.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigurationError::Invalid(
                "rate_limit.window_secs must be positive".to_string(),
            ));
        }
        if self.rate_limit.window_secs > MAX_WINDOW_SECS {
            return Err(ConfigurationError::Invalid(format!(
                "rate_limit.window_secs must be at most {}, got {}",
                MAX_WINDOW_SECS, self.rate_limit.window_secs
            )));
        }
        if self.orchestrator.request_deadline_secs > MAX_REQUEST_DEADLINE_SECS {
            return Err(ConfigurationError::Invalid(format!(
                "orchestrator.request_deadline_secs must be at most {}, got {}",
                MAX_REQUEST_DEADLINE_SECS, self.orchestrator.request_deadline_secs
            )));
        }
        if self.http.max_attempts == 0 {
            return Err(ConfigurationError::Invalid(
                "http.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.http.calls_per_second.is_nan() || self.http.calls_per_second <= 0.0 {
            return Err(ConfigurationError::Invalid(
                "http.calls_per_second must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a non-empty credential by setting name.
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Whether the named capability is enabled, given its built-in default.
    pub fn capability_enabled(&self, name: &str, default: bool) -> bool {
        self.capabilities
            .get(name)
            .map(|toggle| toggle.enabled)
            .unwrap_or(default)
    }

    /// Setting names from `required` that have no value.
    pub fn missing_credentials(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|key| self.credential(key).is_none())
            .map(|key| key.to_string())
            .collect()
    }
}
