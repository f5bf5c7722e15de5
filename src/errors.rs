//! Error types shared across the enrichment engine.
//!
//! Errors local to one layer live beside it (`http::HttpError`,
//! `cache::CacheError`, `capabilities::CapabilityError`). The types here are
//! the ones that cross module boundaries or reach the caller.

use thiserror::Error;

/// Failure of a persistence collaborator (aggregate store, usage ledger,
/// target repository, preference store).
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Underlying SQLite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored record could not be encoded or decoded.
    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database file or its directory could not be created.
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking storage task panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for PersistenceError {
    fn from(err: tokio::task::JoinError) -> Self {
        PersistenceError::Task(err.to_string())
    }
}

/// Failure to load or validate [`Settings`](crate::config::Settings).
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The settings file could not be read.
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid YAML for the settings schema.
    #[error("Invalid settings file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value was present but unusable.
    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// The closed set of failures `Orchestrator::enrich_target` can return.
///
/// Failures of individual capabilities are never surfaced here; they are
/// captured in the per-capability results of the report.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// The target does not exist or is not owned by the actor.
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// The actor has reached the non-cached enrichment ceiling for the window.
    #[error(
        "Enrichment rate limit exceeded for actor {actor_id} ({limit} per window); retry after {retry_after_secs}s"
    )]
    RateLimitExceeded {
        actor_id: String,
        limit: u32,
        retry_after_secs: u64,
    },

    /// Saving the aggregate or the usage ledger failed.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl EnrichmentError {
    /// Seconds the caller should wait before retrying, when applicable.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EnrichmentError::RateLimitExceeded {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}
