//! # Location Enrichment
//!
//! Fan-out/fan-in enrichment of real-world addresses with signals from
//! independent upstream providers (walkability, air quality, flood zone,
//! highway noise, amenities, commute times, climate normals).
//!
//! An [`Orchestrator`] runs every applicable [`Capability`] concurrently,
//! serves repeat lookups from a TTL [`Cache`], throttles non-cached runs per
//! actor, and merges the outcomes into one persisted [`AggregateRecord`] per
//! target. A failing provider never fails the run.
//!
//! ```no_run
//! use std::sync::Arc;
//! use location_enrichment::{EnrichOptions, MemoryStore, Orchestrator, Settings};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(None)?;
//! let store = Arc::new(MemoryStore::new());
//! let orchestrator = Orchestrator::from_settings(&settings, store.clone(), store)?;
//! let report = orchestrator
//!     .enrich_target("listing-42", "actor-7", &EnrichOptions::default())
//!     .await?;
//! println!("{} of {} capabilities succeeded", report.successful, report.total);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod capabilities;
pub mod clock;
pub mod config;
pub mod errors;
pub mod http;
pub mod orchestrator;
pub mod storage;

pub use cache::{Cache, CacheError, CacheStats, CacheStore, MemoryCache, SqliteCache};
pub use capabilities::{
    CallMeter, Capability, CapabilityDescriptor, CapabilityError, CapabilityOutcome,
    CapabilityRegistry, CapabilityResult, Category, EnrichmentRequest, Preferences,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Settings;
pub use errors::{ConfigurationError, EnrichmentError, PersistenceError};
pub use http::{HttpError, ResilientClient};
pub use orchestrator::{EnrichOptions, EnrichmentReport, Orchestrator, Stores};
pub use storage::{
    AggregateRecord, AggregateStore, AggregateUpdate, Database, MemoryStore, PreferenceStore,
    SqliteStore, Target, TargetRepository, UsageLedger, UsageRecord,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
