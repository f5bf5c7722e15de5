//! # Capabilities
//!
//! A capability is one pluggable source of location signal. The
//! [`CapabilityRegistry`] holds the statically known set; the orchestrator
//! selects from it per request and fans out over the selection.
//!
//! ## Layout
//!
//! - [`capability`]: the [`Capability`] trait, its descriptor, request and result types
//! - [`cache_key`]: deterministic cache keys from coordinates and parameters
//! - [`providers`]: the built-in upstream integrations
//! - [`registry`]: name-indexed lookup, filtering and health

pub mod cache_key;
pub mod capability;
pub mod providers;
pub mod registry;

pub use cache_key::cache_key;
pub use capability::{
    CallMeter, Capability, CapabilityDescriptor, CapabilityError, CapabilityOutcome,
    CapabilityResult, Category, EnrichmentRequest, Preferences,
};
pub use registry::CapabilityRegistry;
