//! Per-actor rolling-window throttle for non-cached enrichment runs.
//!
//! Every admitted run appends one ledger line under [`ENRICHMENT_SERVICE`];
//! admission counts those lines strictly inside `(now - window, now]`.
//! Check and append happen under one lock so concurrent runs in this
//! process cannot both take the last slot.

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::config::RateLimitSettings;
use crate::errors::EnrichmentError;
use crate::storage::{UsageLedger, UsageRecord};

/// Ledger service name of one enrichment run.
pub const ENRICHMENT_SERVICE: &str = "enrichment";

#[derive(Debug)]
pub struct Throttle {
    ceiling: u32,
    window: Duration,
    gate: Mutex<()>,
}

impl Throttle {
    pub fn new(ceiling: u32, window: Duration) -> Self {
        Self {
            ceiling,
            window,
            gate: Mutex::new(()),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit one run for `actor_id` at `now`, recording it in `ledger`.
    pub async fn admit(
        &self,
        ledger: &dyn UsageLedger,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), EnrichmentError> {
        let _gate = self.gate.lock().await;
        let since = now - self.window;

        let used = ledger.count_since(actor_id, ENRICHMENT_SERVICE, since).await?;
        if used >= u64::from(self.ceiling) {
            let oldest = ledger
                .oldest_since(actor_id, ENRICHMENT_SERVICE, since)
                .await?
                .unwrap_or(now);
            let retry_after_secs = retry_after(oldest + self.window - now);
            log::info!(
                "Throttled enrichment for actor {} ({} runs in window, retry in {}s)",
                actor_id,
                used,
                retry_after_secs
            );
            return Err(EnrichmentError::RateLimitExceeded {
                actor_id: actor_id.to_string(),
                limit: self.ceiling,
                retry_after_secs,
            });
        }

        ledger
            .append(UsageRecord::new(actor_id, ENRICHMENT_SERVICE, 1, now))
            .await?;
        Ok(())
    }

    /// Runs `actor_id` may still start in the window ending at `now`.
    pub async fn remaining(
        &self,
        ledger: &dyn UsageLedger,
        actor_id: &str,
        now: DateTime<Utc>,
    ) -> Result<u32, EnrichmentError> {
        let used = ledger
            .count_since(actor_id, ENRICHMENT_SERVICE, now - self.window)
            .await?;
        Ok(u64::from(self.ceiling).saturating_sub(used) as u32)
    }
}

impl From<&RateLimitSettings> for Throttle {
    fn from(settings: &RateLimitSettings) -> Self {
        Self::new(settings.max_enrichments_per_hour, settings.window())
    }
}

/// Whole seconds until `wait` has elapsed, never less than one.
fn retry_after(wait: Duration) -> u64 {
    let millis = wait.num_milliseconds().max(0) as u64;
    millis.div_ceil(1000).max(1)
}
