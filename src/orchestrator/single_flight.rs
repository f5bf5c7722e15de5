//! In-flight deduplication of capability fetches keyed by cache key.
//!
//! The first caller for a key becomes the leader and its fetch is shared;
//! callers arriving while it runs await the same future and receive the
//! result with `external_calls = 0`, so calls are billed once. The entry is
//! released when the fetch completes or when the leader is dropped, so a
//! cancelled leader never leaves a key pointing at an abandoned fetch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::capabilities::CapabilityResult;

struct Entry {
    id: u64,
    future: Shared<BoxFuture<'static, CapabilityResult>>,
}

type InFlight = Arc<Mutex<HashMap<String, Entry>>>;

#[derive(Default)]
pub struct SingleFlight {
    in_flight: InFlight,
    next_id: AtomicU64,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fetch` for `key`, or join the fetch already running for it.
    /// `fetch` is dropped unpolled when joining.
    pub async fn run<F>(&self, key: &str, fetch: F) -> CapabilityResult
    where
        F: Future<Output = CapabilityResult> + Send + 'static,
    {
        let (shared, leader) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(existing) => (existing.future.clone(), None),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let map = Arc::clone(&self.in_flight);
                    let owned_key = key.to_string();
                    let future = async move {
                        let result = fetch.await;
                        release(&map, &owned_key, id);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(
                        key.to_string(),
                        Entry {
                            id,
                            future: future.clone(),
                        },
                    );
                    let guard = Release {
                        map: Arc::clone(&self.in_flight),
                        key: key.to_string(),
                        id,
                    };
                    (future, Some(guard))
                }
            }
        };

        let result = shared.await;
        match leader {
            Some(_guard) => result,
            None => {
                log::debug!("Joined in-flight fetch for {}", key);
                result.shared()
            }
        }
    }

    /// Number of fetches currently in flight.
    pub fn len(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SingleFlight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.len())
            .finish()
    }
}

/// Releases the leader's entry when dropped.
struct Release {
    map: InFlight,
    key: String,
    id: u64,
}

impl Drop for Release {
    fn drop(&mut self) {
        release(&self.map, &self.key, self.id);
    }
}

/// Remove `key` only if it still belongs to fetch `id`.
fn release(map: &Mutex<HashMap<String, Entry>>, key: &str, id: u64) {
    let mut map = map.lock();
    if map.get(key).map_or(false, |entry| entry.id == id) {
        map.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn slow_fetch(counter: Arc<AtomicU32>) -> impl Future<Output = CapabilityResult> + Send + 'static {
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            CapabilityResult::success("climate", json!({"avg_high_c": 20.0}), 1)
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fetch() {
        let flights = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let (a, b) = tokio::join!(
            flights.run("climate:1.0000:1.0000", slow_fetch(counter.clone())),
            flights.run("climate:1.0000:1.0000", slow_fetch(counter.clone())),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(a.external_calls() + b.external_calls(), 1);
        assert_eq!(a.payload(), b.payload());
        assert!(flights.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_run_separately() {
        let flights = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let (a, b) = tokio::join!(
            flights.run("climate:1.0000:1.0000", slow_fetch(counter.clone())),
            flights.run("climate:2.0000:1.0000", slow_fetch(counter.clone())),
        );

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(a.external_calls(), 1);
        assert_eq!(b.external_calls(), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_do_not_share() {
        let flights = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        flights.run("k", slow_fetch(counter.clone())).await;
        let second = flights.run("k", slow_fetch(counter.clone())).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(second.external_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_key() {
        let flights = SingleFlight::new();
        let counter = Arc::new(AtomicU32::new(0));

        let leader = flights.run("k", slow_fetch(counter.clone()));
        let cancelled = tokio::time::timeout(Duration::from_millis(5), leader).await;
        assert!(cancelled.is_err());
        assert!(flights.is_empty());

        let next = flights.run("k", slow_fetch(counter.clone())).await;
        assert_eq!(next.external_calls(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
