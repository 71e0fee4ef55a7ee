//! Single-flight cache population.
//!
//! A miss spawns the fill as its own task and parks a shared handle to it in
//! the in-flight map. Later callers for the same key attach to that handle
//! instead of starting another upstream run. The task writes the cache before
//! clearing its marker, and it keeps running if every caller goes away.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use parking_lot::Mutex;

use super::{CacheEntry, CacheStore};
use crate::retry::FinalFailure;

type Fill<T> = Shared<BoxFuture<'static, Result<T, FinalFailure>>>;
type InFlight<T> = Arc<Mutex<HashMap<String, Fill<T>>>>;

/// Clears the in-flight marker when the fill task ends, panics included.
struct MarkerGuard<T> {
    in_flight: InFlight<T>,
    key: String,
}

impl<T> Drop for MarkerGuard<T> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

pub struct SingleFlightCache<T> {
    store: Arc<dyn CacheStore<T>>,
    in_flight: InFlight<T>,
}

impl<T> Clone for SingleFlightCache<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<T> SingleFlightCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(store: Arc<dyn CacheStore<T>>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of fills currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Cached value only; never fills.
    pub async fn peek(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(hit) => hit.map(|e| e.value),
            Err(e) => {
                tracing::warn!(target: "cache", key, error = ?e, "cache read failed");
                None
            }
        }
    }

    /// Serve `key` from the store, or join/start the single fill for it.
    pub async fn get_or_fill<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fill: F,
    ) -> Result<T, FinalFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FinalFailure>> + Send + 'static,
    {
        self.get_or_fill_with(key, move |_| ttl, fill).await
    }

    /// Like [`get_or_fill`](Self::get_or_fill), with the TTL chosen from the
    /// filled value. Only the caller that starts the fill supplies `ttl_for`.
    pub async fn get_or_fill_with<L, F, Fut>(
        &self,
        key: &str,
        ttl_for: L,
        fill: F,
    ) -> Result<T, FinalFailure>
    where
        L: FnOnce(&T) -> Duration + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FinalFailure>> + Send + 'static,
    {
        if let Some(value) = self.peek(key).await {
            counter!("cache_hits_total").increment(1);
            tracing::debug!(target: "cache", key, "cache hit");
            return Ok(value);
        }
        counter!("cache_misses_total").increment(1);

        let shared = {
            let mut map = self.in_flight.lock();
            if let Some(running) = map.get(key) {
                counter!("single_flight_joins_total").increment(1);
                tracing::debug!(target: "cache", key, "joining in-flight fill");
                running.clone()
            } else {
                let handle = self.spawn_fill(key.to_string(), ttl_for, fill());
                map.insert(key.to_string(), handle.clone());
                handle
            }
        };

        shared.await
    }

    fn spawn_fill<L, Fut>(&self, key: String, ttl_for: L, fill: Fut) -> Fill<T>
    where
        L: FnOnce(&T) -> Duration + Send + 'static,
        Fut: Future<Output = Result<T, FinalFailure>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let guard = MarkerGuard {
            in_flight: Arc::clone(&self.in_flight),
            key: key.clone(),
        };

        tracing::info!(target: "cache", key = %key, "cache miss, starting fill");
        let task = tokio::spawn(async move {
            let _guard = guard;
            let res = fill.await;
            match &res {
                Ok(value) => {
                    let ttl = ttl_for(value);
                    if let Err(e) = store.set(&key, CacheEntry::new(value.clone()), ttl).await {
                        tracing::warn!(target: "cache", key = %key, error = ?e, "cache write failed");
                    }
                }
                Err(e) => {
                    tracing::warn!(target: "cache", key = %key, error = %e, "fill failed, nothing cached");
                }
            }
            res
        });

        async move {
            match task.await {
                Ok(res) => res,
                Err(join) => Err(FinalFailure::aborted(format!("fill task ended abnormally: {join}"))),
            }
        }
        .boxed()
        .shared()
    }
}
