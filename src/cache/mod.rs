// src/cache/mod.rs
pub mod single_flight;

pub use single_flight::SingleFlightCache;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;

/// A cached value and when it was written. Replaced whole, never patched.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    pub value: T,
    pub written_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            written_at: Utc::now(),
        }
    }
}

/// Keyed store with per-entry TTL. Eviction is the store's job.
#[async_trait::async_trait]
pub trait CacheStore<T>: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>>;
    async fn set(&self, key: &str, entry: CacheEntry<T>, ttl: Duration) -> Result<()>;
}

/// In-process store. An entry whose age has reached its TTL reads as absent,
/// so a zero TTL is never served.
pub struct MemoryStore<T> {
    inner: Mutex<HashMap<String, (CacheEntry<T>, Instant)>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<T> CacheStore<T> for MemoryStore<T>
where
    T: Clone + Send + Sync,
{
    async fn get(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        let mut map = self.inner.lock();
        let expired = match map.get(key) {
            None => return Ok(None),
            Some((_, expires_at)) => Instant::now() >= *expires_at,
        };
        if expired {
            map.remove(key);
            return Ok(None);
        }
        Ok(map.get(key).map(|(entry, _)| entry.clone()))
    }

    async fn set(&self, key: &str, entry: CacheEntry<T>, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + ttl;
        self.inner.lock().insert(key.to_string(), (entry, expires_at));
        Ok(())
    }
}
