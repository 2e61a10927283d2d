//! In-memory passthrough cache over a parent resolver.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{AppMetadata, Enricher};
use crate::Error;

struct CacheEntry {
    meta: AppMetadata,
    last_seen: Instant,
}

/// Keyed store of successful lookups. Hits refresh `last_seen`; misses are
/// resolved through the parent and inserted on success. Expiration is
/// time-based over the map, driven by a periodic control loop.
pub struct MetadataCache<E> {
    parent: E,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl<E> MetadataCache<E> {
    pub fn new(parent: E) -> Self {
        Self {
            parent,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Removes all entries that have not been seen in `older_than` (inclusive).
    pub fn expire(&self, older_than: Duration) {
        let now = Instant::now();
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|_, entry| now.duration_since(entry.last_seen) < older_than);
    }

    /// Merges a running-apps snapshot into the cache, unconditionally
    /// overwriting listed entries. Entries not in the snapshot are left
    /// untouched: an app missing from it may have just stopped, but events
    /// for it can still arrive and should still be enrichable.
    pub fn warmup(&self, mds: &[AppMetadata]) {
        let now = Instant::now();
        let mut cache = self.cache.lock().unwrap();
        for md in mds {
            cache.insert(
                md.app_guid.clone(),
                CacheEntry {
                    meta: md.clone(),
                    last_seen: now,
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl<E: Enricher> Enricher for MetadataCache<E> {
    async fn app_metadata(&self, app_guid: &str) -> Result<AppMetadata, Error> {
        {
            let mut cache = self.cache.lock().unwrap();
            if let Some(entry) = cache.get_mut(app_guid) {
                // last_seen must move under the lock to avoid racing lookups
                entry.last_seen = Instant::now();
                return Ok(entry.meta.clone());
            }
        }

        // The lock is released across the parent call: two concurrent misses
        // for the same key may both hit the parent, and the duplicate insert
        // is idempotent because the results are equal.
        let md = self.parent.app_metadata(app_guid).await?;

        self.cache.lock().unwrap().insert(
            app_guid.to_string(),
            CacheEntry {
                meta: md.clone(),
                last_seen: Instant::now(),
            },
        );
        Ok(md)
    }
}
