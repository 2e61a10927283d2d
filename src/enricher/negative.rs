//! Negative cache: remembers "app not found" verdicts to suppress repeat
//! lookups for apps the platform has recently declared missing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{AppMetadata, Enricher};
use crate::Error;

pub struct NegativeCache<E> {
    parent: E,
    cache: Mutex<HashMap<String, Instant>>,
}

impl<E> NegativeCache<E> {
    pub fn new(parent: E) -> Self {
        Self {
            parent,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Removes all verdicts older than `older_than` (inclusive).
    pub fn expire(&self, older_than: Duration) {
        let now = Instant::now();
        let mut cache = self.cache.lock().unwrap();
        cache.retain(|_, last_not_found| now.duration_since(*last_not_found) < older_than);
    }

    /// Invalidates the verdict for every app present in the running-apps
    /// snapshot: if an app now shows up as running, the next event for it
    /// must trigger a fresh lookup.
    pub fn warmup(&self, mds: &[AppMetadata]) {
        let mut cache = self.cache.lock().unwrap();
        for md in mds {
            cache.remove(&md.app_guid);
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }
}

#[async_trait]
impl<E: Enricher> Enricher for NegativeCache<E> {
    async fn app_metadata(&self, app_guid: &str) -> Result<AppMetadata, Error> {
        if self.cache.lock().unwrap().contains_key(app_guid) {
            return Err(Error::AppNotFound(app_guid.to_string()));
        }

        match self.parent.app_metadata(app_guid).await {
            Err(err @ Error::AppNotFound(_)) => {
                self.cache
                    .lock()
                    .unwrap()
                    .insert(app_guid.to_string(), Instant::now());
                Err(err)
            }
            // Success and non-NotFound errors leave the cache untouched.
            other => other,
        }
    }
}
