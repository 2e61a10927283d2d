//! Metadata resolution for application events.
//!
//! The resolver is a stack of adaptors sharing the [`Enricher`] capability:
//! a positive cache over a negative cache over a failure-observer shim over a
//! retrier over the platform API client. Each layer owns exactly one concern.

use std::sync::Arc;

use async_trait::async_trait;

use crate::Error;

mod cache;
mod callback;
mod cf;
mod negative;
mod retry;

pub use cache::MetadataCache;
pub use callback::{CfCallback, FailureObserver};
pub use cf::{CfClient, ConfigCf};
pub use negative::NegativeCache;
pub use retry::Retrier;

/// Metadata describing the app an event belongs to, joined with its space and
/// org. An empty `app` name is the sentinel for "no metadata".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppMetadata {
    pub app: String,
    pub space: String,
    pub org: String,
    pub app_guid: String,
    pub space_guid: String,
    pub org_guid: String,
}

/// Resolves an app GUID to its metadata.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn app_metadata(&self, app_guid: &str) -> Result<AppMetadata, Error>;
}

#[async_trait]
impl<E: Enricher + ?Sized> Enricher for Arc<E> {
    async fn app_metadata(&self, app_guid: &str) -> Result<AppMetadata, Error> {
        (**self).app_metadata(app_guid).await
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Parent resolver backed by a fixed map, counting how often it is hit.
    /// GUIDs absent from the map resolve to `Error::AppNotFound`.
    pub(crate) struct MapEnricher {
        apps: HashMap<String, AppMetadata>,
        calls: AtomicUsize,
    }

    impl MapEnricher {
        pub(crate) fn new(guids: &[&str]) -> Self {
            let apps = guids
                .iter()
                .map(|g| (g.to_string(), mock_metadata(g)))
                .collect();
            Self {
                apps,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Enricher for MapEnricher {
        async fn app_metadata(&self, app_guid: &str) -> Result<AppMetadata, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.apps.get(app_guid) {
                Some(md) => Ok(md.clone()),
                None => Err(Error::AppNotFound(app_guid.to_string())),
            }
        }
    }

    pub(crate) fn mock_metadata(guid: &str) -> AppMetadata {
        AppMetadata {
            app: format!("app{guid}"),
            space: format!("space{guid}"),
            org: format!("org{guid}"),
            app_guid: guid.to_string(),
            space_guid: guid.to_string(),
            org_guid: guid.to_string(),
        }
    }
}
