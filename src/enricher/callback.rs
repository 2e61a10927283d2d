use async_trait::async_trait;

use super::{AppMetadata, Enricher};
use crate::Error;

/// Observer invoked after every resolve with the outcome's error, if any.
pub type FailureObserver = Box<dyn Fn(Option<&Error>) + Send + Sync>;

/// Shim that reports resolver outcomes to an observer, so failure counters
/// stay decoupled from the client itself.
pub struct CfCallback<E> {
    parent: E,
    observer: FailureObserver,
}

impl<E> CfCallback<E> {
    pub fn new(parent: E, observer: FailureObserver) -> Self {
        Self { parent, observer }
    }
}

#[async_trait]
impl<E: Enricher> Enricher for CfCallback<E> {
    async fn app_metadata(&self, app_guid: &str) -> Result<AppMetadata, Error> {
        let result = self.parent.app_metadata(app_guid).await;
        (self.observer)(result.as_ref().err());
        result
    }
}
