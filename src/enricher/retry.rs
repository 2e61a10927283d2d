use async_trait::async_trait;

use super::{AppMetadata, Enricher};
use crate::Error;

/// Wraps a resolver with a bounded number of extra attempts. No backoff.
pub struct Retrier<E> {
    parent: E,
    retries: u32,
}

impl<E> Retrier<E> {
    // TODO: make the retry count configurable
    pub fn new(parent: E) -> Self {
        Self { parent, retries: 2 }
    }
}

#[async_trait]
impl<E: Enricher> Enricher for Retrier<E> {
    async fn app_metadata(&self, app_guid: &str) -> Result<AppMetadata, Error> {
        // TODO: be smarter about retries: if the platform already said the
        // app does not exist there is no point in retrying
        let mut result = self.parent.app_metadata(app_guid).await;
        for _ in 0..self.retries {
            if result.is_ok() {
                break;
            }
            result = self.parent.app_metadata(app_guid).await;
        }
        result
    }
}
