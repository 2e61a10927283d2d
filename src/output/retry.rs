use async_trait::async_trait;

use super::SyncWriter;
use crate::transformer::Envelope;
use crate::Error;

/// Wraps a sync writer with a bounded number of extra attempts. No backoff.
pub struct Retrier<W> {
    parent: W,
    retries: u32,
}

impl<W> Retrier<W> {
    // TODO: make the retry count configurable
    pub fn new(parent: W) -> Self {
        Self { parent, retries: 2 }
    }
}

#[async_trait]
impl<W: SyncWriter> SyncWriter for Retrier<W> {
    async fn write(&self, envs: &[Envelope]) -> Result<(), Error> {
        let mut result = self.parent.write(envs).await;
        for _ in 0..self.retries {
            if result.is_ok() {
                break;
            }
            result = self.parent.write(envs).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{envelopes, RecordingWriter};
    use super::*;

    #[tokio::test]
    async fn success_is_not_retried() {
        let retrier = Retrier::new(RecordingWriter::new());
        retrier.write(&envelopes(2)).await.unwrap();
        assert_eq!(retrier.parent.batch_sizes(), vec![2]);
    }

    #[tokio::test]
    async fn failures_are_retried_until_success() {
        let retrier = Retrier::new(RecordingWriter::failing(2));
        retrier.write(&envelopes(1)).await.unwrap();
        assert_eq!(retrier.parent.batch_sizes(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn at_most_three_attempts_then_last_error() {
        let retrier = Retrier::new(RecordingWriter::failing(100));
        assert!(retrier.write(&envelopes(1)).await.is_err());
        assert_eq!(retrier.parent.batch_sizes(), vec![1, 1, 1]);
    }
}
