use async_trait::async_trait;

use super::SyncWriter;
use crate::transformer::Envelope;
use crate::Error;

/// Called with the envelopes of a batch after it has been durably written;
/// responsible for advancing the upstream offsets, in the order received.
pub type CommitCallback = Box<dyn Fn(&[Envelope]) -> Result<(), Error> + Send + Sync>;

/// Runs a commit callback after every successful write of the inner writer.
pub struct Committer<W> {
    parent: W,
    callback: CommitCallback,
}

impl<W> Committer<W> {
    pub fn new(parent: W, callback: CommitCallback) -> Self {
        Self { parent, callback }
    }
}

#[async_trait]
impl<W: SyncWriter> SyncWriter for Committer<W> {
    async fn write(&self, envs: &[Envelope]) -> Result<(), Error> {
        self.parent.write(envs).await?;
        (self.callback)(envs)
    }
}
