//! Writing envelopes to the time-series store.

use async_trait::async_trait;

use crate::transformer::Envelope;
use crate::Error;

mod batcher;
mod committer;
mod influxdb;
mod retry;

pub use batcher::{Batcher, ConfigBatcher};
pub use committer::{CommitCallback, Committer};
pub use influxdb::{ConfigInfluxDb, InfluxDb};
pub use retry::Retrier;

/// Writer interface for stateless outputs. If `write` returns an error it is
/// undefined how many envelopes have been written.
#[async_trait]
pub trait SyncWriter: Send + Sync {
    async fn write(&self, envs: &[Envelope]) -> Result<(), Error>;
}

/// Writer interface for stateful outputs. If `write_async` or `flush` return
/// an error the writer (and the output itself) is in an undefined state and
/// must not be used anymore. Neither method may assume anything about how
/// frequently the other is called.
#[async_trait]
pub trait AsyncWriter: Send + Sync {
    async fn write_async(&self, envs: Vec<Envelope>) -> Result<(), Error>;
    async fn flush(&self) -> Result<(), Error>;
}
