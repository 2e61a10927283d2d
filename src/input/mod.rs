//! Consuming envelopes from the message bus.

use async_trait::async_trait;

use crate::transformer::Envelope;
use crate::Error;

mod kafka;

pub use kafka::{ConfigKafka, KafkaReader};

/// Blocking source of envelopes. `read` returns an error once the input has
/// been closed (or cannot be decoded), which stops the pipeline.
#[async_trait]
pub trait Reader: Send + Sync {
    async fn read(&self) -> Result<Envelope, Error>;
}
