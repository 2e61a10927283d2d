//! Kafka consumer with per-partition offset tracking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use serde::Deserialize;
use tokio::sync::Notify;
use tracing::{error, warn};

use super::Reader;
use crate::transformer::{Envelope, SourcePosition};
use crate::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigKafka {
    /// Bootstrap brokers, comma-separated host:port pairs.
    pub brokers: String,
    /// Topics to read events from.
    pub topics: Vec<String>,
    /// Name of the Kafka consumer group.
    pub consumer_group: String,
    /// Consumer session timeout.
    #[serde(with = "humantime_serde", default = "default_session_timeout")]
    pub session_timeout: Duration,
    /// If true start from the newest message when the group has no committed
    /// offset yet.
    #[serde(default)]
    pub offset_newest: bool,
}

fn default_session_timeout() -> Duration {
    Duration::from_secs(60)
}

/// Consumes messages from the bus and decodes them into envelopes.
///
/// Offsets are stored (not committed) per message through [`KafkaReader::commit`]
/// once the derived point has been durably written; the periodic auto-commit
/// then advances the group offset, giving at-least-once delivery per
/// partition.
pub struct KafkaReader {
    consumer: StreamConsumer,
    offsets: Mutex<HashMap<(String, i32), i64>>,
    closed: AtomicBool,
    shutdown: Notify,
}

impl KafkaReader {
    pub fn new(cfg: &ConfigKafka) -> Result<Self, Error> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", cfg.consumer_group.as_str())
            .set("bootstrap.servers", cfg.brokers.as_str())
            .set(
                "session.timeout.ms",
                cfg.session_timeout.as_millis().to_string(),
            )
            // offsets are stored explicitly after a durable write and
            // committed by the periodic auto-commit
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set(
                "auto.offset.reset",
                if cfg.offset_newest { "latest" } else { "earliest" },
            )
            .create()?;

        let topics: Vec<&str> = cfg.topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topics)?;

        Ok(Self {
            consumer,
            offsets: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Tears down the subscription: a subsequent `read` returns
    /// `Error::InputClosed`. Safe to call more than once.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    /// Stores the offset of a processed message for the next group commit.
    pub fn commit(&self, pos: &SourcePosition) -> Result<(), Error> {
        self.consumer
            .store_offset(&pos.topic, pos.partition, pos.offset)?;
        Ok(())
    }
}

#[async_trait]
impl Reader for KafkaReader {
    async fn read(&self) -> Result<Envelope, Error> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::InputClosed);
            }
            tokio::select! {
                _ = self.shutdown.notified() => return Err(Error::InputClosed),
                msg = self.consumer.recv() => match msg {
                    Ok(msg) => {
                        let mut offsets = self.offsets.lock().unwrap();
                        return decode_message(
                            &mut offsets,
                            msg.topic(),
                            msg.partition(),
                            msg.offset(),
                            msg.payload().unwrap_or_default(),
                        );
                    }
                    // Transient consumer errors are logged and the read
                    // retried; only closing the input stops the pipeline.
                    Err(err) => error!(%err, "kafka consumer error"),
                },
            }
        }
    }
}

/// Pure per-message step: gap check, decode, envelope assembly. The tracker
/// is advanced only for messages that decode.
fn decode_message(
    offsets: &mut HashMap<(String, i32), i64>,
    topic: &str,
    partition: i32,
    offset: i64,
    payload: &[u8],
) -> Result<Envelope, Error> {
    let key = (topic.to_string(), partition);
    if let Some(last) = offsets.get(&key) {
        let expected = last + 1;
        if expected != offset {
            warn!(
                topic,
                partition,
                expected,
                found = offset,
                diff = offset - expected,
                "unexpected offset"
            );
        }
    }

    let event = serde_json::from_slice(payload).map_err(Error::Decode)?;
    offsets.insert(key, offset);

    Ok(Envelope {
        event,
        meta: Default::default(),
        source: Some(SourcePosition {
            topic: topic.to_string(),
            partition,
            offset,
        }),
    })
}
