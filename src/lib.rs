use thiserror::Error;

/// Application name reported in logs, the User-Agent header and the debug index.
pub const APP_NAME: &str = "cf-metrics-refinery";

/// Crate version, also reported on the runtime-stats endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Error, Debug)]
pub enum Error {
    /// The platform has no app with this GUID. The Display output carries the
    /// `CF-AppNotFound` token so that log greps keep working against the
    /// upstream API error code.
    #[error("CF-AppNotFound: no app with GUID {0}")]
    AppNotFound(String),

    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {message}")]
    UnexpectedStatus { status: u16, message: String },

    #[error("decoding event: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("kafka: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    #[error("configuration: {0}")]
    Config(String),

    /// Sentinel for events that are filtered out, not failures. The sink
    /// writer treats it as a skip.
    #[error("event discarded")]
    Discarded,

    #[error("envelope does not contain an app GUID")]
    NoAppGuid,

    #[error("input closed")]
    InputClosed,

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub mod config;
pub mod debug;
pub mod enricher;
pub mod input;
pub mod output;
pub mod pipeline;
pub mod transformer;
