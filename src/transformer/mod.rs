//! The unit of work flowing through the pipeline: a decoded bus event plus
//! the app metadata resolved for it and the input position to commit after a
//! durable write.

use base64::Engine as _;
use serde::{Deserialize, Deserializer};

use crate::enricher::{AppMetadata, Enricher};
use crate::Error;

mod point;

pub use point::{to_data_point, DataPoint, FieldValue};

const EVENT_TYPE_HTTP_START_STOP: i32 = 4;
const EVENT_TYPE_LOG_MESSAGE: i32 = 5;
const EVENT_TYPE_CONTAINER_METRIC: i32 = 9;

/// Raw event as decoded from the bus payload.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Event {
    pub origin: String,
    #[serde(rename = "eventType")]
    pub event_type: i32,
    pub timestamp: i64,
    pub job: String,
    pub index: String,
    pub ip: String,
    #[serde(rename = "logMessage")]
    pub log_message: Option<LogMessage>,
    #[serde(rename = "httpStartStop", alias = "HttpStartStop")]
    pub http_start_stop: Option<HttpStartStop>,
    #[serde(rename = "containerMetric")]
    pub container_metric: Option<ContainerMetric>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    HttpStartStop,
    LogMessage,
    ContainerMetric,
    Other,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self.event_type {
            EVENT_TYPE_HTTP_START_STOP => EventKind::HttpStartStop,
            EVENT_TYPE_LOG_MESSAGE => EventKind::LogMessage,
            EVENT_TYPE_CONTAINER_METRIC => EventKind::ContainerMetric,
            _ => EventKind::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LogMessage {
    /// Raw message bytes, base64 on the wire.
    #[serde(deserialize_with = "from_base64")]
    pub message: Vec<u8>,
    pub message_type: i32,
    pub timestamp: i64,
    pub app_id: String,
    pub source_type: String,
    pub source_instance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HttpStartStop {
    #[serde(rename = "startTimestamp")]
    pub start_timestamp: i64,
    #[serde(rename = "stopTimestamp")]
    pub stop_timestamp: i64,
    pub method: i32,
    #[serde(rename = "statusCode")]
    pub status_code: i32,
    #[serde(rename = "contentLength")]
    pub content_length: i64,
    #[serde(rename = "instanceIndex")]
    pub instance_index: i32,
    #[serde(rename = "applicationId")]
    pub application_id: Option<EventUuid>,
}

/// 128-bit identifier split in two little-endian halves on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventUuid {
    pub low: u64,
    pub high: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContainerMetric {
    #[serde(rename = "applicationId")]
    pub application_id: String,
    #[serde(rename = "instanceIndex")]
    pub instance_index: i32,
    #[serde(rename = "cpuPercentage")]
    pub cpu_percentage: f64,
    #[serde(rename = "memoryBytes")]
    pub memory_bytes: u64,
    #[serde(rename = "diskBytes")]
    pub disk_bytes: u64,
    #[serde(rename = "memoryBytesQuota")]
    pub memory_bytes_quota: u64,
    #[serde(rename = "diskBytesQuota")]
    pub disk_bytes_quota: u64,
}

fn from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(serde::de::Error::custom)
}

/// Where the message came from on the bus; committed upstream once the
/// derived data point has been durably written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Envelope {
    pub event: Event,
    pub meta: AppMetadata,
    pub source: Option<SourcePosition>,
}

impl Envelope {
    /// Extracts the app GUID from the event, or an empty string for event
    /// types that carry none.
    pub fn app_guid(&self) -> String {
        match self.event.kind() {
            EventKind::HttpStartStop => self
                .event
                .http_start_stop
                .as_ref()
                .and_then(|h| h.application_id.as_ref())
                .map(uuid_to_string)
                .unwrap_or_default(),
            EventKind::LogMessage => self
                .event
                .log_message
                .as_ref()
                .map(|l| l.app_id.clone())
                .unwrap_or_default(),
            EventKind::ContainerMetric => self
                .event
                .container_metric
                .as_ref()
                .map(|c| c.application_id.clone())
                .unwrap_or_default(),
            EventKind::Other => String::new(),
        }
    }

    /// Fills in the metadata by resolving the event's app GUID.
    pub async fn enrich<E: Enricher + ?Sized>(&mut self, enricher: &E) -> Result<(), Error> {
        let app_guid = self.app_guid();
        if app_guid.is_empty() {
            return Err(Error::NoAppGuid);
        }
        self.meta = enricher.app_metadata(&app_guid).await?;
        Ok(())
    }
}

/// Formats the two little-endian halves as a canonical 8-4-4-4-12 string.
pub fn uuid_to_string(uuid: &EventUuid) -> String {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&uuid.low.to_le_bytes());
    bytes[8..].copy_from_slice(&uuid.high.to_le_bytes());
    let hex = |range: std::ops::Range<usize>| -> String {
        bytes[range].iter().map(|b| format!("{b:02x}")).collect()
    };
    format!(
        "{}-{}-{}-{}-{}",
        hex(0..4),
        hex(4..6),
        hex(6..8),
        hex(8..10),
        hex(10..16)
    )
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    pub(crate) const LOG_MSG: &str = r#"{
        "origin": "rep",
        "eventType": 5,
        "timestamp": 123456789012345678,
        "job": "cell",
        "index": "0",
        "ip": "192.168.0.50",
        "logMessage": {
            "message": "aGVsbG8gd29ybGQK",
            "message_type": 0,
            "timestamp": 123456789012345000,
            "app_id": "00000000-0000-0000-0000-000000000000",
            "source_type": "APP",
            "source_instance": "0"
        }
    }"#;

    pub(crate) const APP_ERR_LOG_MSG: &str = r#"{
        "origin": "rep",
        "eventType": 5,
        "timestamp": 123456789012345678,
        "job": "cell",
        "index": "0",
        "ip": "192.168.0.50",
        "logMessage": {
            "message": "eWFkZGF5YWRkYXlhZGRhCg==",
            "message_type": 2,
            "timestamp": 123456789000000000,
            "app_id": "00000000-0000-0000-0000-000000000000",
            "source_type": "App",
            "source_instance": "1"
        }
    }"#;

    pub(crate) const RTR_LOG_MSG: &str = r#"{
        "origin": "gorouter",
        "eventType": 5,
        "timestamp": 123456789012345678,
        "job": "router",
        "index": "7",
        "ip": "192.168.1.50",
        "logMessage": {
            "message": "aGVsbG8gd29ybGQK",
            "message_type": 0,
            "timestamp": 123456789012345000,
            "app_id": "00000000-0000-0000-0000-000000000003",
            "source_type": "RTR",
            "source_instance": "2"
        }
    }"#;

    pub(crate) const UNKNOWN_LOG_MSG: &str = r#"{
        "origin": "unknown",
        "eventType": 5,
        "timestamp": 123456789012345678,
        "job": "unknown",
        "index": "0",
        "ip": "192.168.0.50",
        "logMessage": {
            "message": "aGVsbG8gd29ybGQK",
            "message_type": 0,
            "timestamp": 123456789012345000,
            "app_id": "00000000-0000-0000-0000-000000000003",
            "source_type": "STG",
            "source_instance": "1"
        }
    }"#;

    pub(crate) const NO_APP_GUID_LOG_MSG: &str = r#"{
        "origin": "rep",
        "eventType": 5,
        "timestamp": 123456789012345678,
        "job": "cell",
        "index": "0",
        "ip": "192.168.0.50",
        "logMessage": {
            "message": "aGVsbG8gd29ybGQK",
            "message_type": 0,
            "timestamp": 123456789012345000,
            "app_id": "",
            "source_type": "APP",
            "source_instance": "1"
        }
    }"#;

    pub(crate) const CONTAINER_METRIC: &str = r#"{
        "origin": "rep",
        "eventType": 9,
        "timestamp": 123456789012345678,
        "job": "cell",
        "index": "0",
        "ip": "192.168.0.50",
        "containerMetric": {
            "applicationId": "00000000-0000-0000-0000-000000000001",
            "instanceIndex": 1,
            "cpuPercentage": 1.212661987393707,
            "memoryBytes": 54050816,
            "diskBytes": 109563904,
            "memoryBytesQuota": 67108864,
            "diskBytesQuota": 1073741824
        }
    }"#;

    pub(crate) const HTTP_START_STOP: &str = r#"{
        "origin": "gorouter",
        "eventType": 4,
        "timestamp": 123456789012345678,
        "job": "router",
        "index": "1",
        "ip": "192.168.0.50",
        "HttpStartStop": {
            "startTimestamp": 1524923912949154418,
            "stopTimestamp": 1524923912949154418,
            "requestId": {"low": 18034462508262158772, "high": 1299234503289247342},
            "peerType": 1,
            "method": 3,
            "uri": "http://backend.example.com/eureka/apps/BACKEND",
            "remoteAddress": "127.0.0.1:14130",
            "userAgent": "Java-EurekaClient/v1.4.11",
            "statusCode": 200,
            "contentLength": 0,
            "applicationId": {"low": 14285923797169022654, "high": 6940295952872734603},
            "instanceIndex": 1,
            "instanceId": "d06a0894-aea7-4b88-4860-08fe",
            "forwarded": ["100.73.61.130", "127.0.0.1"]
        }
    }"#;

    pub(crate) fn app_meta() -> AppMetadata {
        AppMetadata {
            app: "app".to_string(),
            space: "space".to_string(),
            org: "org".to_string(),
            app_guid: "00000000-0000-0000-0000-000000000000".to_string(),
            space_guid: "10000000-0000-0000-0000-000000000000".to_string(),
            org_guid: "20000000-0000-0000-0000-000000000000".to_string(),
        }
    }

    pub(crate) fn envelope(msg: &str, meta: AppMetadata) -> Envelope {
        Envelope {
            event: serde_json::from_str(msg).unwrap(),
            meta,
            source: None,
        }
    }
}
