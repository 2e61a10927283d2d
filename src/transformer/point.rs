//! Conversion of enriched envelopes into time-series data points and their
//! line-protocol rendering.

use std::collections::BTreeMap;
use std::fmt;

use crate::enricher::AppMetadata;
use crate::Error;

use super::{ContainerMetric, Envelope, EventKind, HttpStartStop, LogMessage};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}i"),
            FieldValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// One point for the time-series store. Tags and fields are kept in BTreeMaps
/// so the rendering order is lexicographic by key, which is what the wire
/// format requires for tags.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub measurement: &'static str,
    pub tags: BTreeMap<&'static str, String>,
    pub fields: BTreeMap<&'static str, FieldValue>,
    pub timestamp_ns: i64,
}

impl DataPoint {
    /// Renders the point as one line of line protocol, without the trailing
    /// newline: `measurement,tag=val,... field=val,... timestamp-ns`.
    pub fn to_line(&self) -> String {
        let mut line = escape_measurement(self.measurement);
        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }
        line.push(' ');
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                line.push(',');
            }
            first = false;
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&value.to_string());
        }
        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        line
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Converts an enriched envelope into a data point. Events without metadata
/// and unsupported event or source types yield `Error::Discarded`, which the
/// sink writer treats as a skip.
pub fn to_data_point(env: &Envelope) -> Result<DataPoint, Error> {
    if env.meta.app.is_empty() {
        return Err(Error::Discarded);
    }

    match env.event.kind() {
        EventKind::HttpStartStop => match &env.event.http_start_stop {
            Some(http) => Ok(convert_http_start_stop(http, &env.meta)),
            None => Err(Error::Discarded),
        },
        EventKind::LogMessage => match &env.event.log_message {
            Some(log) => convert_log_message(log, &env.meta),
            None => Err(Error::Discarded),
        },
        EventKind::ContainerMetric => match &env.event.container_metric {
            Some(metric) => Ok(convert_container_metric(
                metric,
                env.event.timestamp,
                &env.meta,
            )),
            None => Err(Error::Discarded),
        },
        EventKind::Other => Err(Error::Discarded),
    }
}

fn meta_tags(meta: &AppMetadata) -> BTreeMap<&'static str, String> {
    BTreeMap::from([
        ("app", meta.app.clone()),
        ("app_guid", meta.app_guid.clone()),
        ("space", meta.space.clone()),
        ("space_guid", meta.space_guid.clone()),
        ("org", meta.org.clone()),
        ("org_guid", meta.org_guid.clone()),
    ])
}

fn method_name(method: i32) -> String {
    match method {
        1 => "GET".to_string(),
        2 => "POST".to_string(),
        3 => "PUT".to_string(),
        4 => "DELETE".to_string(),
        5 => "HEAD".to_string(),
        other => other.to_string(),
    }
}

fn message_type_name(message_type: i32) -> String {
    match message_type {
        0 => "OUT".to_string(),
        _ => "ERR".to_string(),
    }
}

fn convert_http_start_stop(e: &HttpStartStop, meta: &AppMetadata) -> DataPoint {
    let mut tags = meta_tags(meta);
    tags.insert("instance", e.instance_index.to_string());
    tags.insert("method", method_name(e.method));
    tags.insert("status_code", e.status_code.to_string());

    let duration = (e.stop_timestamp - e.start_timestamp) as f64 / 1e9;
    let fields = BTreeMap::from([
        // count is not strictly needed but kept for downstream convenience
        ("count", FieldValue::Integer(1)),
        ("duration", FieldValue::Float(duration)),
        ("response_size", FieldValue::Integer(e.content_length)),
    ]);

    DataPoint {
        measurement: "http_request",
        tags,
        fields,
        timestamp_ns: e.start_timestamp,
    }
}

fn convert_log_message(e: &LogMessage, meta: &AppMetadata) -> Result<DataPoint, Error> {
    let message_type = if e.source_type.starts_with("APP") || e.source_type.starts_with("App") {
        message_type_name(e.message_type)
    } else if e.source_type.starts_with("RTR") {
        "RTR".to_string()
    } else {
        return Err(Error::Discarded);
    };

    let mut tags = meta_tags(meta);
    tags.insert("instance", e.source_instance.clone());
    tags.insert("type", message_type);

    let fields = BTreeMap::from([
        ("count", FieldValue::Integer(1)),
        ("size", FieldValue::Integer(e.message.len() as i64)),
    ]);

    Ok(DataPoint {
        measurement: "log",
        tags,
        fields,
        timestamp_ns: e.timestamp,
    })
}

fn convert_container_metric(
    e: &ContainerMetric,
    timestamp_ns: i64,
    meta: &AppMetadata,
) -> DataPoint {
    let mut tags = meta_tags(meta);
    tags.insert("instance", e.instance_index.to_string());

    // The _pct ratios keep IEEE-754 semantics: a zero quota produces NaN/Inf
    let fields = BTreeMap::from([
        ("cpu", FieldValue::Float(e.cpu_percentage)),
        ("memory", FieldValue::Integer(e.memory_bytes as i64)),
        ("disk", FieldValue::Integer(e.disk_bytes as i64)),
        (
            "memory_quota",
            FieldValue::Integer(e.memory_bytes_quota as i64),
        ),
        ("disk_quota", FieldValue::Integer(e.disk_bytes_quota as i64)),
        (
            "memory_pct",
            FieldValue::Float(e.memory_bytes as f64 / e.memory_bytes_quota as f64),
        ),
        (
            "disk_pct",
            FieldValue::Float(e.disk_bytes as f64 / e.disk_bytes_quota as f64),
        ),
    ]);

    DataPoint {
        measurement: "instance",
        tags,
        fields,
        timestamp_ns,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;

    #[test]
    fn app_log_renders_the_expected_line() {
        let env = envelope(LOG_MSG, app_meta());
        let point = to_data_point(&env).unwrap();
        assert_eq!(
            point.to_line(),
            "log,app=app,app_guid=00000000-0000-0000-0000-000000000000,instance=0,\
             org=org,org_guid=20000000-0000-0000-0000-000000000000,space=space,\
             space_guid=10000000-0000-0000-0000-000000000000,type=OUT \
             count=1i,size=12i 123456789012345000"
        );
    }

    #[test]
    fn app_err_log_renders_the_expected_line() {
        let env = envelope(APP_ERR_LOG_MSG, app_meta());
        let point = to_data_point(&env).unwrap();
        assert_eq!(
            point.to_line(),
            "log,app=app,app_guid=00000000-0000-0000-0000-000000000000,instance=1,\
             org=org,org_guid=20000000-0000-0000-0000-000000000000,space=space,\
             space_guid=10000000-0000-0000-0000-000000000000,type=ERR \
             count=1i,size=16i 123456789000000000"
        );
    }

    #[test]
    fn rtr_log_is_tagged_rtr() {
        let mut meta = app_meta();
        meta.app_guid = "00000000-0000-0000-0000-000000000003".to_string();
        let env = envelope(RTR_LOG_MSG, meta);
        let point = to_data_point(&env).unwrap();
        assert_eq!(point.measurement, "log");
        assert_eq!(point.tags["type"], "RTR");
        assert_eq!(point.tags["instance"], "2");
    }

    #[test]
    fn unknown_source_type_is_discarded() {
        let env = envelope(UNKNOWN_LOG_MSG, app_meta());
        let err = to_data_point(&env).unwrap_err();
        assert!(matches!(err, Error::Discarded), "got {err:?}");
    }

    #[test]
    fn empty_metadata_is_discarded_regardless_of_type() {
        for msg in [LOG_MSG, HTTP_START_STOP, CONTAINER_METRIC] {
            let env = envelope(msg, AppMetadata::default());
            let err = to_data_point(&env).unwrap_err();
            assert!(matches!(err, Error::Discarded), "got {err:?}");
        }
    }

    #[test]
    fn unsupported_event_type_is_discarded() {
        let mut env = envelope(LOG_MSG, app_meta());
        env.event.event_type = 6;
        let err = to_data_point(&env).unwrap_err();
        assert!(matches!(err, Error::Discarded), "got {err:?}");
    }

    #[test]
    fn http_start_stop_point_schema() {
        let meta = AppMetadata {
            app: "app2".to_string(),
            space: "space2".to_string(),
            org: "org2".to_string(),
            app_guid: "be268fe2-00cc-41c6-8b7f-0fdb65e25060".to_string(),
            space_guid: "10000000-0000-0000-0000-000000000002".to_string(),
            org_guid: "20000000-0000-0000-0000-000000000002".to_string(),
        };
        let env = envelope(HTTP_START_STOP, meta);
        let point = to_data_point(&env).unwrap();

        assert_eq!(
            point.to_line(),
            "http_request,app=app2,app_guid=be268fe2-00cc-41c6-8b7f-0fdb65e25060,\
             instance=1,method=PUT,org=org2,org_guid=20000000-0000-0000-0000-000000000002,\
             space=space2,space_guid=10000000-0000-0000-0000-000000000002,status_code=200 \
             count=1i,duration=0,response_size=0i 1524923912949154418"
        );
    }

    #[test]
    fn http_duration_is_seconds_as_float() {
        let mut env = envelope(HTTP_START_STOP, app_meta());
        {
            let http = env.event.http_start_stop.as_mut().unwrap();
            http.start_timestamp = 1_524_923_912_949_154_418;
            http.stop_timestamp = 1_524_923_913_199_154_418; // 250ms later
        }
        let point = to_data_point(&env).unwrap();
        assert_eq!(point.fields["duration"], FieldValue::Float(0.25));
        assert_eq!(point.timestamp_ns, 1_524_923_912_949_154_418);
    }

    #[test]
    fn container_metric_point_schema() {
        let meta = AppMetadata {
            app: "app1".to_string(),
            space: "space1".to_string(),
            org: "org1".to_string(),
            app_guid: "00000000-0000-0000-0000-000000000001".to_string(),
            space_guid: "10000000-0000-0000-0000-000000000001".to_string(),
            org_guid: "20000000-0000-0000-0000-000000000001".to_string(),
        };
        let env = envelope(CONTAINER_METRIC, meta);
        let point = to_data_point(&env).unwrap();

        assert_eq!(point.measurement, "instance");
        assert_eq!(point.tags["instance"], "1");
        assert!(!point.tags.contains_key("method"));
        assert!(!point.tags.contains_key("status_code"));
        assert_eq!(point.fields["cpu"], FieldValue::Float(1.212661987393707));
        assert_eq!(point.fields["memory"], FieldValue::Integer(54050816));
        assert_eq!(point.fields["disk"], FieldValue::Integer(109563904));
        assert_eq!(point.fields["memory_quota"], FieldValue::Integer(67108864));
        assert_eq!(point.fields["disk_quota"], FieldValue::Integer(1073741824));
        assert_eq!(
            point.fields["memory_pct"],
            FieldValue::Float(0.805419921875)
        );
        assert_eq!(
            point.fields["disk_pct"],
            FieldValue::Float(0.10203933715820312)
        );
        // timestamp comes from the envelope, not the metric
        assert_eq!(point.timestamp_ns, 123456789012345678);
        assert_eq!(
            point.to_line(),
            "instance,app=app1,app_guid=00000000-0000-0000-0000-000000000001,instance=1,\
             org=org1,org_guid=20000000-0000-0000-0000-000000000001,space=space1,\
             space_guid=10000000-0000-0000-0000-000000000001 \
             cpu=1.212661987393707,disk=109563904i,disk_quota=1073741824i,memory=54050816i,\
             memory_pct=0.805419921875,memory_quota=67108864i 123456789012345678"
        );
    }

    #[test]
    fn zero_quota_ratio_is_preserved() {
        let mut env = envelope(CONTAINER_METRIC, app_meta());
        env.event.container_metric.as_mut().unwrap().memory_bytes_quota = 0;
        let point = to_data_point(&env).unwrap();
        match point.fields["memory_pct"] {
            FieldValue::Float(v) => assert!(v.is_infinite()),
            other => panic!("unexpected field value {other:?}"),
        }
    }

    #[test]
    fn tag_values_are_escaped() {
        let mut meta = app_meta();
        meta.app = "my app,v=2".to_string();
        let env = envelope(LOG_MSG, meta);
        let line = to_data_point(&env).unwrap().to_line();
        assert!(line.starts_with("log,app=my\\ app\\,v\\=2,"), "{line}");
    }
}
