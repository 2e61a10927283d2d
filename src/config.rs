//! Environment-based configuration under the `CFMR_` prefix.

use std::time::Duration;

use serde::Deserialize;

use crate::debug::ConfigServer;
use crate::enricher::ConfigCf;
use crate::input::ConfigKafka;
use crate::output::{ConfigBatcher, ConfigInfluxDb};
use crate::Error;

pub const ENV_PREFIX: &str = "CFMR_";

/// Root configuration. Each subsystem deserializes from its own variable
/// group; unknown `CFMR_*` variables are rejected so typos fail loudly
/// instead of being silently ignored.
#[derive(Debug, Clone)]
pub struct Config {
    pub cf: ConfigCf,
    pub influxdb: ConfigInfluxDb,
    pub batcher: ConfigBatcher,
    pub kafka: ConfigKafka,
    pub server: ConfigServer,
    pub timings: ConfigTimings,
}

/// Cache control-loop timings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigTimings {
    /// How often to fetch a fresh copy of all metadata.
    #[serde(with = "humantime_serde", default = "default_metadata_refresh")]
    pub metadata_refresh: Duration,
    /// How long before metadata is considered expired.
    #[serde(with = "humantime_serde", default = "default_metadata_expire")]
    pub metadata_expire: Duration,
    /// How often to check for expired metadata.
    #[serde(with = "humantime_serde", default = "default_metadata_expire_check")]
    pub metadata_expire_check: Duration,
    /// How long before a negative cache entry is considered expired.
    #[serde(with = "humantime_serde", default = "default_negative_cache_expire")]
    pub negative_cache_expire: Duration,
    /// How often to check for expired negative cache entries.
    #[serde(
        with = "humantime_serde",
        default = "default_negative_cache_expire_check"
    )]
    pub negative_cache_expire_check: Duration,
}

fn default_metadata_refresh() -> Duration {
    Duration::from_secs(600)
}

fn default_metadata_expire() -> Duration {
    Duration::from_secs(180)
}

fn default_metadata_expire_check() -> Duration {
    Duration::from_secs(60)
}

fn default_negative_cache_expire() -> Duration {
    Duration::from_secs(1200)
}

fn default_negative_cache_expire_check() -> Duration {
    Duration::from_secs(180)
}

struct VarSpec {
    name: &'static str,
    default: &'static str,
    desc: &'static str,
}

const fn var(name: &'static str, default: &'static str, desc: &'static str) -> VarSpec {
    VarSpec {
        name,
        default,
        desc,
    }
}

/// Every variable the configuration understands. `default` is empty for
/// required variables. Also the allowlist for the strict unknown-var check.
const VARS: &[VarSpec] = &[
    var("CFMR_CF_API", "", "URL of the Cloud Foundry API endpoint"),
    var("CFMR_CF_USER", "", "Username for the Cloud Foundry API"),
    var("CFMR_CF_PASSWORD", "", "Password for the Cloud Foundry API"),
    var("CFMR_CF_TIMEOUT", "1m", "Timeout for Cloud Foundry API requests"),
    var(
        "CFMR_CF_SKIP_SSL_VALIDATION",
        "false",
        "Skip TLS certificate validation for Cloud Foundry API requests"
    ),
    var(
        "CFMR_CF_RESULTS_PER_PAGE",
        "50",
        "Number of results per page to fetch from the CF API"
    ),
    var("CFMR_CF_TOKEN", "", "Static bearer token for the Cloud Foundry API"),
    var("CFMR_CF_CLIENT_ID", "", "Client ID for the Cloud Foundry API"),
    var(
        "CFMR_CF_CLIENT_SECRET",
        "",
        "Client secret for the Cloud Foundry API"
    ),
    var("CFMR_INFLUXDB_ADDR", "", "URL of InfluxDB"),
    var(
        "CFMR_INFLUXDB_DATABASE",
        "",
        "Name of the InfluxDB database to write to"
    ),
    var("CFMR_INFLUXDB_USERNAME", "", "Username to connect to InfluxDB"),
    var("CFMR_INFLUXDB_PASSWORD", "", "Password to connect to InfluxDB"),
    var(
        "CFMR_INFLUXDB_SKIP_SSL_VALIDATION",
        "false",
        "Skip TLS certificate validation when connecting to InfluxDB"
    ),
    var("CFMR_INFLUXDB_TIMEOUT", "1m", "Timeout for requests to InfluxDB"),
    var(
        "CFMR_INFLUXDB_RETENTION_POLICY",
        "",
        "Name of the retention policy to use instead of the default one"
    ),
    var(
        "CFMR_INFLUXDB_PING_TIMEOUT",
        "5s",
        "Timeout of the startup check that InfluxDB is up"
    ),
    var(
        "CFMR_BATCHER_FLUSH_INTERVAL",
        "3s",
        "How often to flush pending events"
    ),
    var(
        "CFMR_BATCHER_FLUSH_MESSAGES",
        "5000",
        "How many messages to flush together"
    ),
    var(
        "CFMR_KAFKA_BROKERS",
        "",
        "Kafka bootstrap brokers, comma-separated host:port pairs"
    ),
    var("CFMR_KAFKA_TOPICS", "", "Topics to read events from"),
    var(
        "CFMR_KAFKA_CONSUMER_GROUP",
        "",
        "Name of the Kafka consumer group"
    ),
    var("CFMR_KAFKA_SESSION_TIMEOUT", "1m", "Consumer session timeout"),
    var(
        "CFMR_KAFKA_OFFSET_NEWEST",
        "false",
        "If true start from the newest message when the group has no offset yet"
    ),
    var("CFMR_SERVER_PORT", "8080", "Port of the debug HTTP server"),
    var(
        "CFMR_METADATA_REFRESH",
        "10m",
        "How often to fetch a fresh copy of all metadata"
    ),
    var(
        "CFMR_METADATA_EXPIRE",
        "3m",
        "How long before metadata is considered expired"
    ),
    var(
        "CFMR_METADATA_EXPIRE_CHECK",
        "1m",
        "How often to check for expired metadata"
    ),
    var(
        "CFMR_NEGATIVE_CACHE_EXPIRE",
        "20m",
        "How long before a negative cache entry is considered expired"
    ),
    var(
        "CFMR_NEGATIVE_CACHE_EXPIRE_CHECK",
        "3m",
        "How often to check for expired negative cache entries"
    ),
];

impl Config {
    /// Parses the `CFMR_*` environment. Missing required variables and
    /// unknown `CFMR_*` variables are both fatal.
    pub fn from_env() -> Result<Self, Error> {
        check_disallowed(std::env::vars().map(|(key, _)| key))?;

        Ok(Self {
            cf: parse_group("CFMR_CF_")?,
            influxdb: parse_group("CFMR_INFLUXDB_")?,
            batcher: parse_group("CFMR_BATCHER_")?,
            kafka: parse_group("CFMR_KAFKA_")?,
            server: parse_group("CFMR_SERVER_")?,
            timings: parse_group(ENV_PREFIX)?,
        })
    }
}

fn parse_group<T: serde::de::DeserializeOwned>(prefix: &str) -> Result<T, Error> {
    envy::prefixed(prefix)
        .from_env()
        .map_err(|err| Error::Config(format!("parsing {prefix}* environment: {err}")))
}

fn check_disallowed<I: IntoIterator<Item = String>>(keys: I) -> Result<(), Error> {
    for key in keys {
        if key.starts_with(ENV_PREFIX) && !VARS.iter().any(|var| var.name == key) {
            return Err(Error::Config(format!(
                "unknown configuration variable {key}"
            )));
        }
    }
    Ok(())
}

/// Table of the configuration variables, printed when the configuration
/// cannot be parsed.
pub fn usage() -> String {
    let width = VARS.iter().map(|v| v.name.len()).max().unwrap_or(0);
    let mut out = format!("{:width$}  {:8}  DESCRIPTION\n", "VARIABLE", "DEFAULT");
    for var in VARS {
        let default = if var.default.is_empty() {
            "(required)"
        } else {
            var.default
        };
        out.push_str(&format!("{:width$}  {:8}  {}\n", var.name, default, var.desc));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn cf_group_parses_with_defaults() {
        let cf: ConfigCf = envy::prefixed("CFMR_CF_")
            .from_iter(vars(&[
                ("CFMR_CF_API", "https://api.example.com"),
                ("CFMR_CF_USER", "admin"),
                ("CFMR_CF_PASSWORD", "hunter2"),
            ]))
            .unwrap();
        assert_eq!(cf.api, "https://api.example.com");
        assert_eq!(cf.timeout, Duration::from_secs(60));
        assert_eq!(cf.results_per_page, 50);
        assert!(!cf.skip_ssl_validation);
        assert!(cf.token.is_none());
    }

    #[test]
    fn durations_accept_humantime_strings() {
        let cf: ConfigCf = envy::prefixed("CFMR_CF_")
            .from_iter(vars(&[
                ("CFMR_CF_API", "https://api.example.com"),
                ("CFMR_CF_USER", "admin"),
                ("CFMR_CF_PASSWORD", "hunter2"),
                ("CFMR_CF_TIMEOUT", "90s"),
            ]))
            .unwrap();
        assert_eq!(cf.timeout, Duration::from_secs(90));
    }

    #[test]
    fn missing_required_variable_is_an_error() {
        let result: Result<ConfigCf, _> = envy::prefixed("CFMR_CF_")
            .from_iter(vars(&[("CFMR_CF_API", "https://api.example.com")]));
        assert!(result.is_err());
    }

    #[test]
    fn kafka_topics_split_on_commas() {
        let kafka: ConfigKafka = envy::prefixed("CFMR_KAFKA_")
            .from_iter(vars(&[
                ("CFMR_KAFKA_BROKERS", "kafka-1:9092,kafka-2:9092"),
                ("CFMR_KAFKA_TOPICS", "cf-logs,cf-metrics"),
                ("CFMR_KAFKA_CONSUMER_GROUP", "cf-metrics-refinery"),
            ]))
            .unwrap();
        assert_eq!(kafka.topics, vec!["cf-logs", "cf-metrics"]);
        assert!(!kafka.offset_newest);
    }

    #[test]
    fn timings_have_the_documented_defaults() {
        let timings: ConfigTimings = envy::prefixed(ENV_PREFIX)
            .from_iter(Vec::new())
            .unwrap();
        assert_eq!(timings.metadata_refresh, Duration::from_secs(600));
        assert_eq!(timings.metadata_expire, Duration::from_secs(180));
        assert_eq!(timings.metadata_expire_check, Duration::from_secs(60));
        assert_eq!(timings.negative_cache_expire, Duration::from_secs(1200));
        assert_eq!(
            timings.negative_cache_expire_check,
            Duration::from_secs(180)
        );
    }

    #[test]
    fn unknown_prefixed_variables_are_rejected() {
        let err = check_disallowed(vec!["CFMR_CF_APII".to_string()]).unwrap_err();
        assert!(err.to_string().contains("CFMR_CF_APII"));

        check_disallowed(vec![
            "CFMR_CF_API".to_string(),
            "PATH".to_string(),
            "CF_INSTANCE_INDEX".to_string(),
        ])
        .unwrap();
    }

    #[test]
    fn usage_lists_every_variable() {
        let usage = usage();
        for var in VARS {
            assert!(usage.contains(var.name), "missing {}", var.name);
        }
        assert!(usage.contains("(required)"));
    }
}
