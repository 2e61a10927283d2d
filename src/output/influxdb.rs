//! Line-protocol sink for the time-series database.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use super::SyncWriter;
use crate::transformer::{self, Envelope};
use crate::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigInfluxDb {
    /// URL of InfluxDB.
    pub addr: String,
    /// Name of the InfluxDB database to write to.
    pub database: String,
    /// Username to connect to InfluxDB.
    #[serde(default)]
    pub username: Option<String>,
    /// Password to connect to InfluxDB.
    #[serde(default)]
    pub password: Option<String>,
    /// Skip TLS certificate validation when connecting to InfluxDB.
    #[serde(default)]
    pub skip_ssl_validation: bool,
    /// Timeout for requests to InfluxDB.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Name of the retention policy to use instead of the default one.
    #[serde(default)]
    pub retention_policy: Option<String>,
    /// Timeout of the startup check that InfluxDB is up.
    #[serde(with = "humantime_serde", default = "default_ping_timeout")]
    pub ping_timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_ping_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Ships batches of data points as line protocol over HTTP.
pub struct InfluxDb {
    http: reqwest::Client,
    write_url: Url,
    ping_url: Url,
    cfg: ConfigInfluxDb,
}

impl InfluxDb {
    pub fn new(cfg: ConfigInfluxDb, user_agent: &str) -> Result<Self, Error> {
        let base = Url::parse(&cfg.addr)
            .map_err(|err| Error::Config(format!("invalid InfluxDB URL {:?}: {err}", cfg.addr)))?;

        let mut write_url = base
            .join("write")
            .map_err(|err| Error::Config(format!("building write URL: {err}")))?;
        write_url
            .query_pairs_mut()
            .append_pair("db", &cfg.database);
        if let Some(rp) = &cfg.retention_policy {
            write_url.query_pairs_mut().append_pair("rp", rp);
        }
        let ping_url = base
            .join("ping")
            .map_err(|err| Error::Config(format!("building ping URL: {err}")))?;

        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(user_agent)
            .danger_accept_invalid_certs(cfg.skip_ssl_validation)
            .build()?;

        Ok(Self {
            http,
            write_url,
            ping_url,
            cfg,
        })
    }

    /// Renders a batch as line protocol, one LF-terminated line per point.
    /// Discarded envelopes are dropped silently; any other transform error
    /// aborts the batch.
    fn build_body(envs: &[Envelope]) -> Result<String, Error> {
        let mut body = String::new();
        for env in envs {
            match transformer::to_data_point(env) {
                Ok(point) => {
                    body.push_str(&point.to_line());
                    body.push('\n');
                }
                Err(Error::Discarded) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(body)
    }

    /// Preflight check that the server is up.
    pub async fn ping(&self, timeout: Duration) -> Result<(), Error> {
        let resp = self
            .http
            .get(self.ping_url.clone())
            .timeout(timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                message: "ping failed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SyncWriter for InfluxDb {
    async fn write(&self, envs: &[Envelope]) -> Result<(), Error> {
        let body = Self::build_body(envs)?;
        if body.is_empty() {
            // nothing survived the transform; don't emit an empty request
            return Ok(());
        }

        let mut req = self.http.post(self.write_url.clone()).body(body);
        if let Some(username) = &self.cfg.username {
            req = req.basic_auth(username, self.cfg.password.as_deref());
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}
