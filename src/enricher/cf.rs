//! Platform API client: resolves a single app and snapshots all running apps.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{AppMetadata, Enricher};
use crate::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigCf {
    /// URL of the Cloud Foundry API endpoint.
    pub api: String,
    /// Username for the Cloud Foundry API.
    pub user: String,
    /// Password for the Cloud Foundry API.
    pub password: String,
    /// Timeout for Cloud Foundry API requests.
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,
    /// Skip TLS certificate validation for Cloud Foundry API requests.
    #[serde(default)]
    pub skip_ssl_validation: bool,
    /// Number of results per page to fetch from the API. Must be > 0.
    #[serde(default = "default_results_per_page")]
    pub results_per_page: usize,
    /// Static bearer token for the Cloud Foundry API; basic auth is used when unset.
    #[serde(default)]
    pub token: Option<String>,
    /// Client ID for the Cloud Foundry API.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret for the Cloud Foundry API.
    #[serde(default)]
    pub client_secret: Option<String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_results_per_page() -> usize {
    50
}

pub struct CfClient {
    http: reqwest::Client,
    base: Url,
    cfg: ConfigCf,
}

// v2 API resource envelopes.

#[derive(Debug, Deserialize)]
struct Resource<T> {
    metadata: ResourceMetadata,
    entity: T,
}

#[derive(Debug, Deserialize)]
struct ResourceMetadata {
    guid: String,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    next_url: Option<String>,
    resources: Vec<Resource<T>>,
}

#[derive(Debug, Deserialize)]
struct AppEntity {
    name: String,
    #[serde(default)]
    state: String,
    space_guid: String,
}

#[derive(Debug, Deserialize)]
struct SpaceEntity {
    name: String,
    organization_guid: String,
}

#[derive(Debug, Deserialize)]
struct OrgEntity {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    description: String,
}

impl CfClient {
    pub fn new(cfg: ConfigCf, user_agent: &str) -> Result<Self, Error> {
        if cfg.results_per_page == 0 {
            return Err(Error::Config(format!(
                "invalid value for results_per_page: {}",
                cfg.results_per_page
            )));
        }

        let base = Url::parse(&cfg.api)
            .map_err(|err| Error::Config(format!("invalid CF API URL {:?}: {err}", cfg.api)))?;
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(user_agent)
            .danger_accept_invalid_certs(cfg.skip_ssl_validation)
            .build()?;

        Ok(Self { http, base, cfg })
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T, Error> {
        let url = self
            .base
            .join(path_and_query)
            .map_err(|err| Error::Config(format!("invalid API path {path_and_query:?}: {err}")))?;

        let mut req = self.http.get(url);
        req = match &self.cfg.token {
            Some(token) => req.bearer_auth(token),
            None => req.basic_auth(&self.cfg.user, Some(&self.cfg.password)),
        };

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body: ApiError = resp.json().await.unwrap_or_default();
            return Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                message: if body.error_code.is_empty() {
                    body.description
                } else {
                    body.error_code
                },
            });
        }

        Ok(resp.json().await?)
    }

    async fn fetch_app(&self, app_guid: &str) -> Result<Resource<AppEntity>, Error> {
        match self.get_json(&format!("/v2/apps/{app_guid}")).await {
            Err(Error::UnexpectedStatus { status, message })
                if status == StatusCode::NOT_FOUND.as_u16()
                    && message.contains("CF-AppNotFound") =>
            {
                Err(Error::AppNotFound(app_guid.to_string()))
            }
            other => other,
        }
    }

    async fn list_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<Resource<T>>, Error> {
        let mut resources = Vec::new();
        let mut next = Some(format!(
            "{path}?results-per-page={}",
            self.cfg.results_per_page
        ));
        while let Some(url) = next {
            let page: Page<T> = self.get_json(&url).await?;
            resources.extend(page.resources);
            next = page.next_url;
        }
        Ok(resources)
    }

    /// Returns the metadata for all STARTED applications, joined with their
    /// spaces and orgs. Orgs and spaces are listed up front and joined in
    /// memory, so no per-app requests are needed.
    pub async fn running_app_metadata(&self) -> Result<Vec<AppMetadata>, Error> {
        let orgs = self.list_all::<OrgEntity>("/v2/organizations").await?;
        let spaces = self.list_all::<SpaceEntity>("/v2/spaces").await?;
        let apps = self.list_all::<AppEntity>("/v2/apps").await?;

        Ok(join_app_space_org(
            apps.into_iter().map(Into::into).collect(),
            spaces.into_iter().map(Into::into).collect(),
            orgs.into_iter().map(Into::into).collect(),
        ))
    }
}

#[async_trait]
impl Enricher for CfClient {
    async fn app_metadata(&self, app_guid: &str) -> Result<AppMetadata, Error> {
        let app = self.fetch_app(app_guid).await?;
        let space: Resource<SpaceEntity> = self
            .get_json(&format!("/v2/spaces/{}", app.entity.space_guid))
            .await?;
        let org: Resource<OrgEntity> = self
            .get_json(&format!(
                "/v2/organizations/{}",
                space.entity.organization_guid
            ))
            .await?;

        Ok(AppMetadata {
            app: app.entity.name,
            space: space.entity.name,
            org: org.entity.name,
            app_guid: app.metadata.guid,
            space_guid: space.metadata.guid,
            org_guid: org.metadata.guid,
        })
    }
}

// Flat records decoupled from the wire envelopes, so the join is testable on
// its own.

#[derive(Debug, Clone)]
pub(crate) struct AppRecord {
    pub guid: String,
    pub name: String,
    pub state: String,
    pub space_guid: String,
}

#[derive(Debug, Clone)]
pub(crate) struct SpaceRecord {
    pub guid: String,
    pub name: String,
    pub organization_guid: String,
}

#[derive(Debug, Clone)]
pub(crate) struct OrgRecord {
    pub guid: String,
    pub name: String,
}

impl From<Resource<AppEntity>> for AppRecord {
    fn from(r: Resource<AppEntity>) -> Self {
        Self {
            guid: r.metadata.guid,
            name: r.entity.name,
            state: r.entity.state,
            space_guid: r.entity.space_guid,
        }
    }
}

impl From<Resource<SpaceEntity>> for SpaceRecord {
    fn from(r: Resource<SpaceEntity>) -> Self {
        Self {
            guid: r.metadata.guid,
            name: r.entity.name,
            organization_guid: r.entity.organization_guid,
        }
    }
}

impl From<Resource<OrgEntity>> for OrgRecord {
    fn from(r: Resource<OrgEntity>) -> Self {
        Self {
            guid: r.metadata.guid,
            name: r.entity.name,
        }
    }
}

/// An app is included iff it is STARTED and both its space and that space's
/// org are present. Apps in unknown spaces or orgs are silently dropped, a
/// known race with the upstream listing.
pub(crate) fn join_app_space_org(
    apps: Vec<AppRecord>,
    spaces: Vec<SpaceRecord>,
    orgs: Vec<OrgRecord>,
) -> Vec<AppMetadata> {
    use std::collections::HashMap;

    let orgmap: HashMap<&str, &OrgRecord> = orgs.iter().map(|o| (o.guid.as_str(), o)).collect();
    let spacemap: HashMap<&str, &SpaceRecord> =
        spaces.iter().map(|s| (s.guid.as_str(), s)).collect();

    let mut all = Vec::with_capacity(apps.len());
    for app in &apps {
        if app.state != "STARTED" {
            continue;
        }
        if let Some(space) = spacemap.get(app.space_guid.as_str()) {
            if let Some(org) = orgmap.get(space.organization_guid.as_str()) {
                all.push(AppMetadata {
                    app: app.name.clone(),
                    space: space.name.clone(),
                    org: org.name.clone(),
                    app_guid: app.guid.clone(),
                    space_guid: space.guid.clone(),
                    org_guid: org.guid.clone(),
                });
            }
        }
    }
    all
}
