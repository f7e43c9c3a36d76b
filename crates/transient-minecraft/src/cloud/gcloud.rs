//! Google Cloud provider: Compute Engine hosts the server, Cloud Storage
//! holds one zip per session named by its UTC timestamp.
//!
//! Talks to the REST APIs directly. Endpoints are configurable so tests can
//! point them at a local mock server.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, Response, Url};
use tokio::sync::Mutex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::exec::{CommandRunner, Invocation};
use super::{Cloud, CloudKind, InstanceInfo, SaveOutcome};
use crate::archive;
use crate::config::{require, Config, GcloudConfig};
use crate::error::{Error, Result};

const PROVIDER: &str = "gcloud";

/// Header the metadata server insists on.
const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");

/// Lifetime assumed for tokens printed by the gcloud CLI.
const CLI_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/devstorage.read_write",
    "https://www.googleapis.com/auth/logging.write",
    "https://www.googleapis.com/auth/compute",
];

/// Google Cloud-backed [`Cloud`].
#[derive(Debug)]
pub struct GcloudCloud {
    settings: GcloudConfig,
    project: String,
    zone: String,
    machine_type: String,
    bucket: String,
    firewall_tag: String,
    instance_prefix: String,
    poll_interval: Duration,
    poll_timeout: Duration,
    http: Client,
    runner: Arc<dyn CommandRunner>,
    token: Mutex<Option<CachedToken>>,
}

/// An access token and when to stop reusing it.
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("refresh_at", &self.refresh_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Image {
    self_link: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,
    status: String,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instance {
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkInterface {
    #[serde(default)]
    access_configs: Vec<AccessConfig>,
}

#[derive(Debug, Deserialize)]
struct AccessConfig {
    #[serde(rename = "natIP")]
    nat_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectList {
    #[serde(default)]
    items: Vec<StoredObject>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoredObject {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl Instance {
    fn nat_ip(&self) -> Option<&str> {
        self.network_interfaces
            .first()?
            .access_configs
            .first()?
            .nat_ip
            .as_deref()
    }
}

/// Name for a save uploaded now. Lexicographic order is chronological.
#[must_use]
pub fn save_object_name() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let invalid = || Error::ConfigValidation {
        message: format!("invalid API endpoint: {base}"),
    };
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn check(service: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(Error::Api {
        service,
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}

impl GcloudCloud {
    /// Create the provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any of `GCLOUD_ZONE`, `GCLOUD_MACHINE_TYPE`,
    /// `GCLOUD_PROJECT_ID`, `GCLOUD_BUCKET` or `GCLOUD_FIREWALL_TAG` is unset,
    /// or the HTTP client cannot be built.
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let g = &config.gcloud;
        let zone = require(g.zone.as_ref(), "GCLOUD_ZONE")?.to_string();
        let machine_type = require(g.machine_type.as_ref(), "GCLOUD_MACHINE_TYPE")?.to_string();
        let project = require(g.project_id.as_ref(), "GCLOUD_PROJECT_ID")?.to_string();
        let bucket = require(g.bucket.as_ref(), "GCLOUD_BUCKET")?.to_string();
        let firewall_tag = require(g.firewall_tag.as_ref(), "GCLOUD_FIREWALL_TAG")?.to_string();

        let http = Client::builder()
            .user_agent(concat!("transient-minecraft/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            settings: g.clone(),
            project,
            zone,
            machine_type,
            bucket,
            firewall_tag,
            instance_prefix: config.launch.instance_prefix.clone(),
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            http,
            runner,
            token: Mutex::new(None),
        })
    }

    fn compute(&self, segments: &[&str]) -> Result<Url> {
        endpoint(&self.settings.compute_endpoint, segments)
    }

    fn zonal(&self, segments: &[&str]) -> Result<Url> {
        let mut all = vec!["projects", self.project.as_str(), "zones", self.zone.as_str()];
        all.extend_from_slice(segments);
        self.compute(&all)
    }

    fn storage(&self, segments: &[&str]) -> Result<Url> {
        endpoint(&self.settings.storage_endpoint, segments)
    }

    fn metadata(&self, segments: &[&str]) -> Result<Url> {
        endpoint(&self.settings.metadata_endpoint, segments)
    }

    /// Resolve an OAuth access token: configured, then metadata server, then
    /// the gcloud CLI. Fetched tokens are reused until shortly before they
    /// expire.
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = &self.settings.access_token {
            return Ok(token.clone());
        }

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let (value, lifetime) = self.fetch_token().await?;
        *cached = Some(CachedToken {
            value: value.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(value)
    }

    async fn fetch_token(&self) -> Result<(String, Duration)> {
        match self.metadata_token().await {
            Ok(token) => {
                let lifetime = token
                    .expires_in
                    .map_or(CLI_TOKEN_LIFETIME, Duration::from_secs);
                Ok((token.access_token, lifetime))
            }
            Err(err) => {
                debug!(error = %err, "Metadata server unavailable, asking the gcloud CLI");
                let stdout = self
                    .runner
                    .output(&Invocation::new(&self.settings.cli).args(["auth", "print-access-token"]))
                    .await?;
                Ok((stdout.trim().to_string(), CLI_TOKEN_LIFETIME))
            }
        }
    }

    async fn metadata_token(&self) -> Result<AccessToken> {
        let url = self.metadata(&["instance", "service-accounts", "default", "token"])?;
        let response = self
            .http
            .get(url)
            .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
            .timeout(Duration::from_secs(2))
            .send()
            .await?;
        Ok(check("metadata", response).await?.json().await?)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        service: &'static str,
        url: Url,
    ) -> Result<T> {
        let token = self.access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        Ok(check(service, response).await?.json().await?)
    }

    async fn wait_for_operation(&self, operation: &str, started: Instant) -> Result<()> {
        loop {
            let op: Operation = self
                .get_json("compute", self.zonal(&["operations", operation])?)
                .await?;
            if op.status == "DONE" {
                if let Some(error) = op.error {
                    return Err(Error::provider(
                        PROVIDER,
                        format!("operation {} failed: {error}", op.name),
                    ));
                }
                return Ok(());
            }
            if started.elapsed() >= self.poll_timeout {
                return Err(Error::timeout(format!("operation {operation}")));
            }
            debug!(operation = %operation, status = %op.status, "Waiting for operation");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_for_ip(&self, name: &str, started: Instant) -> Result<String> {
        loop {
            let instance: Instance = self
                .get_json("compute", self.zonal(&["instances", name])?)
                .await?;
            if let Some(ip) = instance.nat_ip() {
                return Ok(ip.to_string());
            }
            if started.elapsed() >= self.poll_timeout {
                return Err(Error::timeout(format!("waiting for a public IP on {name}")));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn instance_body(&self, name: &str, source_image: &str, startup_script: &str) -> serde_json::Value {
        let mut access_config = json!({ "type": "ONE_TO_ONE_NAT", "name": "External NAT" });
        if let Some(ip) = &self.settings.ip {
            access_config["natIP"] = json!(ip);
        }

        json!({
            "name": name,
            "machineType": format!("zones/{}/machineTypes/{}", self.zone, self.machine_type),
            "disks": [{
                "boot": true,
                "autoDelete": true,
                "initializeParams": { "sourceImage": source_image },
            }],
            "networkInterfaces": [{
                "network": "global/networks/default",
                "accessConfigs": [access_config],
            }],
            "metadata": {
                "items": [{ "key": "startup-script", "value": startup_script }],
            },
            "serviceAccounts": [{ "email": "default", "scopes": SCOPES }],
            "tags": { "items": [self.firewall_tag] },
        })
    }

    /// Names of every object in the save bucket.
    async fn list_saves(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.storage(&["storage", "v1", "b", &self.bucket, "o"])?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: ObjectList = self.get_json("storage", url).await?;
            names.extend(page.items.into_iter().map(|o| o.name));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(names),
            }
        }
    }
}

#[async_trait::async_trait]
impl Cloud for GcloudCloud {
    fn kind(&self) -> CloudKind {
        CloudKind::Gcloud
    }

    fn forwarded_env(&self) -> Vec<(String, String)> {
        vec![
            ("GCLOUD_ZONE".to_string(), self.zone.clone()),
            ("GCLOUD_MACHINE_TYPE".to_string(), self.machine_type.clone()),
            ("GCLOUD_PROJECT_ID".to_string(), self.project.clone()),
            ("GCLOUD_BUCKET".to_string(), self.bucket.clone()),
            ("GCLOUD_FIREWALL_TAG".to_string(), self.firewall_tag.clone()),
        ]
    }

    async fn create_instance(&self, startup_script: &str) -> Result<InstanceInfo> {
        let image: Image = self
            .get_json(
                "compute",
                self.compute(&[
                    "projects",
                    &self.settings.image_project,
                    "global",
                    "images",
                    "family",
                    &self.settings.image_family,
                ])?,
            )
            .await?;

        let name = format!("{}-{}", self.instance_prefix, Uuid::new_v4());
        let body = self.instance_body(&name, &image.self_link, startup_script);

        info!(instance = %name, zone = %self.zone, "Creating instance");
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.zonal(&["instances"])?)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let operation: Operation = check("compute", response).await?.json().await?;

        let started = Instant::now();
        self.wait_for_operation(&operation.name, started).await?;
        let public_ip = self.wait_for_ip(&name, started).await?;

        info!(instance = %name, ip = %public_ip, "Successfully created instance on Google Cloud");
        Ok(InstanceInfo {
            cloud: CloudKind::Gcloud,
            id: name,
            public_ip,
        })
    }

    async fn pull_save(&self, dir: &Path) -> Result<SaveOutcome> {
        let names = self.list_saves().await?;
        let Some(latest) = names.into_iter().max() else {
            info!(bucket = %self.bucket, "No existing save");
            return Ok(SaveOutcome::Empty);
        };

        info!(save = %latest, "Downloading save");
        let mut url = self.storage(&["storage", "v1", "b", &self.bucket, "o", &latest])?;
        url.query_pairs_mut().append_pair("alt", "media");
        let token = self.access_token().await?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        let bytes = check("storage", response).await?.bytes().await?;
        info!(save = %latest, size = bytes.len(), "Downloaded save");

        let target: PathBuf = dir.to_path_buf();
        let entries = blocking(move || archive::unzip_bytes(&bytes, &target)).await?;
        info!(save = %latest, entries, "Extracted save");

        Ok(SaveOutcome::Restored {
            source: format!("gs://{}/{latest}", self.bucket),
        })
    }

    async fn push_save(&self, dir: &Path) -> Result<String> {
        let name = save_object_name();

        info!(save = %name, path = %dir.display(), "Compressing save");
        let source = dir.to_path_buf();
        let bytes = blocking(move || archive::zip_dir_to_vec(&source)).await?;
        info!(save = %name, size = bytes.len(), "Compressed save");

        let mut url = self.storage(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", &name);
        let token = self.access_token().await?;
        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/zip")
            .body(bytes)
            .send()
            .await?;
        check("storage", response).await?;

        let target = format!("gs://{}/{name}", self.bucket);
        info!(target = %target, "Uploaded save");
        Ok(target)
    }

    async fn kill_instance(&self) -> Result<()> {
        let response = self
            .http
            .get(self.metadata(&["instance", "name"])?)
            .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
            .send()
            .await?;
        let name = check("metadata", response).await?.text().await?;
        let name = name.trim();

        info!(instance = %name, zone = %self.zone, "Deleting instance");
        let token = self.access_token().await?;
        let response = self
            .http
            .delete(self.zonal(&["instances", name])?)
            .bearer_auth(token)
            .send()
            .await?;
        if let Err(err) = check("compute", response).await {
            warn!(instance = %name, error = %err, "Instance deletion was refused");
            return Err(err);
        }
        Ok(())
    }
}
