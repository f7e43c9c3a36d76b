//! Configuration management for transient-minecraft.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, the vendor environment variables the cloud
//! startup scripts forward (`MINECRAFT_*`, `AWS_*`, `GCLOUD_*`), `TMC_`
//! overrides, and defaults.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "transient-minecraft";

/// Environment variable carrying the server RAM in megabytes.
pub const RAM_MB_VAR: &str = "MINECRAFT_RAM_MB";

/// Environment variable carrying the preferred server version.
pub const VERSION_VAR: &str = "MINECRAFT_VERSION";

/// Vendor environment variables holding string settings, with the config key
/// each one lands on.
const STRING_VARS: &[(&str, &str)] = &[
    ("MINECRAFT_PATH", "server.path"),
    (VERSION_VAR, "server.version"),
    ("AWS_ACCESS_KEY_ID", "aws.access_key_id"),
    ("AWS_SECRET_ACCESS_KEY", "aws.secret_access_key"),
    ("AWS_REGION", "aws.region"),
    ("AWS_S3_BUCKET", "aws.s3_bucket"),
    ("AWS_S3_SAVE_KEY", "aws.s3_save_key"),
    ("GCLOUD_ZONE", "gcloud.zone"),
    ("GCLOUD_MACHINE_TYPE", "gcloud.machine_type"),
    ("GCLOUD_PROJECT_ID", "gcloud.project_id"),
    ("GCLOUD_BUCKET", "gcloud.bucket"),
    ("GCLOUD_FIREWALL_TAG", "gcloud.firewall_tag"),
    ("GCLOUD_IP", "gcloud.ip"),
    ("GCLOUD_ACCESS_TOKEN", "gcloud.access_token"),
];

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables prefixed with `TMC_` (nested with `__`)
/// 2. Vendor environment variables (`MINECRAFT_PATH`, `AWS_S3_BUCKET`, ...)
/// 3. TOML config file at `~/.config/transient-minecraft/config.toml`
/// 4. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Game server configuration.
    pub server: ServerConfig,
    /// AWS configuration.
    pub aws: AwsConfig,
    /// Google Cloud configuration.
    pub gcloud: GcloudConfig,
    /// Instance launch configuration.
    pub launch: LaunchConfig,
}

/// Game server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory the server runs in and the save lives in.
    /// Defaults to `~/.local/share/transient-minecraft`
    pub path: Option<PathBuf>,
    /// Heap size handed to the JVM, in megabytes.
    pub ram_mb: u32,
    /// Server version to run, or `latest`.
    pub version: String,
    /// Directory holding `minecraft_server.<version>.jar` files.
    pub jars_dir: PathBuf,
    /// File copied into the server directory as `eula.txt`.
    pub eula_file: PathBuf,
    /// Java launcher.
    pub java: String,
    /// Seconds the server gets to exit on its own after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

/// AWS configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Access key ID passed to the AWS CLI.
    #[serde(skip_serializing)]
    pub access_key_id: Option<String>,
    /// Secret access key passed to the AWS CLI.
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    /// Region for EC2 and S3 calls.
    pub region: String,
    /// Bucket holding the save.
    pub s3_bucket: Option<String>,
    /// Key prefix of the save inside the bucket.
    pub s3_save_key: Option<String>,
    /// AMI to boot.
    pub image_id: String,
    /// EC2 instance type.
    pub instance_type: String,
    /// Key pair name for SSH access.
    pub key_name: String,
    /// Security group opening the game port.
    pub security_group: String,
    /// AWS CLI program.
    pub cli: String,
}

/// Google Cloud configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcloudConfig {
    /// Zone, e.g. `us-west1-a`.
    pub zone: Option<String>,
    /// Machine type, e.g. `e2-standard-2`.
    pub machine_type: Option<String>,
    /// Project ID.
    pub project_id: Option<String>,
    /// Bucket holding timestamped save archives.
    pub bucket: Option<String>,
    /// Network tag that opens the game port.
    pub firewall_tag: Option<String>,
    /// Reserved static IP to attach, if any.
    pub ip: Option<String>,
    /// Fixed OAuth access token. When unset, the metadata server and then
    /// the gcloud CLI are asked.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Project owning the boot image family.
    pub image_project: String,
    /// Boot image family.
    pub image_family: String,
    /// Compute Engine API base URL.
    pub compute_endpoint: String,
    /// Cloud Storage API base URL.
    pub storage_endpoint: String,
    /// Instance metadata server base URL.
    pub metadata_endpoint: String,
    /// gcloud CLI program.
    pub cli: String,
}

/// Instance launch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Startup script template replacing the built-in one.
    pub startup_script: Option<PathBuf>,
    /// Delay between readiness polls in milliseconds.
    pub poll_interval_ms: u64,
    /// Give up waiting for the instance after this many seconds.
    pub poll_timeout_secs: u64,
    /// Prefix of generated instance names.
    pub instance_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: None, // Resolved to the data dir at runtime
            ram_mb: 1024,
            version: "latest".to_string(),
            jars_dir: PathBuf::from("jars"),
            eula_file: PathBuf::from("eula.txt"),
            java: "java".to_string(),
            shutdown_grace_secs: 60,
        }
    }
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            region: "us-west-1".to_string(),
            s3_bucket: None,
            s3_save_key: None,
            image_id: "ami-056ee704806822732".to_string(), // Amazon Linux 2
            instance_type: "t2.micro".to_string(),
            key_name: "id_aws".to_string(),
            security_group: "minecraft".to_string(),
            cli: "aws".to_string(),
        }
    }
}

impl Default for GcloudConfig {
    fn default() -> Self {
        Self {
            zone: None,
            machine_type: None,
            project_id: None,
            bucket: None,
            firewall_tag: None,
            ip: None,
            access_token: None,
            image_project: "debian-cloud".to_string(),
            image_family: "debian-12".to_string(),
            compute_endpoint: "https://compute.googleapis.com/compute/v1".to_string(),
            storage_endpoint: "https://storage.googleapis.com".to_string(),
            metadata_endpoint: "http://metadata.google.internal/computeMetadata/v1".to_string(),
            cli: "gcloud".to_string(),
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            startup_script: None,
            poll_interval_ms: 1000,
            poll_timeout_secs: 600,
            instance_prefix: "mc-server".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path, reading
    /// vendor variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        Self::load_with(config_path, std::env::vars())
    }

    /// Load configuration with an optional custom config path and an explicit
    /// set of vendor variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails, or if
    /// `MINECRAFT_RAM_MB` is not a number.
    pub fn load_with(
        config_path: Option<PathBuf>,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let mut figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file));

        // Vendor variables are merged as strings so versions like `1.10`
        // never go through number parsing.
        for (var, key) in STRING_VARS {
            if let Some(value) = vars.get(*var) {
                figment = figment.merge(Serialized::default(key, value.clone()));
            }
        }
        if let Some(value) = vars.get(RAM_MB_VAR) {
            let ram_mb: u32 = value.trim().parse().map_err(|_| Error::ConfigValidation {
                message: format!("{RAM_MB_VAR} must be a whole number, got '{value}'"),
            })?;
            figment = figment.merge(Serialized::default("server.ram_mb", ram_mb));
        }

        let figment = figment.merge(Env::prefixed("TMC_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.server.ram_mb == 0 {
            return Err(Error::ConfigValidation {
                message: "ram_mb must be greater than 0".to_string(),
            });
        }

        if self.server.version.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "version must not be empty (use \"latest\")".to_string(),
            });
        }

        if self.launch.poll_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "poll_timeout_secs must be greater than 0".to_string(),
            });
        }

        // Compute Engine instance names are lowercase letters, digits and hyphens
        let prefix = &self.launch.instance_prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(Error::ConfigValidation {
                message: format!("invalid instance_prefix: {prefix:?}"),
            });
        }

        Ok(())
    }

    /// Get the server directory, resolving defaults if not set.
    #[must_use]
    pub fn server_path(&self) -> PathBuf {
        self.server
            .path
            .clone()
            .unwrap_or_else(Self::default_data_dir)
    }

    /// Get the launch poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.launch.poll_interval_ms)
    }

    /// Get the launch poll timeout as a Duration.
    #[must_use]
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.launch.poll_timeout_secs)
    }

    /// Get the server shutdown grace period as a Duration.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_grace_secs)
    }
}

/// Return a required setting or the error naming its variable.
///
/// # Errors
///
/// Returns [`Error::MissingSetting`] when the value is unset or blank.
pub fn require<'a>(value: Option<&'a String>, key: &'static str) -> Result<&'a str> {
    match value.map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(Error::MissingSetting { key }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        Config::load_with(
            Some(PathBuf::from("/nonexistent/config.toml")),
            vars(pairs),
        )
    }

    #[test]
    fn test_default_server_config() {
        let server = ServerConfig::default();

        assert!(server.path.is_none());
        assert_eq!(server.ram_mb, 1024);
        assert_eq!(server.version, "latest");
        assert_eq!(server.jars_dir, PathBuf::from("jars"));
        assert_eq!(server.java, "java");
    }

    #[test]
    fn test_default_aws_config() {
        let aws = AwsConfig::default();

        assert_eq!(aws.region, "us-west-1");
        assert_eq!(aws.instance_type, "t2.micro");
        assert_eq!(aws.key_name, "id_aws");
        assert_eq!(aws.security_group, "minecraft");
        assert!(aws.s3_bucket.is_none());
    }

    #[test]
    fn test_default_gcloud_config() {
        let gcloud = GcloudConfig::default();

        assert_eq!(gcloud.image_project, "debian-cloud");
        assert!(gcloud.compute_endpoint.starts_with("https://"));
        assert!(gcloud.metadata_endpoint.contains("metadata.google.internal"));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_ram() {
        let mut config = Config::default();
        config.server.ram_mb = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ram_mb"));
    }

    #[test]
    fn test_validate_empty_version() {
        let mut config = Config::default();
        config.server.version = "  ".to_string();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("version"));
    }

    #[test]
    fn test_validate_zero_poll_timeout() {
        let mut config = Config::default();
        config.launch.poll_timeout_secs = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("poll_timeout_secs"));
    }

    #[test]
    fn test_validate_instance_prefix() {
        let mut config = Config::default();
        config.launch.instance_prefix = "MC_Server".to_string();
        assert!(config.validate().is_err());

        config.launch.instance_prefix = "mc-2".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = load(&[]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_vendor_variables_are_mapped() {
        let config = load(&[
            ("MINECRAFT_PATH", "/srv/minecraft"),
            ("MINECRAFT_VERSION", "1.10"),
            ("MINECRAFT_RAM_MB", "2048"),
            ("AWS_S3_BUCKET", "saves"),
            ("AWS_S3_SAVE_KEY", "world"),
            ("AWS_REGION", "eu-west-2"),
            ("GCLOUD_ZONE", "us-west1-a"),
            ("GCLOUD_IP", "203.0.113.7"),
        ])
        .unwrap();

        assert_eq!(config.server_path(), PathBuf::from("/srv/minecraft"));
        assert_eq!(config.server.version, "1.10");
        assert_eq!(config.server.ram_mb, 2048);
        assert_eq!(config.aws.s3_bucket.as_deref(), Some("saves"));
        assert_eq!(config.aws.s3_save_key.as_deref(), Some("world"));
        assert_eq!(config.aws.region, "eu-west-2");
        assert_eq!(config.gcloud.zone.as_deref(), Some("us-west1-a"));
        assert_eq!(config.gcloud.ip.as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_unrelated_variables_are_ignored() {
        let config = load(&[("AWS_PROFILE", "default"), ("PATH", "/usr/bin")]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_ram_variable() {
        let err = load(&[("MINECRAFT_RAM_MB", "lots")]).unwrap_err();
        assert!(err.to_string().contains("MINECRAFT_RAM_MB"));
    }

    #[test]
    fn test_toml_file_is_layered_under_variables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nram_mb = 4096\nversion = \"1.16.5\"\n\n[aws]\ns3_bucket = \"from-file\"\n\n[launch]\npoll_timeout_secs = 5\n",
        )
        .unwrap();

        let config =
            Config::load_with(Some(path), vars(&[("AWS_S3_BUCKET", "from-env")])).unwrap();

        assert_eq!(config.server.ram_mb, 4096);
        assert_eq!(config.server.version, "1.16.5");
        assert_eq!(config.aws.s3_bucket.as_deref(), Some("from-env"));
        assert_eq!(config.launch.poll_timeout_secs, 5);
    }

    #[test]
    fn test_invalid_toml_file_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nram_mb = 0\n").unwrap();

        let err = Config::load_with(Some(path), Vec::new()).unwrap_err();
        assert!(err.to_string().contains("ram_mb"));
    }

    #[test]
    fn test_require() {
        let set = Some("bucket".to_string());
        let blank = Some("   ".to_string());

        assert_eq!(require(set.as_ref(), "AWS_S3_BUCKET").unwrap(), "bucket");
        assert!(require(blank.as_ref(), "AWS_S3_BUCKET")
            .unwrap_err()
            .is_missing_setting());
        let err = require(None, "GCLOUD_ZONE").unwrap_err();
        assert!(err.to_string().contains("GCLOUD_ZONE"));
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut config = Config::default();
        config.aws.secret_access_key = Some("hunter2".to_string());
        config.gcloud.access_token = Some("ya29.token".to_string());

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("ya29.token"));
    }

    #[test]
    fn test_durations() {
        let config = Config::default();

        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.poll_timeout(), Duration::from_secs(600));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(60));
    }

    #[test]
    fn test_default_paths() {
        assert!(Config::default_config_path()
            .to_string_lossy()
            .contains("transient-minecraft"));
        assert!(Config::default()
            .server_path()
            .to_string_lossy()
            .contains("transient-minecraft"));
    }
}
