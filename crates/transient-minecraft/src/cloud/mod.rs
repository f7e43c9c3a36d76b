//! Cloud providers.
//!
//! A [`Cloud`] hosts the server instance and stores its save. The two
//! providers differ in how saves are kept: AWS mirrors the directory into an
//! S3 prefix, Google Cloud keeps one timestamped zip per session.

pub mod aws;
pub mod exec;
pub mod gcloud;

use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;

pub use aws::AwsCloud;
pub use exec::{CommandRunner, Invocation, SystemRunner};
pub use gcloud::GcloudCloud;

/// Supported clouds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CloudKind {
    /// Amazon Web Services (EC2 + S3).
    Aws,
    /// Google Cloud (Compute Engine + Cloud Storage).
    Gcloud,
}

impl std::fmt::Display for CloudKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Gcloud => write!(f, "gcloud"),
        }
    }
}

/// A freshly created server instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Cloud hosting the instance.
    pub cloud: CloudKind,
    /// Provider identifier (EC2 instance ID or Compute Engine name).
    pub id: String,
    /// Public address players connect to.
    pub public_ip: String,
}

/// Result of restoring a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A save was found and written into the server directory.
    Restored {
        /// Where the save came from.
        source: String,
    },
    /// There was nothing to restore; the server starts a new world.
    Empty,
}

/// Compute and storage operations a transient server needs from a cloud.
#[async_trait::async_trait]
pub trait Cloud: Send + Sync + std::fmt::Debug {
    /// Which cloud this is.
    fn kind(&self) -> CloudKind;

    /// Settings copied into the `.env` file of a launched instance.
    fn forwarded_env(&self) -> Vec<(String, String)>;

    /// Create an instance that runs `startup_script` on boot and wait until
    /// it is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the instance cannot be created or never becomes ready.
    async fn create_instance(&self, startup_script: &str) -> Result<InstanceInfo>;

    /// Download the latest save into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the save exists but cannot be fetched or unpacked.
    async fn pull_save(&self, dir: &Path) -> Result<SaveOutcome>;

    /// Upload `dir` as the latest save and return where it was stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails.
    async fn push_save(&self, dir: &Path) -> Result<String>;

    /// Destroy the instance this process runs on.
    ///
    /// # Errors
    ///
    /// Returns an error if the teardown request fails.
    async fn kill_instance(&self) -> Result<()>;
}

/// Build the provider for `kind`, checking its required settings.
///
/// # Errors
///
/// Returns [`crate::Error::MissingSetting`] if a required setting is unset.
pub fn connect(kind: CloudKind, config: &Config) -> Result<Box<dyn Cloud>> {
    connect_with(kind, config, Arc::new(SystemRunner))
}

/// Like [`connect`], with a custom command runner.
///
/// # Errors
///
/// Returns [`crate::Error::MissingSetting`] if a required setting is unset.
pub fn connect_with(
    kind: CloudKind,
    config: &Config,
    runner: Arc<dyn CommandRunner>,
) -> Result<Box<dyn Cloud>> {
    Ok(match kind {
        CloudKind::Aws => Box::new(AwsCloud::new(config, runner)?),
        CloudKind::Gcloud => Box::new(GcloudCloud::new(config, runner)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_kind_display() {
        assert_eq!(CloudKind::Aws.to_string(), "aws");
        assert_eq!(CloudKind::Gcloud.to_string(), "gcloud");
    }

    #[test]
    fn test_cloud_kind_from_cli_value() {
        assert_eq!(CloudKind::from_str("aws", false).unwrap(), CloudKind::Aws);
        assert_eq!(
            CloudKind::from_str("gcloud", false).unwrap(),
            CloudKind::Gcloud
        );
        assert!(CloudKind::from_str("azure", false).is_err());
    }

    #[test]
    fn test_instance_info_serialize() {
        let info = InstanceInfo {
            cloud: CloudKind::Gcloud,
            id: "mc-server-1".to_string(),
            public_ip: "203.0.113.9".to_string(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["cloud"], "gcloud");
        assert_eq!(json["public_ip"], "203.0.113.9");
    }

    #[test]
    fn test_connect_reports_missing_settings() {
        let config = Config::default();

        let err = connect(CloudKind::Aws, &config).unwrap_err();
        assert!(err.to_string().contains("AWS_S3_BUCKET"));

        let err = connect(CloudKind::Gcloud, &config).unwrap_err();
        assert!(err.is_missing_setting());
    }

    #[test]
    fn test_connect_aws() {
        let mut config = Config::default();
        config.aws.s3_bucket = Some("saves".to_string());
        config.aws.s3_save_key = Some("world".to_string());

        let cloud = connect(CloudKind::Aws, &config).unwrap();
        assert_eq!(cloud.kind(), CloudKind::Aws);
    }
}
