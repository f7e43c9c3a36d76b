//! AWS provider: EC2 hosts the server, S3 holds the save.
//!
//! Everything goes through the AWS CLI. Credentials from the configuration
//! are handed to each call through the child environment.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info};

use super::exec::{CommandRunner, Invocation};
use super::{Cloud, CloudKind, InstanceInfo, SaveOutcome};
use crate::config::{require, AwsConfig, Config};
use crate::error::{Error, Result};

const PROVIDER: &str = "aws";

/// AWS-backed [`Cloud`].
#[derive(Debug)]
pub struct AwsCloud {
    settings: AwsConfig,
    bucket: String,
    save_key: String,
    poll_interval: Duration,
    poll_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RunInstancesOutput {
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesOutput {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    public_ip_address: Option<String>,
}

impl AwsCloud {
    /// Create the provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `AWS_S3_BUCKET` or `AWS_S3_SAVE_KEY` is unset.
    pub fn new(config: &Config, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        let bucket = require(config.aws.s3_bucket.as_ref(), "AWS_S3_BUCKET")?.to_string();
        let save_key = require(config.aws.s3_save_key.as_ref(), "AWS_S3_SAVE_KEY")?
            .trim_matches('/')
            .to_string();

        Ok(Self {
            settings: config.aws.clone(),
            bucket,
            save_key,
            poll_interval: config.poll_interval(),
            poll_timeout: config.poll_timeout(),
            runner,
        })
    }

    /// The S3 URI of the save.
    #[must_use]
    pub fn s3_path(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.save_key)
    }

    /// An `aws` invocation carrying the configured region and credentials.
    fn aws<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inv = Invocation::new(&self.settings.cli)
            .args(args)
            .env("AWS_REGION", &self.settings.region)
            .env("AWS_DEFAULT_REGION", &self.settings.region);
        if let (Some(id), Some(secret)) = (
            &self.settings.access_key_id,
            &self.settings.secret_access_key,
        ) {
            inv = inv
                .env("AWS_ACCESS_KEY_ID", id)
                .env("AWS_SECRET_ACCESS_KEY", secret);
        }
        inv
    }

    async fn sync(&self, from: &str, to: &str) -> Result<()> {
        self.runner
            .output(&self.aws(["s3", "sync", from, to, "--delete"]))
            .await?;
        Ok(())
    }

    async fn public_ip(&self, instance_id: &str) -> Result<Option<String>> {
        let stdout = self
            .runner
            .output(&self.aws([
                "ec2",
                "describe-instances",
                "--instance-ids",
                instance_id,
                "--output",
                "json",
            ]))
            .await?;
        let described: DescribeInstancesOutput = serde_json::from_str(&stdout)?;

        let instance = described
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .find(|i| i.instance_id == instance_id)
            .ok_or_else(|| Error::provider(PROVIDER, format!("Lost instance {instance_id}")))?;

        Ok(instance.public_ip_address)
    }
}

#[async_trait::async_trait]
impl Cloud for AwsCloud {
    fn kind(&self) -> CloudKind {
        CloudKind::Aws
    }

    fn forwarded_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let (Some(id), Some(secret)) = (
            &self.settings.access_key_id,
            &self.settings.secret_access_key,
        ) {
            env.push(("AWS_ACCESS_KEY_ID".to_string(), id.clone()));
            env.push(("AWS_SECRET_ACCESS_KEY".to_string(), secret.clone()));
        }
        env.push(("AWS_REGION".to_string(), self.settings.region.clone()));
        env.push(("AWS_S3_BUCKET".to_string(), self.bucket.clone()));
        env.push(("AWS_S3_SAVE_KEY".to_string(), self.save_key.clone()));
        env
    }

    async fn create_instance(&self, startup_script: &str) -> Result<InstanceInfo> {
        // The CLI reads user data from a file URI; the file must outlive the call
        let mut script_file = tempfile::Builder::new()
            .prefix("tmc-startup-")
            .suffix(".sh")
            .tempfile()?;
        script_file.write_all(startup_script.as_bytes())?;
        script_file.flush()?;
        let user_data = format!("file://{}", script_file.path().display());

        let stdout = self
            .runner
            .output(&self.aws([
                "ec2",
                "run-instances",
                "--image-id",
                self.settings.image_id.as_str(),
                "--instance-type",
                self.settings.instance_type.as_str(),
                "--user-data",
                user_data.as_str(),
                "--instance-initiated-shutdown-behavior",
                "terminate",
                "--key-name",
                self.settings.key_name.as_str(),
                "--security-groups",
                self.settings.security_group.as_str(),
                "--output",
                "json",
            ]))
            .await?;
        drop(script_file);

        let launched: RunInstancesOutput = serde_json::from_str(&stdout)?;
        let instance_id = launched
            .instances
            .into_iter()
            .next()
            .map(|i| i.instance_id)
            .ok_or_else(|| Error::provider(PROVIDER, "run-instances returned no instance"))?;

        info!(instance_id = %instance_id, "Instance created, waiting for public IP");

        let started = Instant::now();
        loop {
            if let Some(public_ip) = self.public_ip(&instance_id).await? {
                info!(instance_id = %instance_id, ip = %public_ip, "Minecraft server launched on AWS");
                return Ok(InstanceInfo {
                    cloud: CloudKind::Aws,
                    id: instance_id,
                    public_ip,
                });
            }
            if started.elapsed() >= self.poll_timeout {
                return Err(Error::timeout(format!(
                    "waiting for a public IP on {instance_id}"
                )));
            }
            debug!(instance_id = %instance_id, "No public IP yet");
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn pull_save(&self, dir: &Path) -> Result<SaveOutcome> {
        let source = self.s3_path();
        info!(source = %source, path = %dir.display(), "Downloading save");
        self.sync(&source, &dir.to_string_lossy()).await?;
        info!("Download complete");
        Ok(SaveOutcome::Restored { source })
    }

    async fn push_save(&self, dir: &Path) -> Result<String> {
        let target = self.s3_path();
        info!(target = %target, path = %dir.display(), "Uploading save");
        self.sync(&dir.to_string_lossy(), &target).await?;
        info!("Upload complete");
        Ok(target)
    }

    async fn kill_instance(&self) -> Result<()> {
        // Instances launch with shutdown behavior "terminate", so a shutdown
        // deletes them
        info!("Shutting down EC2 instance");
        self.runner
            .output(&Invocation::new("sudo").args(["shutdown", "now"]))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::exec::testing::ScriptedRunner;

    fn config() -> Config {
        let mut config = Config::default();
        config.aws.s3_bucket = Some("mc-saves".to_string());
        config.aws.s3_save_key = Some("/world/".to_string());
        config.launch.poll_interval_ms = 0;
        config
    }

    fn cloud(config: &Config, runner: &Arc<ScriptedRunner>) -> AwsCloud {
        AwsCloud::new(config, runner.clone()).unwrap()
    }

    const RUN_OUTPUT: &str = r#"{"Instances": [{"InstanceId": "i-0abc"}]}"#;

    fn describe(ip: Option<&str>) -> String {
        let ip = ip.map_or(String::new(), |ip| format!(r#", "PublicIpAddress": "{ip}""#));
        format!(
            r#"{{"Reservations": [{{"Instances": [{{"InstanceId": "i-0abc"{ip}}}]}}]}}"#
        )
    }

    #[test]
    fn test_requires_bucket_and_key() {
        let runner = Arc::new(ScriptedRunner::new());
        let mut config = Config::default();
        config.aws.s3_bucket = Some("mc-saves".to_string());

        let err = AwsCloud::new(&config, runner).unwrap_err();
        assert!(err.to_string().contains("AWS_S3_SAVE_KEY"));
    }

    #[test]
    fn test_s3_path() {
        let runner = Arc::new(ScriptedRunner::new());
        assert_eq!(cloud(&config(), &runner).s3_path(), "s3://mc-saves/world");
    }

    #[tokio::test]
    async fn test_pull_save_syncs_from_bucket() {
        let runner = Arc::new(ScriptedRunner::new().reply(""));
        let outcome = cloud(&config(), &runner)
            .pull_save(Path::new("/srv/mc"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            SaveOutcome::Restored {
                source: "s3://mc-saves/world".to_string()
            }
        );
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].to_string(),
            "aws s3 sync s3://mc-saves/world /srv/mc --delete"
        );
    }

    #[tokio::test]
    async fn test_push_save_syncs_to_bucket() {
        let runner = Arc::new(ScriptedRunner::new().reply(""));
        let target = cloud(&config(), &runner)
            .push_save(Path::new("/srv/mc"))
            .await
            .unwrap();

        assert_eq!(target, "s3://mc-saves/world");
        assert_eq!(
            runner.calls()[0].to_string(),
            "aws s3 sync /srv/mc s3://mc-saves/world --delete"
        );
    }

    #[tokio::test]
    async fn test_credentials_travel_in_child_env() {
        let runner = Arc::new(ScriptedRunner::new().reply(""));
        let mut config = config();
        config.aws.access_key_id = Some("AKIA123".to_string());
        config.aws.secret_access_key = Some("secret".to_string());

        cloud(&config, &runner)
            .push_save(Path::new("/srv/mc"))
            .await
            .unwrap();

        let call = &runner.calls()[0];
        assert!(call
            .envs
            .contains(&("AWS_ACCESS_KEY_ID".to_string(), "AKIA123".to_string())));
        assert!(call
            .envs
            .contains(&("AWS_REGION".to_string(), "us-west-1".to_string())));
        assert!(!call.args.iter().any(|a| a.contains("secret")));
    }

    #[tokio::test]
    async fn test_create_instance_polls_until_public_ip() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply(RUN_OUTPUT)
                .reply(&describe(None))
                .reply(&describe(None))
                .reply(&describe(Some("198.51.100.4"))),
        );

        let info = cloud(&config(), &runner)
            .create_instance("#!/bin/bash\necho hi\n")
            .await
            .unwrap();

        assert_eq!(info.id, "i-0abc");
        assert_eq!(info.public_ip, "198.51.100.4");
        assert_eq!(info.cloud, CloudKind::Aws);

        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        let run = &calls[0];
        assert!(run.args.starts_with(&["ec2".to_string(), "run-instances".to_string()]));
        let user_data = run
            .args
            .iter()
            .skip_while(|a| *a != "--user-data")
            .nth(1)
            .unwrap();
        assert!(user_data.starts_with("file://"));
        assert!(run.args.contains(&"terminate".to_string()));
        assert!(run.args.contains(&"ami-056ee704806822732".to_string()));
        assert!(calls[1].args.contains(&"i-0abc".to_string()));
    }

    #[tokio::test]
    async fn test_create_instance_detects_lost_instance() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply(RUN_OUTPUT)
                .reply(r#"{"Reservations": []}"#),
        );

        let err = cloud(&config(), &runner)
            .create_instance("#!/bin/bash\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Lost instance i-0abc"));
    }

    #[tokio::test]
    async fn test_create_instance_times_out() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .reply(RUN_OUTPUT)
                .reply(&describe(None)),
        );
        let mut aws = cloud(&config(), &runner);
        aws.poll_timeout = Duration::ZERO;

        let err = aws.create_instance("#!/bin/bash\n").await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_create_instance_propagates_cli_failure() {
        let runner = Arc::new(ScriptedRunner::new().fail(Error::CommandFailed {
            program: "aws".to_string(),
            status: "exit status: 255".to_string(),
            stderr: "InvalidKeyPair.NotFound".to_string(),
        }));

        let err = cloud(&config(), &runner)
            .create_instance("#!/bin/bash\n")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("InvalidKeyPair.NotFound"));
    }

    #[tokio::test]
    async fn test_kill_instance_shuts_down() {
        let runner = Arc::new(ScriptedRunner::new().reply(""));
        cloud(&config(), &runner).kill_instance().await.unwrap();
        assert_eq!(runner.calls()[0].to_string(), "sudo shutdown now");
    }

    #[test]
    fn test_forwarded_env() {
        let runner = Arc::new(ScriptedRunner::new());
        let env = cloud(&config(), &runner).forwarded_env();

        assert!(env.contains(&("AWS_S3_BUCKET".to_string(), "mc-saves".to_string())));
        assert!(env.contains(&("AWS_S3_SAVE_KEY".to_string(), "world".to_string())));
        assert!(!env.iter().any(|(k, _)| k == "AWS_ACCESS_KEY_ID"));
    }
}
