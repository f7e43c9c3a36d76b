//! Launching a server instance from the workstation.

use tracing::info;

use crate::cloud::{Cloud, InstanceInfo};
use crate::config::{Config, RAM_MB_VAR, VERSION_VAR};
use crate::error::Result;
use crate::startup;

/// Variables written into the instance's `.env` file.
#[must_use]
pub fn instance_env(cloud: &dyn Cloud, config: &Config) -> Vec<(String, String)> {
    let mut env = cloud.forwarded_env();
    env.push((RAM_MB_VAR.to_string(), config.server.ram_mb.to_string()));
    env.push((VERSION_VAR.to_string(), config.server.version.clone()));
    env
}

/// Create an instance that boots straight into `tmc serve`.
///
/// # Errors
///
/// Returns an error if the startup script cannot be prepared or the instance
/// cannot be created.
pub async fn launch(cloud: &dyn Cloud, config: &Config) -> Result<InstanceInfo> {
    let kind = cloud.kind();
    let template = startup::load_template(kind, config.launch.startup_script.as_deref())?;
    let script = startup::render(&template, &instance_env(cloud, config))?;

    info!(cloud = %kind, "Creating instance");
    let instance = cloud.create_instance(&script).await?;
    info!(
        instance_id = %instance.id,
        public_ip = %instance.public_ip,
        "Instance is up"
    );
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use super::*;
    use crate::cloud::{CloudKind, SaveOutcome};
    use crate::error::Error;

    #[derive(Debug, Default)]
    struct FakeCloud {
        script: Mutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl Cloud for FakeCloud {
        fn kind(&self) -> CloudKind {
            CloudKind::Gcloud
        }

        fn forwarded_env(&self) -> Vec<(String, String)> {
            vec![("GCLOUD_BUCKET".to_string(), "saves".to_string())]
        }

        async fn create_instance(&self, startup_script: &str) -> Result<InstanceInfo> {
            *self.script.lock().unwrap() = Some(startup_script.to_string());
            Ok(InstanceInfo {
                cloud: CloudKind::Gcloud,
                id: "mc-server-1".to_string(),
                public_ip: "203.0.113.9".to_string(),
            })
        }

        async fn pull_save(&self, _dir: &Path) -> Result<SaveOutcome> {
            unreachable!()
        }

        async fn push_save(&self, _dir: &Path) -> Result<String> {
            unreachable!()
        }

        async fn kill_instance(&self) -> Result<()> {
            unreachable!()
        }
    }

    #[test]
    fn test_instance_env_adds_server_settings() {
        let mut config = Config::default();
        config.server.ram_mb = 3072;
        config.server.version = "1.16.5".to_string();

        let env = instance_env(&FakeCloud::default(), &config);

        assert_eq!(
            env,
            [
                ("GCLOUD_BUCKET".to_string(), "saves".to_string()),
                ("MINECRAFT_RAM_MB".to_string(), "3072".to_string()),
                ("MINECRAFT_VERSION".to_string(), "1.16.5".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_launch_uses_builtin_template() {
        let cloud = FakeCloud::default();

        let instance = launch(&cloud, &Config::default()).await.unwrap();

        assert_eq!(instance.public_ip, "203.0.113.9");
        let script = cloud.script.lock().unwrap().clone().unwrap();
        assert!(script.contains("tmc serve --cloud gcloud"));
        assert!(script.contains("| base64 -d > .env"));
    }

    #[tokio::test]
    async fn test_launch_uses_configured_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("startup.sh");
        std::fs::write(&path, "#!/bin/sh\ncd transient-minecraft\n./custom\n").unwrap();
        let mut config = Config::default();
        config.launch.startup_script = Some(path);
        let cloud = FakeCloud::default();

        launch(&cloud, &config).await.unwrap();

        let script = cloud.script.lock().unwrap().clone().unwrap();
        assert!(script.starts_with("#!/bin/sh\ncd transient-minecraft\necho '"));
        assert!(script.ends_with("./custom\n"));
    }

    #[tokio::test]
    async fn test_launch_rejects_template_without_anchor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("startup.sh");
        std::fs::write(&path, "#!/bin/sh\n./custom\n").unwrap();
        let mut config = Config::default();
        config.launch.startup_script = Some(path);
        let cloud = FakeCloud::default();

        let err = launch(&cloud, &config).await.unwrap_err();

        assert!(matches!(err, Error::StartupScript { .. }));
        assert!(cloud.script.lock().unwrap().is_none());
    }
}
