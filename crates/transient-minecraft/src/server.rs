//! The transient server lifecycle.
//!
//! [`Server::run`] pulls the save, runs the game server in the foreground
//! and, once it exits, pushes the save and tears the instance down.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{error, info, warn};

use crate::cloud::{Cloud, SaveOutcome};
use crate::config::{Config, ServerConfig};
use crate::error::{Error, Result};
use crate::jars::JarCatalog;

/// Contents written when no EULA file is available to copy.
const ACCEPTED_EULA: &str = "eula=true\n";

/// Options for [`Server::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip instance teardown after the server stops.
    pub keep_instance: bool,
}

/// A game server bound to a cloud for its save and its instance.
#[derive(Debug)]
pub struct Server {
    settings: ServerConfig,
    path: PathBuf,
    grace: Duration,
    cloud: Box<dyn Cloud>,
}

/// Arguments passed to the Java launcher.
#[must_use]
pub fn java_args(ram_mb: u32, jar: &Path) -> Vec<String> {
    vec![
        format!("-Xmx{ram_mb}M"),
        format!("-Xms{ram_mb}M"),
        "-jar".to_string(),
        jar.to_string_lossy().into_owned(),
        "nogui".to_string(),
    ]
}

/// Resolves once an interrupt (or, on unix, a terminate) signal arrives.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = terminate.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Ask the server to stop the way a console `stop` or service manager would.
#[cfg(unix)]
fn request_stop(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No id means the child was already reaped
    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        warn!(pid, error = %err, "Failed to send SIGTERM to server");
    }
}

#[cfg(not(unix))]
fn request_stop(_child: &Child) {}

/// Wait for `child` to exit.
///
/// If `shutdown` resolves first, the child is asked to stop and gets `grace`
/// to exit on its own before it is killed. A `shutdown` that fails is
/// ignored.
async fn supervise<F>(child: &mut Child, shutdown: F, grace: Duration) -> Result<ExitStatus>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::select! {
        status = child.wait() => Ok(status?),
        Ok(()) = shutdown => {
            warn!(grace_secs = grace.as_secs(), "Shutdown requested, waiting for the server to stop");
            request_stop(child);
            if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
                return Ok(status?);
            }
            warn!("Server did not stop in time, killing it");
            child.kill().await?;
            Ok(child.wait().await?)
        }
    }
}

impl Server {
    /// Create a server using `config` and storing its save in `cloud`.
    #[must_use]
    pub fn new(config: &Config, cloud: Box<dyn Cloud>) -> Self {
        Self {
            settings: config.server.clone(),
            path: config.server_path(),
            grace: config.shutdown_grace(),
            cloud,
        }
    }

    /// Directory the server runs in.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Restore, host, persist, tear down.
    ///
    /// Teardown always runs. The save is only pushed when the restore
    /// succeeded, so a failed download never replaces the remote save with an
    /// empty directory. The first error is returned.
    ///
    /// # Errors
    ///
    /// Returns the first error from restoring, hosting, persisting or
    /// tearing down.
    pub async fn run(&self, options: RunOptions) -> Result<()> {
        let outcome = match self.pull_only().await {
            Ok(restored) => {
                if restored == SaveOutcome::Empty {
                    info!("Starting a new world");
                }
                let hosted = self.host().await;
                info!("Minecraft server stopped");

                let pushed = self.cloud.push_save(&self.path).await;
                if let Err(err) = &pushed {
                    error!(error = %err, "Failed to upload save");
                }
                hosted.and(pushed.map(|_| ()))
            }
            Err(err) => {
                error!(error = %err, "Failed to restore save, leaving the remote save untouched");
                Err(err)
            }
        };

        let killed = if options.keep_instance {
            info!("Keeping instance");
            Ok(())
        } else {
            let killed = self.cloud.kill_instance().await;
            if let Err(err) = &killed {
                error!(error = %err, "Failed to tear down instance");
            }
            killed
        };

        outcome.and(killed)
    }

    /// Create the server directory and restore the save into it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the download fails.
    pub async fn pull_only(&self) -> Result<SaveOutcome> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|source| Error::DirectoryCreate {
                path: self.path.clone(),
                source,
            })?;
        self.cloud.pull_save(&self.path).await
    }

    /// Upload the server directory as the latest save.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory does not exist or the upload fails.
    pub async fn push_only(&self) -> Result<String> {
        if !tokio::fs::metadata(&self.path).await?.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", self.path.display()),
            )));
        }
        self.cloud.push_save(&self.path).await
    }

    async fn host(&self) -> Result<()> {
        self.ensure_eula().await?;
        let jar = JarCatalog::scan(&self.settings.jars_dir)?.select(&self.settings.version)?;

        info!(jar = %jar.display(), ram_mb = self.settings.ram_mb, "Starting Minecraft server");
        let mut child = Command::new(&self.settings.java)
            .args(java_args(self.settings.ram_mb, &jar))
            .current_dir(&self.path)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| Error::CommandSpawn {
                program: self.settings.java.clone(),
                source,
            })?;

        let status = supervise(&mut child, shutdown_signal(), self.grace).await?;
        if status.success() {
            info!(%status, "Server exited");
        } else {
            warn!(%status, "Server exited unsuccessfully");
        }
        Ok(())
    }

    async fn ensure_eula(&self) -> Result<()> {
        let target = self.path.join("eula.txt");
        if tokio::fs::try_exists(&target).await? {
            return Ok(());
        }

        if tokio::fs::try_exists(&self.settings.eula_file).await? {
            tokio::fs::copy(&self.settings.eula_file, &target).await?;
        } else {
            tokio::fs::write(&target, ACCEPTED_EULA).await?;
        }
        Ok(())
    }
}
