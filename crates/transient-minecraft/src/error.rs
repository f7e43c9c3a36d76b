//! Error types for transient-minecraft.
//!
//! This module defines all error types used throughout the crate, providing
//! enough context (program names, paths, setting names) to act on a failure
//! from a terminal on the other side of the world.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for transient-minecraft operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// A setting required by the selected cloud is not set.
    #[error("missing required setting {key}")]
    MissingSetting {
        /// Environment variable that carries the setting.
        key: &'static str,
    },

    // === External Command Errors ===
    /// An external program could not be started.
    #[error("failed to run '{program}': {source}")]
    CommandSpawn {
        /// The program that was invoked.
        program: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// An external program exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    CommandFailed {
        /// The program that was invoked.
        program: String,
        /// Exit status description.
        status: String,
        /// Trimmed standard error output.
        stderr: String,
    },

    // === Cloud Errors ===
    /// An HTTP request could not be completed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A cloud API answered with a non-success status.
    #[error("{service} API returned {status}: {message}")]
    Api {
        /// Which API answered.
        service: &'static str,
        /// HTTP status code.
        status: u16,
        /// Response body or error summary.
        message: String,
    },

    /// The provider reported something we cannot continue from.
    #[error("{provider} error: {message}")]
    Provider {
        /// Provider short name.
        provider: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// Startup script could not be rendered.
    #[error("invalid startup script: {message}")]
    StartupScript {
        /// Description of what went wrong.
        message: String,
    },

    // === Server Errors ===
    /// No server jars were found.
    #[error("No Minecraft versions available in {dir}")]
    NoServerVersions {
        /// Directory that was scanned.
        dir: PathBuf,
    },

    /// The requested server version has no jar.
    #[error("Minecraft version {version} not available")]
    VersionUnavailable {
        /// The requested version.
        version: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing a save archive failed.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An operation timed out.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
    },
}

/// A specialized Result type for transient-minecraft operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new provider error.
    #[must_use]
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Create a new startup script error.
    #[must_use]
    pub fn startup_script(message: impl Into<String>) -> Self {
        Self::StartupScript {
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    #[must_use]
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Check if this error is caused by missing configuration.
    #[must_use]
    pub fn is_missing_setting(&self) -> bool {
        matches!(self, Self::MissingSetting { .. })
    }
}
