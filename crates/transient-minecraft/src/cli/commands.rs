//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::cloud::CloudKind;
use crate::logging::Verbosity;

/// Which cloud a command talks to.
#[derive(Debug, Clone, Args)]
pub struct CloudArgs {
    /// The cloud the server runs in
    #[arg(long, value_enum)]
    pub cloud: CloudKind,
}

/// Launch command arguments.
#[derive(Debug, Args)]
pub struct LaunchCommand {
    /// Target cloud.
    #[command(flatten)]
    pub target: CloudArgs,

    /// Output the new instance as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Serve command arguments.
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Target cloud.
    #[command(flatten)]
    pub target: CloudArgs,

    /// Leave the instance running after the server stops
    #[arg(long)]
    pub keep_instance: bool,
}

/// Save synchronisation commands.
#[derive(Debug, Subcommand)]
pub enum SaveCommand {
    /// Download the latest save into the server directory
    Pull(CloudArgs),

    /// Upload the server directory as the latest save
    Push(CloudArgs),
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the default configuration file path
    Path,

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the standard location)
        file: Option<PathBuf>,
    },
}

/// Explicit log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Everything.
    Trace,
    /// Debug and above.
    Debug,
    /// Info and above.
    Info,
    /// Warnings and errors.
    Warn,
    /// Errors only.
    Error,
}

impl From<LogLevel> for Verbosity {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Self::Trace,
            LogLevel::Debug => Self::Verbose,
            LogLevel::Info => Self::Normal,
            LogLevel::Warn => Self::Warn,
            LogLevel::Error => Self::Quiet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_to_verbosity() {
        assert_eq!(Verbosity::from(LogLevel::Trace), Verbosity::Trace);
        assert_eq!(Verbosity::from(LogLevel::Debug), Verbosity::Verbose);
        assert_eq!(Verbosity::from(LogLevel::Info), Verbosity::Normal);
        assert_eq!(Verbosity::from(LogLevel::Warn), Verbosity::Warn);
        assert_eq!(Verbosity::from(LogLevel::Error), Verbosity::Quiet);
    }
}
