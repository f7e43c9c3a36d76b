//! Command-line interface for transient-minecraft.
//!
//! This module provides the CLI structure for the `tmc` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CloudArgs, ConfigCommand, LaunchCommand, LogLevel, SaveCommand, ServeCommand,
};

use crate::logging::Verbosity;

/// tmc - Minecraft servers that only exist while you play
///
/// Launches a cloud instance that restores the world from cloud storage,
/// runs the server, and on shutdown uploads the world and deletes itself.
#[derive(Debug, Parser)]
#[command(name = "tmc")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Set the log level explicitly (overrides -v and -q)
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a cloud instance that runs the server
    Launch(LaunchCommand),

    /// Restore the save, run the server, then persist the save and tear down
    Serve(ServeCommand),

    /// Move the save between the server directory and cloud storage
    #[command(subcommand)]
    Save(SaveCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        if let Some(level) = self.log_level {
            return level.into();
        }
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::Trace,
            }
        }
    }
}
