//! `transient-minecraft` - Minecraft servers that only exist while you play
//!
//! This library launches a cloud instance that restores a saved world,
//! runs the game server in the foreground and, once it stops, uploads the
//! world and deletes the instance. AWS and Google Cloud are supported.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod archive;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod jars;
pub mod launch;
pub mod logging;
pub mod server;
pub mod startup;

pub use cloud::{Cloud, CloudKind, InstanceInfo, SaveOutcome};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use server::{RunOptions, Server};
