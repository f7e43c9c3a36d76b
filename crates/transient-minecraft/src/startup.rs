//! Startup scripts for launched instances.
//!
//! A launched instance knows nothing about the workstation that created it.
//! The settings it needs travel inside its startup script as a base64 blob
//! that is decoded into `.env` right after the script enters the checkout.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::cloud::CloudKind;
use crate::error::{Error, Result};

/// Line after which the `.env` writer is inserted.
pub const ANCHOR: &str = "cd transient-minecraft";

const AWS_TEMPLATE: &str = include_str!("../scripts/aws-startup.sh");
const GCLOUD_TEMPLATE: &str = include_str!("../scripts/gcloud-startup.sh");

/// Built-in template for `cloud`.
#[must_use]
pub fn builtin_template(cloud: CloudKind) -> &'static str {
    match cloud {
        CloudKind::Aws => AWS_TEMPLATE,
        CloudKind::Gcloud => GCLOUD_TEMPLATE,
    }
}

/// Read the template at `path`, or fall back to the built-in one.
///
/// # Errors
///
/// Returns an error if `path` is given and cannot be read.
pub fn load_template(cloud: CloudKind, path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(builtin_template(cloud).to_string()),
    }
}

/// Format variables as `.env` lines.
#[must_use]
pub fn env_file(env: &[(String, String)]) -> String {
    env.iter()
        .map(|(key, value)| {
            let escaped = value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('$', "\\$");
            format!("{key}=\"{escaped}\"\n")
        })
        .collect()
}

/// Insert a `.env` writer carrying `env` into `template`.
///
/// # Errors
///
/// Returns an error if the template has no `cd transient-minecraft` line.
pub fn render(template: &str, env: &[(String, String)]) -> Result<String> {
    let encoded = STANDARD.encode(env_file(env));
    let env_line = format!("echo '{encoded}' | base64 -d > .env");

    let mut lines: Vec<&str> = template.trim().lines().collect();
    let anchor = lines
        .iter()
        .position(|line| line.trim() == ANCHOR)
        .ok_or_else(|| Error::startup_script(format!("no '{ANCHOR}' line to follow")))?;
    lines.insert(anchor + 1, &env_line);

    Ok(lines.iter().map(|line| format!("{line}\n")).collect())
}
