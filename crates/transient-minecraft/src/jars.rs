//! Server jar selection.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Version preference meaning "the highest available".
pub const LATEST: &str = "latest";

fn jar_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^minecraft_server\.(\d+(?:\.\d+)*)\.jar$").expect("static regex is valid")
    })
}

/// Compare dotted version strings numerically, component by component.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Vec<u64> { v.split('.').map(|p| p.parse().unwrap_or(0)).collect() };
    let (a, b) = (parse(a), parse(b));
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            a.get(i)
                .copied()
                .unwrap_or(0)
                .cmp(&b.get(i).copied().unwrap_or(0))
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

/// The server versions available in a jar directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JarCatalog {
    dir: PathBuf,
    versions: Vec<String>,
}

impl JarCatalog {
    /// Scan `dir` for `minecraft_server.<version>.jar` files.
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be read.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let name = entry?.file_name();
            if let Some(caps) = jar_pattern().captures(&name.to_string_lossy()) {
                versions.push(caps[1].to_string());
            }
        }
        versions.sort_by(|a, b| compare_versions(a, b));

        Ok(Self {
            dir: dir.to_path_buf(),
            versions,
        })
    }

    /// Available versions, oldest first.
    #[must_use]
    pub fn versions(&self) -> &[String] {
        &self.versions
    }

    /// Absolute path of the jar for `preferred` (a version or `latest`).
    ///
    /// # Errors
    ///
    /// Returns an error if there are no jars, the preferred version has no
    /// jar, or the directory cannot be made absolute.
    pub fn select(&self, preferred: &str) -> Result<PathBuf> {
        let Some(latest) = self.versions.last() else {
            return Err(Error::NoServerVersions {
                dir: self.dir.clone(),
            });
        };

        let version = if preferred == LATEST {
            latest
        } else {
            self.versions
                .iter()
                .find(|v| v.as_str() == preferred)
                .ok_or_else(|| Error::VersionUnavailable {
                    version: preferred.to_string(),
                })?
        };

        let jar = self.dir.join(format!("minecraft_server.{version}.jar"));
        Ok(std::path::absolute(jar)?)
    }
}
