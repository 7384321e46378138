// SPDX-License-Identifier: Apache-2.0

//! Configuration for a tailing run.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::decode::CodecConfig;
use crate::error::{Error, Result};
use crate::tail::{StartPosition, TailerConfig};

/// Environment variables consulted, in order, for the default sincedb directory
pub const SINCEDB_DIR_VARS: [&str; 2] = ["SINCEDB_DIR", "HOME"];

/// Configuration for the offset ledger and its tailer
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Absolute glob patterns for the files to follow
    pub paths: Vec<String>,
    /// Glob patterns for files to skip
    pub exclude: Vec<String>,
    /// How often known files are checked for new data
    pub stat_interval: Duration,
    /// How often path patterns are expanded
    pub discover_interval: Duration,
    /// Explicit sincedb location, derived from `paths` when unset
    pub sincedb_path: Option<PathBuf>,
    /// How often the tailer rewrites its sincedb
    pub sincedb_write_interval: Duration,
    /// Start position for files with no recorded progress
    pub start_position: StartPosition,
    /// Line delimiter
    pub delimiter: String,
    /// Logical offset file, disabled when unset
    pub offset_path: Option<PathBuf>,
    /// A downstream consumer owns offset persistence, never write the offset file
    pub offsets_deferred: bool,
    /// How often the logical offset file is flushed while running
    pub offset_flush_interval: Duration,
    /// How raw lines become records
    pub codec: CodecConfig,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            exclude: Vec::new(),
            stat_interval: Duration::from_secs(1),
            discover_interval: Duration::from_secs(15),
            sincedb_path: None,
            sincedb_write_interval: Duration::from_secs(60000),
            start_position: StartPosition::End,
            delimiter: "\n".to_string(),
            offset_path: None,
            offsets_deferred: false,
            offset_flush_interval: Duration::from_secs(60),
            codec: CodecConfig::Plain,
        }
    }
}

impl TailConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.paths.is_empty() {
            return Err(Error::Config(
                "At least one source path must be specified".to_string(),
            ));
        }

        if let Some(relative) = self.paths.iter().find(|p| !Path::new(p).is_absolute()) {
            return Err(Error::Config(format!(
                "Source paths must be absolute, got {:?}",
                relative
            )));
        }

        if self.delimiter.is_empty() {
            return Err(Error::Config("Delimiter must not be empty".to_string()));
        }

        if self.stat_interval.is_zero() {
            return Err(Error::Config("Stat interval must be positive".to_string()));
        }

        if self.offset_flush_interval.is_zero() {
            return Err(Error::Config(
                "Offset flush interval must be positive".to_string(),
            ));
        }

        self.codec.validate()
    }

    /// Whether the logical offset file should be written by this process
    pub fn writes_offsets(&self) -> bool {
        self.offset_path.is_some() && !self.offsets_deferred
    }

    /// Resolve the sincedb location.
    ///
    /// An explicit path wins. Otherwise the file lives in the first of
    /// [`SINCEDB_DIR_VARS`] that `env` resolves, named after a hash of the
    /// sorted source paths so the same path set always maps to the same file.
    pub fn resolve_sincedb_path(&self, env: impl Fn(&str) -> Option<String>) -> Result<PathBuf> {
        if let Some(path) = &self.sincedb_path {
            return Ok(path.clone());
        }

        let dir = SINCEDB_DIR_VARS
            .iter()
            .find_map(|var| env(var).filter(|v| !v.is_empty()))
            .ok_or_else(|| {
                Error::Config(format!(
                    "No sincedb path configured and none of {} is set",
                    SINCEDB_DIR_VARS.join(", ")
                ))
            })?;

        Ok(PathBuf::from(dir).join(default_sincedb_name(&self.paths)))
    }

    /// Tailer settings for a resolved sincedb location
    pub fn tailer_config(&self, sincedb_path: PathBuf) -> TailerConfig {
        TailerConfig {
            include: self.paths.clone(),
            exclude: self.exclude.clone(),
            stat_interval: self.stat_interval,
            discover_interval: self.discover_interval,
            sincedb_path,
            sincedb_write_interval: self.sincedb_write_interval,
            start_position: self.start_position,
            delimiter: self.delimiter.clone(),
        }
    }
}

fn default_sincedb_name(paths: &[String]) -> String {
    let mut sorted: Vec<&str> = paths.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let digest = Sha256::digest(sorted.join(",").as_bytes());
    format!(".sincedb_{}", hex::encode(digest))
}
