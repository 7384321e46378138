// SPDX-License-Identifier: Apache-2.0

use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tower::BoxError;

use crate::config::TailConfig;
use crate::decode::{CodecConfig, MultilineWhat};
use crate::init::parse;
use crate::tail::StartPosition;

/// Where to start reading files with no recorded progress
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum StartPositionArg {
    /// Start at the beginning of the file
    Beginning,
    /// Start at the end of the file (tail mode)
    #[default]
    End,
}

impl From<StartPositionArg> for StartPosition {
    fn from(s: StartPositionArg) -> Self {
        match s {
            StartPositionArg::Beginning => StartPosition::Beginning,
            StartPositionArg::End => StartPosition::End,
        }
    }
}

/// How raw lines are decoded
#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum CodecArg {
    /// Each line is the message
    #[default]
    Plain,
    /// Each line is a JSON object
    Json,
    /// Join lines into events with --multiline-pattern
    Multiline,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum MultilineWhatArg {
    #[default]
    Previous,
    Next,
}

impl From<MultilineWhatArg> for MultilineWhat {
    fn from(w: MultilineWhatArg) -> Self {
        match w {
            MultilineWhatArg::Previous => MultilineWhat::Previous,
            MultilineWhatArg::Next => MultilineWhat::Next,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct TailArgs {
    /// Comma-separated absolute glob patterns for files to follow (e.g., "/var/log/*.log")
    #[arg(
        long = "path",
        env = "SINCETAIL_PATH",
        value_delimiter = ',',
        required = true
    )]
    pub paths: Vec<String>,

    /// Comma-separated glob patterns for files to skip
    #[arg(long, env = "SINCETAIL_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Seconds between checks of known files for new data
    #[arg(long, env = "SINCETAIL_STAT_INTERVAL_SECS", default_value = "1")]
    pub stat_interval_secs: u64,

    /// Seconds between expansions of the path patterns
    #[arg(long, env = "SINCETAIL_DISCOVER_INTERVAL_SECS", default_value = "15")]
    pub discover_interval_secs: u64,

    /// Sincedb location, defaults to a file under $SINCEDB_DIR or $HOME
    #[arg(long, env = "SINCETAIL_SINCEDB_PATH")]
    pub sincedb_path: Option<PathBuf>,

    /// Seconds between sincedb rewrites while running
    #[arg(
        long,
        env = "SINCETAIL_SINCEDB_WRITE_INTERVAL_SECS",
        default_value = "60000"
    )]
    pub sincedb_write_interval_secs: u64,

    /// Where to start reading files with no recorded progress
    #[arg(
        value_enum,
        long,
        env = "SINCETAIL_START_POSITION",
        default_value = "end"
    )]
    pub start_position: StartPositionArg,

    /// Line delimiter, accepts \n, \r and \t escapes
    #[arg(
        long,
        env = "SINCETAIL_DELIMITER",
        default_value = "\\n",
        value_parser = parse::parse_delimiter
    )]
    pub delimiter: String,

    /// Logical offset file keyed by path, disabled when unset
    #[arg(long, env = "SINCETAIL_OFFSET_PATH")]
    pub offset_path: Option<PathBuf>,

    /// A downstream consumer persists offsets, never write the offset file
    #[arg(long, env = "SINCETAIL_OFFSETS_DEFERRED", default_value = "false")]
    pub offsets_deferred: bool,

    /// Seconds between offset file flushes while running
    #[arg(
        long,
        env = "SINCETAIL_OFFSET_FLUSH_INTERVAL_SECS",
        default_value = "60"
    )]
    pub offset_flush_interval_secs: u64,

    /// Line codec: plain, json or multiline
    #[arg(value_enum, long, env = "SINCETAIL_CODEC", default_value = "plain")]
    pub codec: CodecArg,

    /// Regex deciding which lines belong together (when codec=multiline)
    #[arg(long, env = "SINCETAIL_MULTILINE_PATTERN")]
    pub multiline_pattern: Option<String>,

    /// Whether a matching line joins the previous or the next line
    #[arg(
        value_enum,
        long,
        env = "SINCETAIL_MULTILINE_WHAT",
        default_value = "previous"
    )]
    pub multiline_what: MultilineWhatArg,

    /// Invert the multiline pattern
    #[arg(long, env = "SINCETAIL_MULTILINE_NEGATE", default_value = "false")]
    pub multiline_negate: bool,
}

impl TailArgs {
    pub fn build_config(&self) -> Result<TailConfig, BoxError> {
        let codec = match self.codec {
            CodecArg::Plain => CodecConfig::Plain,
            CodecArg::Json => CodecConfig::Json,
            CodecArg::Multiline => {
                let pattern = self
                    .multiline_pattern
                    .clone()
                    .ok_or("--multiline-pattern is required when codec is multiline")?;
                CodecConfig::Multiline {
                    pattern,
                    what: self.multiline_what.into(),
                    negate: self.multiline_negate,
                }
            }
        };

        let config = TailConfig {
            paths: self.paths.clone(),
            exclude: self.exclude.clone(),
            stat_interval: Duration::from_secs(self.stat_interval_secs),
            discover_interval: Duration::from_secs(self.discover_interval_secs),
            sincedb_path: self.sincedb_path.clone(),
            sincedb_write_interval: Duration::from_secs(self.sincedb_write_interval_secs),
            start_position: self.start_position.into(),
            delimiter: self.delimiter.clone(),
            offset_path: self.offset_path.clone(),
            offsets_deferred: self.offsets_deferred,
            offset_flush_interval: Duration::from_secs(self.offset_flush_interval_secs),
            codec,
        };
        config.validate()?;

        Ok(config)
    }
}
