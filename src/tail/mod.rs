// SPDX-License-Identifier: Apache-2.0

//! Tailing collaborator.
//!
//! Discovers files from glob patterns, notices growth, truncation and
//! rotation, and hands every complete line to a callback as raw bytes. Its
//! own resume positions live in a sincedb file keyed by stable file identity.

mod file_id;
mod finder;
mod poll;

pub use file_id::FileId;
pub use finder::FileFinder;
pub use poll::PollTailer;

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Where to start reading a file the sincedb has never seen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Read the whole file
    Beginning,
    /// Only read what is appended from now on
    #[default]
    End,
}

/// Configuration handed to a tailer
#[derive(Debug, Clone)]
pub struct TailerConfig {
    /// Glob patterns for files to follow
    pub include: Vec<String>,
    /// Glob patterns for files to skip
    pub exclude: Vec<String>,
    /// How often known files are checked for new data
    pub stat_interval: Duration,
    /// How often patterns are expanded to find new files
    pub discover_interval: Duration,
    /// Identity-keyed position file
    pub sincedb_path: PathBuf,
    /// How often the sincedb is rewritten while running
    pub sincedb_write_interval: Duration,
    /// Start position for never-seen files found by the first scan
    pub start_position: StartPosition,
    /// Line delimiter, may be more than one byte
    pub delimiter: String,
}

/// What a tailer reports about a followed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailEvent<'a> {
    /// The file is followed from this byte position. Everything before it
    /// counts as consumed even though it is never delivered.
    Start(u64),
    /// One complete line with the delimiter stripped, exactly as read.
    Line(&'a [u8]),
}

/// A source of per-path events.
pub trait Tailer: Send {
    /// Deliver events until quit is signalled or `on_event` returns false.
    ///
    /// Blocks the calling thread. Events for one path are delivered in file
    /// order. A `Start` is only reported for a non-zero position, before any
    /// line read from there.
    fn run(&mut self, on_event: &mut dyn FnMut(&Path, TailEvent<'_>) -> bool) -> Result<()>;

    /// Token that stops [`run`](Self::run) when cancelled.
    fn quit_handle(&self) -> CancellationToken;

    /// Stable identity used as the sincedb key for a file.
    fn identity_token(&self, path: &Path, metadata: &Metadata) -> String;
}
