// SPDX-License-Identifier: Apache-2.0

//! Durable checkpoint files.
//!
//! Two line-oriented formats share one reader/writer:
//! - [`LogicalOffsetFormat`]: `<path>:<count>`, keyed by logical path. Survives
//!   restarts but not rotation, since the path may name a different file later.
//! - [`SincedbFormat`]: `<identity-token> <count>`, keyed by the tailer's stable
//!   file identity so a rename keeps its position.
//!
//! The formats are deliberately kept apart and versioned independently.

mod file;
mod offset_file;
mod sincedb;

pub use file::CheckpointFile;
pub use offset_file::LogicalOffsetFormat;
pub use sincedb::SincedbFormat;

/// One persisted (identifier, count) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub id: String,
    pub count: u64,
}

impl CheckpointRecord {
    pub fn new(id: impl Into<String>, count: u64) -> Self {
        Self {
            id: id.into(),
            count,
        }
    }
}

/// A single-line text encoding for checkpoint records.
pub trait CheckpointFormat {
    /// Name used in log messages.
    const NAME: &'static str;
    /// Format revision, bumped whenever the line layout changes.
    const VERSION: u8;

    /// Encode a record as one line, without the trailing newline.
    fn encode(record: &CheckpointRecord) -> String;

    /// Decode one line (newline already stripped). Returns `None` when the line
    /// is malformed and must be skipped.
    fn decode(line: &str) -> Option<CheckpointRecord>;
}

/// Legacy offset file keyed by logical path.
pub type OffsetFile = CheckpointFile<LogicalOffsetFormat>;

/// Identity-keyed file consumed by the tailer.
pub type SincedbFile = CheckpointFile<SincedbFormat>;
