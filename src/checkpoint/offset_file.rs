// SPDX-License-Identifier: Apache-2.0

use super::{CheckpointFormat, CheckpointRecord};

/// `<logical-path>:<count>` lines.
///
/// Paths may contain colons, so lines are split on the last one. A line without
/// any colon is malformed; a count that does not parse is read as zero.
pub struct LogicalOffsetFormat;

impl CheckpointFormat for LogicalOffsetFormat {
    const NAME: &'static str = "offset file";
    const VERSION: u8 = 1;

    fn encode(record: &CheckpointRecord) -> String {
        format!("{}:{}", record.id, record.count)
    }

    fn decode(line: &str) -> Option<CheckpointRecord> {
        let (id, count) = line.rsplit_once(':')?;
        if id.is_empty() {
            return None;
        }
        let count = count.trim().parse::<u64>().unwrap_or(0);
        Some(CheckpointRecord::new(id, count))
    }
}
