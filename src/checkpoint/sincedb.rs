// SPDX-License-Identifier: Apache-2.0

use super::{CheckpointFormat, CheckpointRecord};

/// `<identity-token> <count>` lines.
///
/// The token is opaque and produced by the tailer; it may itself contain
/// spaces, so lines are split on the last space. Unlike the logical offset
/// format, an unparseable count makes the whole line malformed because the
/// tailer would otherwise seek to the start of a file it already consumed.
pub struct SincedbFormat;

impl CheckpointFormat for SincedbFormat {
    const NAME: &'static str = "sincedb";
    const VERSION: u8 = 1;

    fn encode(record: &CheckpointRecord) -> String {
        format!("{} {}", record.id, record.count)
    }

    fn decode(line: &str) -> Option<CheckpointRecord> {
        let (token, count) = line.trim_end().rsplit_once(' ')?;
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let count = count.parse::<u64>().ok()?;
        Some(CheckpointRecord::new(token, count))
    }
}
