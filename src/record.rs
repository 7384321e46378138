// SPDX-License-Identifier: Apache-2.0

//! The record handed downstream for every decoded line.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Free-form fields produced by a decoder.
pub type Fields = serde_json::Map<String, Value>;

pub const FIELD_TIMESTAMP: &str = "@timestamp";
pub const FIELD_HOST: &str = "host";
pub const FIELD_PATH: &str = "path";
pub const FIELD_OFFSET: &str = "offset";
pub const FIELD_MSG_LEN: &str = "msg_len";

/// A decoded line stamped with its origin and position.
///
/// `offset` is the source counter before this record's bytes were added and
/// `msg_len` is the raw line length plus the delimiter, so consecutive records
/// from one source satisfy `next.offset == prev.offset + prev.msg_len`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRecord {
    #[serde(rename = "@timestamp")]
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub path: String,
    pub offset: u64,
    pub msg_len: u64,
    /// Everything else the decoder produced
    #[serde(flatten)]
    pub fields: Fields,
}

impl EnrichedRecord {
    /// Build a record from decoder output.
    ///
    /// A `host` or `path` supplied by the decoder is kept; otherwise the
    /// given defaults are used. `offset` and `msg_len` always come from the
    /// ledger and replace any decoder value of the same name.
    pub fn from_decoded(
        mut fields: Fields,
        default_path: &str,
        default_host: &str,
        offset: u64,
        msg_len: u64,
    ) -> Self {
        let host =
            take_string(&mut fields, FIELD_HOST).unwrap_or_else(|| default_host.to_string());
        let path =
            take_string(&mut fields, FIELD_PATH).unwrap_or_else(|| default_path.to_string());
        let timestamp = take_string(&mut fields, FIELD_TIMESTAMP)
            .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        fields.remove(FIELD_OFFSET);
        fields.remove(FIELD_MSG_LEN);

        Self {
            timestamp,
            host,
            path,
            offset,
            msg_len,
            fields,
        }
    }

    /// Byte position just past this record.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.msg_len
    }
}

/// Remove `key` and return it as text. Non-string values are rendered as JSON
/// so a reserved name never appears twice in the serialized record.
fn take_string(fields: &mut Fields, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
