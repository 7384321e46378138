// SPDX-License-Identifier: Apache-2.0

//! Decoders turn raw lines into structured fields.
//!
//! # Available Decoders
//!
//! - [`PlainDecoder`] - one `message` field per line
//! - [`JsonDecoder`] - top-level JSON object keys become fields
//! - [`MultilineDecoder`] - joins continuation lines before emitting

mod json;
mod multiline;
mod plain;

pub use json::JsonDecoder;
pub use multiline::{MultilineDecoder, MultilineWhat};
pub use plain::PlainDecoder;

use regex::Regex;

use crate::error::{Error, Result};
use crate::record::Fields;

/// Field holding the raw text when a decoder has nothing better.
pub const FIELD_MESSAGE: &str = "message";

/// Decodes raw lines for a single source.
///
/// A decoder may buffer: one call can yield zero records (line held back)
/// or several. Errors are the decoder's own concern; callers log and skip the
/// line.
pub trait Decoder: Send {
    fn decode(&mut self, line: &str) -> Result<Vec<Fields>>;
}

/// Which decoder to build for each source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CodecConfig {
    #[default]
    Plain,
    Json,
    Multiline {
        pattern: String,
        what: MultilineWhat,
        negate: bool,
    },
}

impl CodecConfig {
    /// Check that a decoder can be built from this configuration.
    pub fn validate(&self) -> Result<()> {
        if let CodecConfig::Multiline { pattern, .. } = self {
            Regex::new(pattern).map_err(|e| Error::Regex(e.to_string()))?;
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Box<dyn Decoder>> {
        match self {
            CodecConfig::Plain => Ok(Box::new(PlainDecoder)),
            CodecConfig::Json => Ok(Box::new(JsonDecoder::lenient())),
            CodecConfig::Multiline {
                pattern,
                what,
                negate,
            } => {
                let regex = Regex::new(pattern).map_err(|e| Error::Regex(e.to_string()))?;
                Ok(Box::new(MultilineDecoder::new(regex, *what, *negate)))
            }
        }
    }
}

pub(crate) fn message_fields(message: impl Into<String>) -> Fields {
    let mut fields = Fields::new();
    fields.insert(
        FIELD_MESSAGE.to_string(),
        serde_json::Value::String(message.into()),
    );
    fields
}
