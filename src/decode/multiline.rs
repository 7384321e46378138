// SPDX-License-Identifier: Apache-2.0

use regex::Regex;

use super::{Decoder, message_fields};
use crate::error::Result;
use crate::record::Fields;

/// Which neighbor a matching line belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MultilineWhat {
    /// A matching line continues the event before it (stack traces)
    #[default]
    Previous,
    /// A matching line is continued by the line after it (trailing `\`)
    Next,
}

/// Joins lines into multi-line events.
///
/// A line "matches" when `pattern` matches it, inverted by `negate`. Joined
/// events are emitted as a single `message` with lines separated by `\n`.
/// An event is only emitted once the line that closes it arrives; whatever is
/// still buffered when the process stops is dropped and re-read on restart.
pub struct MultilineDecoder {
    pattern: Regex,
    what: MultilineWhat,
    negate: bool,
    buffer: Vec<String>,
}

impl MultilineDecoder {
    pub fn new(pattern: Regex, what: MultilineWhat, negate: bool) -> Self {
        Self {
            pattern,
            what,
            negate,
            buffer: Vec::new(),
        }
    }

    fn matches(&self, line: &str) -> bool {
        self.pattern.is_match(line) != self.negate
    }

    fn take_event(&mut self) -> Option<Fields> {
        if self.buffer.is_empty() {
            return None;
        }
        let joined = self.buffer.join("\n");
        self.buffer.clear();
        Some(message_fields(joined))
    }
}

impl Decoder for MultilineDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<Fields>> {
        let matched = self.matches(line);
        let mut out = Vec::new();

        match self.what {
            MultilineWhat::Previous => {
                if !matched {
                    out.extend(self.take_event());
                }
                self.buffer.push(line.to_string());
            }
            MultilineWhat::Next => {
                self.buffer.push(line.to_string());
                if !matched {
                    out.extend(self.take_event());
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(fields: Vec<Fields>) -> Vec<String> {
        fields
            .into_iter()
            .map(|f| f.get("message").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_previous_joins_indented_lines() {
        let mut decoder =
            MultilineDecoder::new(Regex::new(r"^\s").unwrap(), MultilineWhat::Previous, false);

        assert!(decoder.decode("Exception in thread main").unwrap().is_empty());
        assert!(decoder.decode("  at a.b(C.java:1)").unwrap().is_empty());
        assert!(decoder.decode("  at d.e(F.java:2)").unwrap().is_empty());

        let out = messages(decoder.decode("next event").unwrap());
        assert_eq!(
            out,
            vec!["Exception in thread main\n  at a.b(C.java:1)\n  at d.e(F.java:2)"]
        );
        assert_eq!(decoder.buffer, vec!["next event".to_string()]);
    }

    #[test]
    fn test_next_with_trailing_backslash() {
        let mut decoder =
            MultilineDecoder::new(Regex::new(r"\\$").unwrap(), MultilineWhat::Next, false);

        assert!(decoder.decode(r"one \").unwrap().is_empty());
        let out = messages(decoder.decode("two").unwrap());
        assert_eq!(out, vec!["one \\\ntwo"]);

        let out = messages(decoder.decode("three").unwrap());
        assert_eq!(out, vec!["three"]);
    }

    #[test]
    fn test_negate_previous() {
        // Lines not starting with a date belong to the previous event
        let mut decoder = MultilineDecoder::new(
            Regex::new(r"^\d{4}-").unwrap(),
            MultilineWhat::Previous,
            true,
        );

        assert!(decoder.decode("2024-01-01 start").unwrap().is_empty());
        assert!(decoder.decode("continued").unwrap().is_empty());
        let out = messages(decoder.decode("2024-01-02 second").unwrap());
        assert_eq!(out, vec!["2024-01-01 start\ncontinued"]);
    }
}
