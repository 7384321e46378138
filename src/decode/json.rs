// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use super::{Decoder, message_fields};
use crate::error::{Error, Result};
use crate::record::Fields;

/// A decoder that parses each line as a JSON object.
#[derive(Debug, Clone, Default)]
pub struct JsonDecoder {
    /// If true, lines that are not a JSON object are passed through as
    /// `message`. If false, they are an error.
    lenient: bool,
}

impl JsonDecoder {
    /// Create a strict JsonDecoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lenient JsonDecoder that falls back to a plain message.
    pub fn lenient() -> Self {
        Self { lenient: true }
    }
}

impl Decoder for JsonDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<Fields>> {
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(map)) => Ok(vec![map]),
            Ok(_) if self.lenient => Ok(vec![message_fields(line)]),
            Ok(_) => Err(Error::Decode(
                "JSON must be an object at the top level".to_string(),
            )),
            Err(_) if self.lenient => Ok(vec![message_fields(line)]),
            Err(e) => Err(Error::Decode(format!("invalid JSON: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_fields() {
        let out = JsonDecoder::new()
            .decode(r#"{"level":"info","count":3,"nested":{"a":true}}"#)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("level"), Some(&json!("info")));
        assert_eq!(out[0].get("count"), Some(&json!(3)));
        assert_eq!(out[0].get("nested"), Some(&json!({"a": true})));
    }

    #[test]
    fn test_strict_rejects_invalid() {
        let mut decoder = JsonDecoder::new();
        assert!(matches!(decoder.decode("not json"), Err(Error::Decode(_))));
        assert!(matches!(decoder.decode("[1,2]"), Err(Error::Decode(_))));
    }

    #[test]
    fn test_lenient_falls_back_to_message() {
        let mut decoder = JsonDecoder::lenient();
        let out = decoder.decode("not json").unwrap();
        assert_eq!(out[0].get("message"), Some(&json!("not json")));

        let out = decoder.decode("42").unwrap();
        assert_eq!(out[0].get("message"), Some(&json!("42")));
    }
}
