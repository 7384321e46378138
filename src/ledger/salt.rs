// SPDX-License-Identifier: Apache-2.0

use std::fmt;

/// Random token generated once per process.
///
/// Prefixed onto every metric registration key so counters registered by
/// successive runs never collide in a shared registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessSalt(String);

impl ProcessSalt {
    /// Generate a fresh salt from 16 random bytes, hex encoded.
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    /// Use a fixed salt (tests, or when the caller already owns one).
    pub fn from_string(salt: impl Into<String>) -> Self {
        Self(salt.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespaced key used when registering a per-source instrument.
    pub fn registration_key(&self, id: &str) -> String {
        format!("{}/{}", self.0, id)
    }
}

impl fmt::Display for ProcessSalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
