// SPDX-License-Identifier: Apache-2.0

use super::{Decoder, message_fields};
use crate::error::Result;
use crate::record::Fields;

/// Emits every line unchanged as `message`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDecoder;

impl Decoder for PlainDecoder {
    fn decode(&mut self, line: &str) -> Result<Vec<Fields>> {
        Ok(vec![message_fields(line)])
    }
}
