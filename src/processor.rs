// SPDX-License-Identifier: Apache-2.0

//! Per-line enrichment and emission.
//!
//! Runs on the tailer thread. For every record a line decodes to, the source's
//! current counter value is stamped as the record offset, the record is pushed
//! downstream, and only then is the counter advanced by the line length plus
//! the delimiter. Lengths are taken from the bytes as read, never from their
//! decoded text. Lines for one source arrive in order on one thread, so the
//! stamped offsets for a source are gap-free.

use std::collections::HashMap;
use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry::metrics::Counter;
use tracing::debug;

use crate::bounded_channel::BoundedSender;
use crate::decode::{CodecConfig, Decoder};
use crate::error::{Error, Result};
use crate::get_meter;
use crate::ledger::{CounterHandle, CounterStore};
use crate::record::EnrichedRecord;

/// Per-source state, created on the first line from that source.
struct SourceState {
    counter: CounterHandle,
    decoder: Box<dyn Decoder>,
    tags: [KeyValue; 1],
}

pub struct LineProcessor {
    store: Arc<CounterStore>,
    codec: CodecConfig,
    host: String,
    delimiter_len: u64,
    output: BoundedSender<EnrichedRecord>,
    sources: HashMap<String, SourceState>,
    emitted_counter: Counter<u64>,
    bytes_counter: Counter<u64>,
}

impl LineProcessor {
    /// `host` is resolved once by the caller and reused for every record.
    pub fn new(
        store: Arc<CounterStore>,
        codec: CodecConfig,
        host: String,
        delimiter: &str,
        output: BoundedSender<EnrichedRecord>,
    ) -> Self {
        let emitted_counter = get_meter()
            .u64_counter("sincetail_lines_emitted")
            .with_description("Number of enriched records pushed downstream.")
            .with_unit("records")
            .build();

        let bytes_counter = get_meter()
            .u64_counter("sincetail_bytes_consumed")
            .with_description("Number of source bytes accounted in the offset ledger.")
            .with_unit("bytes")
            .build();

        Self {
            store,
            codec,
            host,
            delimiter_len: delimiter.len() as u64,
            output,
            sources: HashMap::new(),
            emitted_counter,
            bytes_counter,
        }
    }

    fn ensure_source(&mut self, path: &str) -> Result<()> {
        if !self.sources.contains_key(path) {
            let counter = self.store.get_or_create(path);
            let state = SourceState {
                tags: [KeyValue::new(
                    "counter",
                    counter.registration_key().to_string(),
                )],
                decoder: self.codec.build()?,
                counter,
            };
            self.sources.insert(path.to_string(), state);
        }
        Ok(())
    }

    /// Account for bytes of `path` that were skipped rather than delivered.
    ///
    /// Raises the source counter to `position`, never lowers it, and returns
    /// the resulting value.
    pub fn skip_to(&mut self, path: &str, position: u64) -> Result<u64> {
        self.ensure_source(path)?;
        let Some(source) = self.sources.get(path) else {
            return Ok(position);
        };
        let applied = source.counter.advance_to(position);
        if applied > 0 {
            debug!(path, position, skipped = applied, "Counting skipped bytes as consumed");
        }
        Ok(source.counter.value())
    }

    /// Decode, enrich and emit one raw line from `path`.
    ///
    /// Returns the number of records emitted. Invalid UTF-8 is replaced for
    /// decoding only. Decoder failures are logged and count as zero records.
    /// Fails with [`Error::ChannelSend`] once the downstream queue is gone;
    /// the record that could not be sent is not counted.
    pub fn process(&mut self, path: &str, raw_line: &[u8]) -> Result<usize> {
        self.ensure_source(path)?;
        let Some(source) = self.sources.get_mut(path) else {
            return Ok(0);
        };

        let line = String::from_utf8_lossy(raw_line);
        let decoded = match source.decoder.decode(&line) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(path, error = %e, "Decoder rejected line, skipping");
                return Ok(0);
            }
        };

        let msg_len = raw_line.len() as u64 + self.delimiter_len;
        let mut emitted = 0;

        for fields in decoded {
            let offset = source.counter.value();
            let record = EnrichedRecord::from_decoded(fields, path, &self.host, offset, msg_len);

            if self.output.send_blocking(record).is_err() {
                debug!(path, offset, "Downstream queue closed, dropping record");
                return Err(Error::ChannelSend);
            }

            source.counter.increment(msg_len);
            self.emitted_counter.add(1, &source.tags);
            self.bytes_counter.add(msg_len, &source.tags);
            emitted += 1;
        }

        Ok(emitted)
    }
}

/// Resolve the local host name once for the whole process.
pub fn local_hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .unwrap_or_else(|_| "unknown".to_string())
}
