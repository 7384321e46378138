// SPDX-License-Identifier: Apache-2.0

//! Reconciles persisted checkpoints with the live counter store.
//!
//! Merging is max-wins per identifier: a persisted count can raise a live
//! counter but never lower it. This makes ingesting the same file twice a
//! no-op and keeps progress monotonic across restarts.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::Path;

use tracing::{debug, info};

use crate::checkpoint::{CheckpointRecord, OffsetFile, SincedbFile};
use crate::error::Result;
use crate::ledger::CounterStore;

/// Outcome of merging a set of records into the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    /// Records examined
    pub records: usize,
    /// Counters that moved forward
    pub advanced: usize,
    /// Total bytes added across all counters
    pub bytes_added: u64,
}

pub struct Reconciler<'a> {
    store: &'a CounterStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a CounterStore) -> Self {
        Self { store }
    }

    /// Max-merge `records` into the store.
    pub fn merge(&self, records: &[CheckpointRecord]) -> MergeSummary {
        let mut summary = MergeSummary {
            records: records.len(),
            ..Default::default()
        };

        for record in records {
            let handle = self.store.get_or_create(&record.id);
            let added = handle.advance_to(record.count);
            if added > 0 {
                summary.advanced += 1;
                summary.bytes_added += added;
            }
        }

        summary
    }

    /// Merge the logical offset file into the store, if it exists.
    pub fn ingest(&self, file: &OffsetFile) -> Result<MergeSummary> {
        let records = match file.read_if_exists()? {
            Some(records) => records,
            None => {
                debug!(path = ?file.path(), "No offset file to ingest");
                return Ok(MergeSummary::default());
            }
        };

        let summary = self.merge(&records);
        info!(
            path = ?file.path(),
            records = summary.records,
            advanced = summary.advanced,
            bytes_added = summary.bytes_added,
            "Ingested offset file"
        );
        Ok(summary)
    }

    /// Rewrite the offset file from the store.
    ///
    /// The existing file is merged in first so that a count recorded there but
    /// never seen by this process is not thrown away. Returns the number of
    /// records written.
    pub fn flush(&self, file: &OffsetFile) -> Result<usize> {
        self.ingest(file)?;

        let records: Vec<CheckpointRecord> = self
            .store
            .snapshot()
            .into_iter()
            .map(|(id, count)| CheckpointRecord::new(id, count))
            .collect();

        file.write(&records)?;
        Ok(records.len())
    }

    /// Seed the tailer's sincedb from the store.
    ///
    /// Any previous sincedb is deleted, then every known logical path is
    /// resolved to its current identity token with `identify` and written out
    /// with the counter's value. Paths that no longer exist are skipped. When two
    /// paths resolve to the same file the larger count is kept. Returns the
    /// number of records written.
    pub fn prime_sincedb<I>(&self, file: &SincedbFile, identify: I) -> Result<usize>
    where
        I: Fn(&Path, &Metadata) -> String,
    {
        if file.remove()? {
            debug!(path = ?file.path(), "Removed previous sincedb");
        }

        let mut by_token: BTreeMap<String, u64> = BTreeMap::new();
        for (id, count) in self.store.snapshot() {
            let path = Path::new(&id);
            let metadata = match std::fs::metadata(path) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %id, error = %e, "Cannot resolve identity, skipping");
                    continue;
                }
            };

            let token = identify(path, &metadata);
            let entry = by_token.entry(token).or_insert(0);
            *entry = (*entry).max(count);
        }

        let records: Vec<CheckpointRecord> = by_token
            .into_iter()
            .map(|(token, count)| CheckpointRecord::new(token, count))
            .collect();

        file.write(&records)?;
        info!(path = ?file.path(), records = records.len(), "Primed sincedb");
        Ok(records.len())
    }
}
