// SPDX-License-Identifier: Apache-2.0

//! Tails growing log files and forwards each line as an enriched record,
//! keeping a per-file count of consumed bytes that survives restarts.
//!
//! The count for a file lives in a lock-free [`ledger::CounterStore`]. At
//! startup it is reconciled with a path-keyed offset file and used to prime
//! the tailer's identity-keyed sincedb; at shutdown it is merge-flushed back.

use opentelemetry::global;
use opentelemetry::metrics::Meter;

pub mod bounded_channel;
pub mod checkpoint;
pub mod config;
pub mod decode;
pub mod error;
pub mod init;
pub mod ledger;
pub mod lifecycle;
pub mod processor;
pub mod reconcile;
pub mod record;
pub mod tail;

pub use config::TailConfig;
pub use error::{Error, Result};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use record::EnrichedRecord;

pub fn get_meter() -> Meter {
    global::meter("sincetail")
}
