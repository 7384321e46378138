// SPDX-License-Identifier: Apache-2.0

//! In-memory offset ledger.
//!
//! Holds one monotonically increasing byte counter per source identifier. The
//! tailer thread increments counters while the lifecycle controller snapshots
//! them for checkpointing, so every counter is a lock-free atomic and the map
//! lock is only held to look up or insert handles.

mod salt;
mod store;

pub use salt::ProcessSalt;
pub use store::{CounterHandle, CounterStore};
