// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use portable_atomic::{AtomicU64, Ordering};

use super::ProcessSalt;

#[derive(Debug)]
struct Counter {
    id: String,
    registration_key: String,
    value: AtomicU64,
}

/// Shared handle to a single source counter.
///
/// Cloning is cheap; all clones observe the same value.
#[derive(Debug, Clone)]
pub struct CounterHandle {
    inner: Arc<Counter>,
}

impl CounterHandle {
    /// Source identifier this counter belongs to.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Salted key for metric registration.
    pub fn registration_key(&self) -> &str {
        &self.inner.registration_key
    }

    pub fn value(&self) -> u64 {
        self.inner.value.load(Ordering::Acquire)
    }

    /// Add `n` bytes and return the value before the addition.
    pub fn increment(&self, n: u64) -> u64 {
        self.inner.value.fetch_add(n, Ordering::AcqRel)
    }

    /// Raise the counter to at least `target`, returning the amount applied.
    ///
    /// Equivalent to `increment(max(current, target) - current)` but performed
    /// atomically, so a concurrent increment can never be lost.
    pub fn advance_to(&self, target: u64) -> u64 {
        let previous = self.inner.value.fetch_max(target, Ordering::AcqRel);
        target.saturating_sub(previous)
    }
}

/// Map from source identifier to byte counter, created lazily.
///
/// Entries are never removed.
#[derive(Debug)]
pub struct CounterStore {
    salt: ProcessSalt,
    counters: RwLock<HashMap<String, CounterHandle>>,
}

impl CounterStore {
    pub fn new(salt: ProcessSalt) -> Self {
        Self {
            salt,
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Return the counter for `id`, creating it at zero on first access.
    pub fn get_or_create(&self, id: &str) -> CounterHandle {
        // Counters are atomics, so a poisoned lock cannot hold torn state.
        {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(handle) = counters.get(id) {
                return handle.clone();
            }
        }

        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        counters
            .entry(id.to_string())
            .or_insert_with(|| CounterHandle {
                inner: Arc::new(Counter {
                    id: id.to_string(),
                    registration_key: self.salt.registration_key(id),
                    value: AtomicU64::new(0),
                }),
            })
            .clone()
    }

    /// Current value for `id` without creating an entry.
    pub fn value_of(&self, id: &str) -> Option<u64> {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        counters.get(id).map(|h| h.value())
    }

    /// Visit every (id, value) pair.
    ///
    /// Handles are collected under the read lock and read afterwards, so
    /// `f` never runs while the map is locked.
    pub fn for_each(&self, mut f: impl FnMut(&str, u64)) {
        let handles: Vec<CounterHandle> = {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            counters.values().cloned().collect()
        };

        for handle in handles {
            f(handle.id(), handle.value());
        }
    }

    /// Point-in-time copy of all counters, sorted by identifier.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut entries = Vec::new();
        self.for_each(|id, value| entries.push((id.to_string(), value)));
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> CounterStore {
        CounterStore::new(ProcessSalt::from_string("test"))
    }

    #[test]
    fn test_lazy_creation_returns_same_handle() {
        let store = store();
        assert!(store.is_empty());
        assert_eq!(store.value_of("/a"), None);

        let h1 = store.get_or_create("/a");
        h1.increment(5);
        let h2 = store.get_or_create("/a");

        assert_eq!(h2.value(), 5);
        assert_eq!(store.len(), 1);
        assert_eq!(h2.registration_key(), "test//a");
    }

    #[test]
    fn test_increment_returns_previous_value() {
        let store = store();
        let h = store.get_or_create("/a");
        assert_eq!(h.increment(2), 0);
        assert_eq!(h.increment(3), 2);
        assert_eq!(h.value(), 5);
    }

    #[test]
    fn test_advance_to_never_regresses() {
        let store = store();
        let h = store.get_or_create("/a");
        h.increment(40);

        assert_eq!(h.advance_to(10), 0);
        assert_eq!(h.value(), 40);

        assert_eq!(h.advance_to(100), 60);
        assert_eq!(h.value(), 100);

        assert_eq!(h.advance_to(100), 0);
        assert_eq!(h.value(), 100);
    }

    #[test]
    fn test_snapshot_sorted() {
        let store = store();
        store.get_or_create("/b").increment(2);
        store.get_or_create("/a").increment(1);

        assert_eq!(
            store.snapshot(),
            vec![("/a".to_string(), 1), ("/b".to_string(), 2)]
        );
    }

    #[test]
    fn test_concurrent_increment_and_snapshot() {
        let store = Arc::new(store());
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let h = store.get_or_create(&format!("/file{}", i));
                    for _ in 0..10_000 {
                        h.increment(1);
                    }
                })
            })
            .collect();

        // Snapshots taken mid-flight must only ever see whole values.
        for _ in 0..100 {
            for (_, value) in store.snapshot() {
                assert!(value <= 10_000);
            }
        }

        for w in writers {
            w.join().unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert!(snapshot.iter().all(|(_, v)| *v == 10_000));
    }
}
