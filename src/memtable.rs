//! In-memory sorted table over a concurrent skip list.
//!
//! The memtable is the first stratum of the engine: every acknowledged
//! write lands here after its WAL append. Keys are held in ascending byte
//! order, so a flush can stream the table straight into a sorted-table
//! builder. A zero-length value is stored as-is; the tombstone reading of
//! it belongs to the engine.

use crossbeam_skiplist::SkipMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ordered key-value buffer with an atomic byte-size estimate.
///
/// The skip list supports concurrent readers, so `get` and `iter` run
/// against a table another thread is flushing. The size estimate assumes
/// writes to a single key do not race (the engine serializes writers).
#[derive(Debug, Default)]
pub struct Memtable {
    data: SkipMap<Vec<u8>, Vec<u8>>,
    size: AtomicUsize,
    count: AtomicUsize,
}

impl Memtable {
    pub fn new() -> Self {
        Self {
            data: SkipMap::new(),
            size: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
        }
    }

    /// Inserts or overwrites a key. An overwrite adjusts the size estimate
    /// by the value-length delta; a fresh insert grows it by the full
    /// entry size and bumps the count.
    pub fn insert(&self, key: Vec<u8>, value: Vec<u8>) {
        match self.data.get(&key) {
            Some(old) => {
                let old_len = old.value().len();
                if value.len() >= old_len {
                    self.size.fetch_add(value.len() - old_len, Ordering::SeqCst);
                } else {
                    self.size.fetch_sub(old_len - value.len(), Ordering::SeqCst);
                }
            }
            None => {
                self.size.fetch_add(key.len() + value.len(), Ordering::SeqCst);
                self.count.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.data.insert(key, value);
    }

    /// Returns the stored value. A zero-length value is returned as an
    /// empty vec, not as absence.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Ascending traversal of (key, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> + '_ {
        self.data
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    /// Byte-size estimate: sum of key and value lengths across entries.
    pub fn size_bytes(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
