//! K-way merge of sorted-table iterators.
//!
//! Compaction feeds the merged output of several tables into a single
//! builder. Sources are ordered newest-first: when the same key appears in
//! more than one table, the entry from the lowest source index is yielded
//! and the older ones are skipped. Tombstones (empty values) flow through
//! unchanged, because an older table outside the merged run may still hold
//! a value they must keep masking.

use crate::error::{Error, Result};
use crate::sstable::TableIter;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // Reversed so the max-heap pops the smallest key; ties pop the lowest
    // (newest) source first.
    fn cmp(&self, other: &Self) -> Ordering {
        match self.key.cmp(&other.key) {
            Ordering::Equal => self.source.cmp(&other.source).reverse(),
            ordering => ordering.reverse(),
        }
    }
}

/// Merges sorted iterators into one ascending stream, newest source
/// winning on duplicate keys.
pub struct MergeIterator {
    sources: Vec<TableIter>,
    heap: BinaryHeap<HeapEntry>,
    last_key: Option<Vec<u8>>,
    pending_error: Option<Error>,
}

impl MergeIterator {
    /// `sources` must be ordered newest-first.
    pub fn new(sources: Vec<TableIter>) -> Self {
        let mut merge = Self {
            sources,
            heap: BinaryHeap::new(),
            last_key: None,
            pending_error: None,
        };
        for source in 0..merge.sources.len() {
            merge.advance(source);
        }
        merge
    }

    /// Pulls the next record from `source` into the heap. A source error
    /// is stashed and surfaced on the next `next()` call.
    fn advance(&mut self, source: usize) {
        match self.sources[source].next() {
            Some(Ok((key, value))) => self.heap.push(HeapEntry { key, value, source }),
            Some(Err(err)) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(err);
                }
            }
            None => {}
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            return Some(Err(err));
        }

        while let Some(entry) = self.heap.pop() {
            self.advance(entry.source);

            // An equal key from an older source was already yielded.
            if self.last_key.as_ref() == Some(&entry.key) {
                continue;
            }

            self.last_key = Some(entry.key.clone());
            return Some(Ok((entry.key, entry.value)));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::{TableBuilder, TableReader};
    use tempfile::TempDir;

    fn build_table(dir: &TempDir, name: &str, entries: &[(&[u8], &[u8])]) -> TableReader {
        let path = dir.path().join(name);
        let mut builder = TableBuilder::new(&path).unwrap();
        for (key, value) in entries {
            builder.add(key, value).unwrap();
        }
        builder.finish().unwrap();
        TableReader::open(&path).unwrap()
    }

    fn merged(readers: &[&TableReader]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let iters = readers
            .iter()
            .map(|r| r.iter().unwrap())
            .collect::<Vec<_>>();
        MergeIterator::new(iters)
            .collect::<Result<Vec<_>>>()
            .expect("merge failed")
    }

    #[test]
    fn test_merge_disjoint_tables() {
        let dir = TempDir::new().unwrap();
        let newer = build_table(&dir, "data_00000002.sst", &[(b"b", b"2"), (b"d", b"4")]);
        let older = build_table(&dir, "data_00000001.sst", &[(b"a", b"1"), (b"c", b"3")]);

        let records = merged(&[&newer, &older]);
        assert_eq!(
            records,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
                (b"d".to_vec(), b"4".to_vec()),
            ]
        );
    }

    #[test]
    fn test_newest_source_wins_duplicates() {
        let dir = TempDir::new().unwrap();
        let newer = build_table(&dir, "data_00000002.sst", &[(b"k", b"new")]);
        let older = build_table(
            &dir,
            "data_00000001.sst",
            &[(b"j", b"old-only"), (b"k", b"old")],
        );

        let records = merged(&[&newer, &older]);
        assert_eq!(
            records,
            vec![
                (b"j".to_vec(), b"old-only".to_vec()),
                (b"k".to_vec(), b"new".to_vec()),
            ]
        );
    }

    #[test]
    fn test_tombstones_are_preserved() {
        let dir = TempDir::new().unwrap();
        let newer = build_table(&dir, "data_00000002.sst", &[(b"k", b"")]);
        let older = build_table(&dir, "data_00000001.sst", &[(b"k", b"value")]);

        let records = merged(&[&newer, &older]);
        assert_eq!(records, vec![(b"k".to_vec(), Vec::new())]);
    }

    #[test]
    fn test_merge_three_way() {
        let dir = TempDir::new().unwrap();
        let gen3 = build_table(&dir, "data_00000003.sst", &[(b"a", b"a3"), (b"c", b"c3")]);
        let gen2 = build_table(&dir, "data_00000002.sst", &[(b"a", b"a2"), (b"b", b"b2")]);
        let gen1 = build_table(
            &dir,
            "data_00000001.sst",
            &[(b"b", b"b1"), (b"c", b"c1"), (b"d", b"d1")],
        );

        let records = merged(&[&gen3, &gen2, &gen1]);
        assert_eq!(
            records,
            vec![
                (b"a".to_vec(), b"a3".to_vec()),
                (b"b".to_vec(), b"b2".to_vec()),
                (b"c".to_vec(), b"c3".to_vec()),
                (b"d".to_vec(), b"d1".to_vec()),
            ]
        );
    }
}
