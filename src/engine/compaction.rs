//! Size-tiered compaction.
//!
//! Tables are bucketed into fixed size tiers. Each tick, the worker walks
//! the table list in generation order looking for the first contiguous
//! run of same-tier files long enough to merge. The run is merged
//! newest-first-wins into a single table written under the newest input's
//! generation tag (the atomic rename replaces that input), and the older
//! inputs are removed. Tombstones survive the merge: a table older than
//! the run may still hold a value they must keep masking, so only a merge
//! that includes the oldest table could ever drop them.

use super::{Shared, Table};
use crate::error::Result;
use crate::sstable::{MergeIterator, TableBuilder, TableReader};

use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

/// Size tier of a table file: <10 MiB, <50 MiB, <250 MiB, <1 GiB, ≥1 GiB.
fn tier_of(size: u64) -> usize {
    if size < 10 * MIB {
        0
    } else if size < 50 * MIB {
        1
    } else if size < 250 * MIB {
        2
    } else if size < 1024 * MIB {
        3
    } else {
        4
    }
}

/// First contiguous run of `fanin` tables sharing a tier, in generation
/// order.
fn select_run(tables: &[Arc<Table>], fanin: usize) -> Option<Vec<Arc<Table>>> {
    let mut run_start = 0;
    let mut run_tier = None;

    for (i, table) in tables.iter().enumerate() {
        let tier = tier_of(table.reader.size_bytes());
        if run_tier != Some(tier) {
            run_tier = Some(tier);
            run_start = i;
        }
        if i - run_start + 1 == fanin {
            return Some(tables[run_start..=i].to_vec());
        }
    }
    None
}

/// Attempts one compaction job. Absence of a mergeable run is not an
/// error; a failed merge leaves the inputs untouched for the next tick.
pub(crate) fn compact(shared: &Shared) -> Result<()> {
    let run = {
        let core = shared.core.read()?;
        match select_run(&core.tables, shared.config.compaction_fanin) {
            Some(run) => run,
            None => return Ok(()),
        }
    };

    let newest = match run.last() {
        Some(newest) => Arc::clone(newest),
        None => return Ok(()),
    };
    let generation = newest.generation;
    let out_path = shared.table_path(generation);

    tracing::info!(
        generation,
        inputs = run.len(),
        "merging contiguous same-tier tables"
    );

    // Newest-first iterators so the merge resolves duplicates in favor of
    // the most recent write.
    let mut sources = Vec::with_capacity(run.len());
    for table in run.iter().rev() {
        sources.push(table.reader.iter()?);
    }

    let mut builder = TableBuilder::new(&out_path)?;
    let mut entries = 0usize;
    for record in MergeIterator::new(sources) {
        let (key, value) = record?;
        builder.add(&key, &value)?;
        entries += 1;
    }
    // The rename inside finish atomically replaces the newest input file.
    builder.finish()?;

    let reader = TableReader::open(&out_path)?;
    let merged = Arc::new(Table { generation, reader });

    // Publication: splice the run out of the list under the exclusive
    // lock.
    let replaced = {
        let mut core = shared.core.write()?;
        let start = core
            .tables
            .iter()
            .position(|table| Arc::ptr_eq(table, &run[0]));
        match start {
            Some(start) => core
                .tables
                .splice(start..start + run.len(), [merged])
                .collect::<Vec<_>>(),
            None => {
                // The list was reset underneath us (purge). The merged
                // file is self-consistent; recovery will pick it up.
                tracing::warn!(generation, "selected run no longer present");
                return Ok(());
            }
        }
    };

    // The newest input's name now holds the merged output; delete only
    // the older files.
    for table in &replaced {
        if table.reader.path() != out_path {
            if let Err(err) = std::fs::remove_file(table.reader.path()) {
                tracing::warn!(
                    path = %table.reader.path().display(),
                    error = %err,
                    "failed to remove compacted table"
                );
            }
        }
    }

    tracing::info!(generation, entries, "compaction complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(tier_of(0), 0);
        assert_eq!(tier_of(10 * MIB - 1), 0);
        assert_eq!(tier_of(10 * MIB), 1);
        assert_eq!(tier_of(50 * MIB), 2);
        assert_eq!(tier_of(250 * MIB), 3);
        assert_eq!(tier_of(1024 * MIB), 4);
        assert_eq!(tier_of(u64::MAX), 4);
    }
}
