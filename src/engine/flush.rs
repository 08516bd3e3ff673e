//! Memtable flush: rotation, table build, publication, WAL reclaim.
//!
//! Rotation happens under the exclusive lock and is pure metadata: the
//! active memtable moves to the immutable slot and the live WAL is
//! renamed aside and replaced. The expensive part, streaming the
//! immutable memtable into a new table, runs with no lock held, so
//! writes and reads continue against the fresh memtable and WAL.
//!
//! The rotated WAL is deleted only after the new table has been fsynced,
//! renamed into place, and installed in the reader list. A crash anywhere
//! before that leaves `wal.log.flushing` on disk, and recovery replays it.

use super::{Shared, Table};
use crate::error::Result;
use crate::memtable::Memtable;
use crate::sstable::{TableBuilder, TableReader};
use crate::wal::Wal;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::recovery::{FLUSHING_WAL_FILE, WAL_FILE};

/// Runs one flush. Returns immediately if another flush is in progress or
/// there is nothing to write.
pub(crate) fn flush(shared: &Shared) -> Result<()> {
    if shared.flush_in_progress.swap(true, Ordering::SeqCst) {
        // Redundant signal; the running flush observes the current state.
        return Ok(());
    }
    let _guard = FlushGuard { shared };

    // Rotation under the exclusive lock. If a previous flush failed after
    // rotating, the immutable slot is still occupied and its WAL is
    // already aside; retry the build from that state instead of rotating
    // again.
    let memtable = {
        let mut core = shared.core.write()?;
        match &core.immutable {
            Some(memtable) => Arc::clone(memtable),
            None => {
                if core.active.is_empty() {
                    return Ok(());
                }
                rotate(shared, &mut core)?
            }
        }
    };

    // Build and publish without the lock.
    let generation = shared.next_generation.fetch_add(1, Ordering::SeqCst);
    let path = shared.table_path(generation);

    let mut builder = TableBuilder::new(&path)?;
    for (key, value) in memtable.iter() {
        builder.add(&key, &value)?;
    }
    builder.finish()?;

    let reader = TableReader::open(&path)?;

    {
        let mut core = shared.core.write()?;
        core.tables.push(Arc::new(Table { generation, reader }));
        core.immutable = None;
    }

    // The rotated log's records are now durable in the table.
    let flushing = shared.config.dir.join(FLUSHING_WAL_FILE);
    if let Err(err) = std::fs::remove_file(&flushing) {
        tracing::warn!(error = %err, "failed to remove flushed wal");
    }

    tracing::info!(generation, entries = memtable.len(), "flushed memtable");
    Ok(())
}

/// Moves the active memtable into the immutable slot and swaps in a fresh
/// WAL. `wal.log` becomes `wal.log.flushing` until the table is published.
/// Returns the memtable now held by the immutable slot.
fn rotate(shared: &Shared, core: &mut super::Core) -> Result<Arc<Memtable>> {
    let live = shared.config.dir.join(WAL_FILE);
    let flushing = shared.config.dir.join(FLUSHING_WAL_FILE);

    std::fs::rename(&live, &flushing)?;
    let new_wal = match Wal::open(&live) {
        Ok(wal) => wal,
        Err(err) => {
            // Put the log back so nothing rotated; the flush fails whole.
            let _ = std::fs::rename(&flushing, &live);
            return Err(err);
        }
    };

    core.wal = Arc::new(new_wal);
    let rotated = std::mem::replace(&mut core.active, Arc::new(Memtable::new()));
    core.immutable = Some(Arc::clone(&rotated));
    Ok(rotated)
}

/// Clears the in-progress flag even when the flush errors out, so the
/// next signal can retry. The immutable memtable and the flushing WAL are
/// left in place for that retry.
struct FlushGuard<'a> {
    shared: &'a Shared,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.shared
            .flush_in_progress
            .store(false, Ordering::SeqCst);
    }
}
