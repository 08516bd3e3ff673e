//! Startup recovery.
//!
//! The directory is the source of truth: the live WAL holds writes that
//! never reached a table, `wal.log.flushing` (if present) holds the
//! writes of a flush that crashed before publishing, and the
//! `data_<generation>.sst` files are the published tables in generation
//! order. Recovery folds all three back into a consistent engine state.

use super::Table;
use crate::error::Result;
use crate::memtable::Memtable;
use crate::sstable::TableReader;
use crate::wal::Wal;

use std::path::Path;
use std::sync::Arc;

pub(crate) const WAL_FILE: &str = "wal.log";
pub(crate) const FLUSHING_WAL_FILE: &str = "wal.log.flushing";

pub(crate) struct Recovered {
    pub active: Arc<Memtable>,
    pub wal: Arc<Wal>,
    pub tables: Vec<Arc<Table>>,
    pub next_generation: u64,
}

pub(crate) fn recover(dir: &Path) -> Result<Recovered> {
    std::fs::create_dir_all(dir)?;

    let active = Arc::new(Memtable::new());
    let wal = Wal::open(dir.join(WAL_FILE))?;

    // Snapshot the live records before the sweep below appends anything:
    // they are newer than whatever the rotated log holds and must be
    // applied last.
    let live_records = wal.replay()?.collect::<Result<Vec<_>>>()?;

    // A crash between WAL rotation and table publication leaves the
    // rotated log behind. Fold its records into the fresh memtable and
    // re-append them to the live log so they are durable again.
    let flushing_path = dir.join(FLUSHING_WAL_FILE);
    if flushing_path.exists() {
        let flushing = Wal::open(&flushing_path)?;
        let mut recovered = 0usize;
        for record in flushing.replay()? {
            match record {
                Ok((key, value)) => {
                    wal.append(&key, &value)?;
                    active.insert(key, value);
                    recovered += 1;
                }
                Err(err) => {
                    // Keep what replayed; the rest of the log is presumed
                    // torn by the crash that abandoned it.
                    tracing::warn!(error = %err, "partial recovery of abandoned flush log");
                    break;
                }
            }
        }
        drop(flushing);
        std::fs::remove_file(&flushing_path)?;
        tracing::info!(records = recovered, "recovered abandoned flush log");
    }

    for (key, value) in live_records {
        active.insert(key, value);
    }

    let tables = open_tables(dir)?;
    let next_generation = tables.last().map_or(1, |table| table.generation + 1);

    remove_stale_temp_files(dir)?;

    Ok(Recovered {
        active,
        wal: Arc::new(wal),
        tables,
        next_generation,
    })
}

/// `data_<generation>.sst` for a decimal generation tag, or None.
fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix("data_")?
        .strip_suffix(".sst")?
        .parse()
        .ok()
}

/// Opens every published table, sorted ascending by generation.
fn open_tables(dir: &Path) -> Result<Vec<Arc<Table>>> {
    let mut tagged = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(generation) = name.to_str().and_then(parse_generation) {
            tagged.push((generation, entry.path()));
        }
    }
    tagged.sort_by_key(|(generation, _)| *generation);

    let mut tables = Vec::with_capacity(tagged.len());
    for (generation, path) in tagged {
        let reader = TableReader::open(&path)?;
        tables.push(Arc::new(Table { generation, reader }));
    }
    Ok(tables)
}

/// Scratch files from interrupted table builds are never referenced by
/// anything; clear them out.
fn remove_stale_temp_files(dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_temp = name.to_str().is_some_and(|name| name.contains(".tmp."));
        if is_temp {
            if let Err(err) = std::fs::remove_file(entry.path()) {
                tracing::warn!(
                    path = %entry.path().display(),
                    error = %err,
                    "failed to remove stale temp file"
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generation() {
        assert_eq!(parse_generation("data_00000001.sst"), Some(1));
        assert_eq!(parse_generation("data_42.sst"), Some(42));
        assert_eq!(parse_generation("data_.sst"), None);
        assert_eq!(parse_generation("data_00000001.sst.tmp.99"), None);
        assert_eq!(parse_generation("wal.log"), None);
        assert_eq!(parse_generation("other_00000001.sst"), None);
    }
}
