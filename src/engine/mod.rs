//! The storage engine coordinator.
//!
//! An [`Engine`] owns one active memtable, at most one immutable memtable
//! awaiting flush, the live write-ahead log, and the ordered list of
//! sorted-table readers. Writes append to the WAL (fsynced) before they
//! touch the memtable, and reads walk the strata newest to oldest. Two
//! background workers keep the structure bounded: one turns full
//! memtables into tables, the other merges tables back down.
//!
//! # Locking
//!
//! One read-write lock guards the mutable core (memtable pointers, the
//! immutable slot, the WAL handle, the table list). Writes and reads take
//! it shared (the WAL and the memtable are internally synchronized), so
//! they only exclude the rotation and publication steps of flush and
//! compaction, which take it exclusively and do no I/O while holding it.

pub mod compaction;
pub mod flush;
pub mod recovery;
pub mod tasks;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::memtable::Memtable;
use crate::scheduler::Scheduler;
use crate::sstable::TableReader;
use crate::wal::Wal;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

/// A published sorted table together with its position in engine history.
pub(crate) struct Table {
    pub generation: u64,
    pub reader: TableReader,
}

/// The lock-guarded mutable core of the engine.
pub(crate) struct Core {
    pub active: Arc<Memtable>,
    pub immutable: Option<Arc<Memtable>>,
    pub wal: Arc<Wal>,
    /// Generation order: later positions supersede earlier ones.
    pub tables: Vec<Arc<Table>>,
}

/// State shared between the engine handle and its background workers.
pub(crate) struct Shared {
    pub config: Config,
    pub core: RwLock<Core>,
    pub closed: AtomicBool,
    pub flush_in_progress: AtomicBool,
    pub next_generation: AtomicU64,
    flush_tx: RwLock<mpsc::Sender<()>>,
}

impl Shared {
    pub fn table_path(&self, generation: u64) -> PathBuf {
        self.config.dir.join(format!("data_{generation:08}.sst"))
    }

    /// Posts a non-blocking flush wake-up. The channel has capacity 1, so
    /// a signal that finds one already pending is absorbed by it.
    pub fn signal_flush(&self) {
        if let Ok(tx) = self.flush_tx.read() {
            let _ = tx.try_send(());
        }
    }

    fn write(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        let needs_flush = {
            let core = self.core.read()?;
            // WAL first: the record is durable before the memtable (and
            // therefore any reader) can observe it.
            core.wal.append(key, value)?;
            core.active.insert(key.to_vec(), value.to_vec());
            core.active.size_bytes() >= self.config.memtable_threshold
        };

        if needs_flush {
            self.signal_flush();
        }
        Ok(())
    }
}

/// Point-in-time view of the engine's strata, for inspection.
#[derive(Debug, Clone)]
pub struct Metrics {
    pub active_size_bytes: usize,
    pub active_entries: usize,
    pub immutable_entries: Option<usize>,
    pub table_generations: Vec<u64>,
}

/// Embedded ordered key-value store.
///
/// Values are opaque bytes; an empty value is a tombstone, so
/// [`delete`](Engine::delete) is a put of the empty value and a `get` that
/// finds one reports the key as absent.
///
/// Must be opened inside a Tokio runtime: the flush and compaction
/// workers are spawned onto it. Call [`close`](Engine::close) before
/// dropping to flush buffered writes and join the workers; anything not
/// flushed is still recovered from the WAL at the next open.
pub struct Engine {
    shared: Arc<Shared>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl Engine {
    /// Opens (creating if needed) an engine over the given directory with
    /// default configuration.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_config(Config::new(dir))
    }

    /// Opens an engine with custom configuration, recovering any state
    /// the directory holds: an abandoned flush log, the live WAL, and all
    /// published tables.
    pub fn open_with_config(config: Config) -> Result<Self> {
        let recovered = recovery::recover(&config.dir)?;

        let (flush_tx, flush_rx) = mpsc::channel(1);
        let shared = Arc::new(Shared {
            config,
            core: RwLock::new(Core {
                active: recovered.active,
                immutable: None,
                wal: recovered.wal,
                tables: recovered.tables,
            }),
            closed: AtomicBool::new(false),
            flush_in_progress: AtomicBool::new(false),
            next_generation: AtomicU64::new(recovered.next_generation),
            flush_tx: RwLock::new(flush_tx),
        });

        let scheduler = tasks::start_workers(&shared, flush_rx);
        Ok(Self {
            shared,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Stores a key-value pair. Returns once the record is on stable
    /// storage in the WAL.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.shared.write(key, value)
    }

    /// Marks a key as deleted by storing a tombstone.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.shared.write(key, &[])
    }

    /// Looks up a key: active memtable, then the immutable memtable, then
    /// tables newest to oldest. The first stratum holding the key decides
    /// the answer; a tombstone there hides any older value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let core = self.shared.core.read()?;

        if let Some(value) = core.active.get(key) {
            return Ok(live_value(value));
        }
        if let Some(immutable) = &core.immutable {
            if let Some(value) = immutable.get(key) {
                return Ok(live_value(value));
            }
        }
        for table in core.tables.iter().rev() {
            if let Some(value) = table.reader.get(key)? {
                return Ok(live_value(value));
            }
        }
        Ok(None)
    }

    /// Synchronously converts the current memtable into a table. A flush
    /// already in progress makes this a silent no-op.
    pub fn flush(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        flush::flush(&self.shared)
    }

    /// Marks the engine closed, stops both workers, and runs a final
    /// flush. Further mutations fail with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // With the workers joined, the final flush cannot be suppressed
        // by an in-flight background one.
        self.stop_workers().await?;
        flush::flush(&self.shared)
    }

    /// Deletes every record and file, then reinitializes the engine in
    /// place, restarting the workers.
    pub async fn purge(&self) -> Result<()> {
        self.stop_workers().await?;

        {
            let mut core = self.shared.core.write()?;
            core.tables.clear();
            core.immutable = None;
            core.active = Arc::new(Memtable::new());

            std::fs::remove_dir_all(&self.shared.config.dir)?;
            std::fs::create_dir_all(&self.shared.config.dir)?;
            core.wal = Arc::new(Wal::open(
                self.shared.config.dir.join(recovery::WAL_FILE),
            )?);
        }

        self.shared.next_generation.store(1, Ordering::SeqCst);
        self.shared.flush_in_progress.store(false, Ordering::SeqCst);
        self.shared.closed.store(false, Ordering::SeqCst);

        let (flush_tx, flush_rx) = mpsc::channel(1);
        *self.shared.flush_tx.write()? = flush_tx;
        *self.scheduler.lock()? = Some(tasks::start_workers(&self.shared, flush_rx));
        Ok(())
    }

    /// Counts and sizes of every stratum.
    pub fn metrics(&self) -> Result<Metrics> {
        let core = self.shared.core.read()?;
        Ok(Metrics {
            active_size_bytes: core.active.size_bytes(),
            active_entries: core.active.len(),
            immutable_entries: core.immutable.as_ref().map(|m| m.len()),
            table_generations: core.tables.iter().map(|t| t.generation).collect(),
        })
    }

    /// Ordered dump of the active memtable.
    pub fn memtable_contents(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let core = self.shared.core.read()?;
        Ok(core.active.iter().collect())
    }

    /// Ordered dump of the immutable memtable, if a flush is pending.
    pub fn immutable_contents(&self) -> Result<Option<Vec<(Vec<u8>, Vec<u8>)>>> {
        let core = self.shared.core.read()?;
        Ok(core.immutable.as_ref().map(|m| m.iter().collect()))
    }

    /// Ordered dump of every table, oldest generation first.
    pub fn table_contents(&self) -> Result<Vec<(PathBuf, Vec<(Vec<u8>, Vec<u8>)>)>> {
        let core = self.shared.core.read()?;
        let mut dumps = Vec::with_capacity(core.tables.len());
        for table in &core.tables {
            dumps.push((table.reader.path().to_path_buf(), table.reader.read_all()?));
        }
        Ok(dumps)
    }

    async fn stop_workers(&self) -> Result<()> {
        let scheduler = self.scheduler.lock()?.take();
        match scheduler {
            Some(scheduler) => scheduler.shutdown().await,
            None => Ok(()),
        }
    }
}

/// A tombstone read from any stratum means the key is absent.
fn live_value(value: Vec<u8>) -> Option<Vec<u8>> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
