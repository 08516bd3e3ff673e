use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the storage engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the WAL and sorted-table files.
    pub dir: PathBuf,

    /// Memtable byte-size estimate at which a background flush is
    /// signaled (default: 4 MiB).
    pub memtable_threshold: usize,

    /// How often the compaction worker looks for a mergeable run
    /// (default: 10s).
    pub compaction_interval: Duration,

    /// Number of contiguous same-tier tables that triggers a merge
    /// (default: 4).
    pub compaction_fanin: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./tephra"),
            memtable_threshold: 4 * 1024 * 1024,
            compaction_interval: Duration::from_secs(10),
            compaction_fanin: 4,
        }
    }
}

impl Config {
    /// Create a config rooted at the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    /// Set the memtable flush threshold in bytes.
    pub fn memtable_threshold(mut self, bytes: usize) -> Self {
        self.memtable_threshold = bytes;
        self
    }

    /// Set the compaction tick interval.
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Set the number of contiguous same-tier tables merged per job.
    pub fn compaction_fanin(mut self, fanin: usize) -> Self {
        self.compaction_fanin = fanin;
        self
    }
}
