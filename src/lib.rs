//! tephra is an embedded, single-node, ordered key-value storage engine
//! built on the log-structured merge-tree pattern.
//!
//! Writes are committed to a write-ahead log, buffered in an in-memory
//! sorted table, and periodically materialized as immutable sorted-table
//! files that a background worker merges to bound read amplification.
//!
//! ```no_run
//! use tephra::Engine;
//!
//! # #[tokio::main]
//! # async fn main() -> tephra::Result<()> {
//! let db = Engine::open("./data")?;
//! db.put(b"key", b"value")?;
//! assert_eq!(db.get(b"key")?, Some(b"value".to_vec()));
//! db.delete(b"key")?;
//! db.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod memtable;
pub mod scheduler;
pub mod sstable;
pub mod wal;

pub use config::Config;
pub use engine::{Engine, Metrics};
pub use error::{Error, Result};
