//! Write-ahead log.
//!
//! Every mutation is appended here and fsynced before the engine touches
//! any in-memory state, so an acknowledged write survives a crash. The log
//! is replayed at startup and discarded once its contents are durable in a
//! sorted table.
//!
//! # Record format
//!
//! Each record is variable-length, all integers little-endian:
//!
//! ```text
//! +---------+-------------+-------------+-----------+-----+-------+
//! | seq:u64 | key_len:u32 | val_len:u32 | crc32:u32 | key | value |
//! +---------+-------------+-------------+-----------+-----+-------+
//! ```
//!
//! - `seq` is monotonic per log file, starting at 1.
//! - `val_len == 0` encodes a tombstone; no value bytes follow.
//! - `crc32` is CRC-32 (IEEE polynomial) over key then value.
//!
//! A crash can tear the last record. Replay treats a short read or a
//! checksum mismatch as the end of good data and stops without error: only
//! records whose append returned success are guaranteed durable.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::error::Result;

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// CRC-32/ISO-HDLC is the IEEE 802.3 polynomial (0xEDB88320 reflected).
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug)]
pub struct Wal {
    file: File,
    writer: Mutex<BufWriter<File>>,
    seq: AtomicU64,
    path: PathBuf,
}

impl Wal {
    /// Opens (creating if absent) a log file for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::options()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let writer = BufWriter::new(file.try_clone()?);

        Ok(Self {
            file,
            writer: Mutex::new(writer),
            seq: AtomicU64::new(0),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest sequence number appended or observed during replay.
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Appends a record and synchronizes it to stable storage. The record
    /// is durable once this returns; on error it may or may not be on
    /// disk, and replay will discard a torn tail.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock()?;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut digest = CRC32.digest();
        digest.update(key);
        digest.update(value);

        writer.write_u64::<LittleEndian>(seq)?;
        writer.write_u32::<LittleEndian>(key.len() as u32)?;
        writer.write_u32::<LittleEndian>(value.len() as u32)?;
        writer.write_u32::<LittleEndian>(digest.finalize())?;
        writer.write_all(key)?;
        writer.write_all(value)?;

        writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Replays the log from the start. Records stream back in append
    /// order; observed sequence numbers feed the internal counter so that
    /// later appends stay monotonic.
    pub fn replay(&self) -> Result<Replay<'_>> {
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        Ok(Replay { wal: self, reader })
    }
}

/// Iterator over the records of a log file. Ends cleanly at the first
/// torn or corrupt record; genuine I/O failures surface as errors.
pub struct Replay<'a> {
    wal: &'a Wal,
    reader: BufReader<File>,
}

impl Replay<'_> {
    fn read_record(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let seq = match self.reader.read_u64::<LittleEndian>() {
            Ok(seq) => seq,
            // EOF at a record boundary, or a torn header.
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut header = [0u8; 12];
        if !self.read_or_tear(&mut header)? {
            return Ok(None);
        }
        let key_len = LittleEndian::read_u32(&header[0..4]) as usize;
        let val_len = LittleEndian::read_u32(&header[4..8]) as usize;
        let stored_crc = LittleEndian::read_u32(&header[8..12]);

        let mut key = vec![0u8; key_len];
        if !self.read_or_tear(&mut key)? {
            return Ok(None);
        }
        let mut value = vec![0u8; val_len];
        if !self.read_or_tear(&mut value)? {
            return Ok(None);
        }

        let mut digest = CRC32.digest();
        digest.update(&key);
        digest.update(&value);
        if digest.finalize() != stored_crc {
            return Ok(None);
        }

        self.wal.seq.fetch_max(seq, Ordering::SeqCst);
        Ok(Some((key, value)))
    }

    /// Fills `buf`, returning false on a torn (short) read.
    fn read_or_tear(&mut self, buf: &mut [u8]) -> Result<bool> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

impl Iterator for Replay<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_wal(dir: &TempDir) -> Wal {
        Wal::open(dir.path().join("wal.log")).expect("failed to open wal")
    }

    fn collect(wal: &Wal) -> Vec<(Vec<u8>, Vec<u8>)> {
        wal.replay()
            .expect("failed to start replay")
            .collect::<Result<Vec<_>>>()
            .expect("replay failed")
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);

        wal.append(b"key1", b"value1").expect("append failed");
        wal.append(b"key2", b"value2").expect("append failed");
        wal.append(b"key3", b"").expect("append failed");

        let records = collect(&wal);
        assert_eq!(
            records,
            vec![
                (b"key1".to_vec(), b"value1".to_vec()),
                (b"key2".to_vec(), b"value2".to_vec()),
                (b"key3".to_vec(), Vec::new()),
            ]
        );
    }

    #[test]
    fn test_empty_replay() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);
        assert!(collect(&wal).is_empty());
    }

    #[test]
    fn test_sequence_continues_after_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let wal = Wal::open(&path).unwrap();
            wal.append(b"key1", b"value1").unwrap();
            wal.append(b"key2", b"value2").unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.seq(), 0);

        let records = collect(&wal);
        assert_eq!(records.len(), 2);
        assert_eq!(wal.seq(), 2);

        // New appends continue past the replayed maximum.
        wal.append(b"key3", b"value3").unwrap();
        assert_eq!(wal.seq(), 3);
        assert_eq!(collect(&wal).len(), 3);
    }

    #[test]
    fn test_torn_tail_is_dropped_silently() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        let wal = Wal::open(&path).unwrap();
        wal.append(b"key1", b"value1").unwrap();
        wal.append(b"key2", b"value2").unwrap();
        drop(wal);

        // Zero the last 3 bytes, as a crash mid-write would.
        let len = std::fs::metadata(&path).unwrap().len();
        let mut file = File::options().write(true).open(&path).unwrap();
        file.seek(SeekFrom::Start(len - 3)).unwrap();
        file.write_all(&[0, 0, 0]).unwrap();
        drop(file);

        let wal = Wal::open(&path).unwrap();
        let records = collect(&wal);
        assert_eq!(records, vec![(b"key1".to_vec(), b"value1".to_vec())]);
    }

    #[test]
    fn test_truncated_header_ends_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        let wal = Wal::open(&path).unwrap();
        wal.append(b"key1", b"value1").unwrap();
        drop(wal);

        // Leave a dangling partial header behind the good record.
        let mut file = File::options().append(true).open(&path).unwrap();
        file.write_all(&[7, 0, 0, 0, 0]).unwrap();
        drop(file);

        let wal = Wal::open(&path).unwrap();
        let records = collect(&wal);
        assert_eq!(records, vec![(b"key1".to_vec(), b"value1".to_vec())]);
    }
}
