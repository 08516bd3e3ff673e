use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::Result;

use super::INDEX_INTERVAL;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Writes a sorted table to a temporary file and atomically renames it
/// into place on [`finish`](TableBuilder::finish).
///
/// Records must be added in ascending key order. Dropping a builder that
/// was not finished removes the temporary file, so a failed build leaves
/// nothing behind under the final name.
pub struct TableBuilder {
    writer: BufWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    index: Vec<(Vec<u8>, u64)>,
    bytes_written: u64,
    last_index_pos: u64,
    finished: bool,
}

impl TableBuilder {
    /// Opens a uniquely-named temporary file next to `final_path`.
    pub fn new(final_path: impl Into<PathBuf>) -> Result<Self> {
        let final_path = final_path.into();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let tmp_path = PathBuf::from(format!("{}.tmp.{}", final_path.display(), nanos));

        let file = File::create(&tmp_path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            tmp_path,
            final_path,
            index: Vec::new(),
            bytes_written: 0,
            last_index_pos: 0,
            finished: false,
        })
    }

    /// Appends a data record. The first record is always indexed; later
    /// records are indexed once `INDEX_INTERVAL` bytes have accumulated
    /// since the last indexed one.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let offset = self.bytes_written;
        if offset == 0 || offset - self.last_index_pos >= INDEX_INTERVAL {
            self.index.push((key.to_vec(), offset));
            self.last_index_pos = offset;
        }

        self.writer.write_u32::<LittleEndian>(key.len() as u32)?;
        self.writer.write_u32::<LittleEndian>(value.len() as u32)?;
        self.writer.write_all(key)?;
        self.writer.write_all(value)?;

        self.bytes_written += 8 + key.len() as u64 + value.len() as u64;
        Ok(())
    }

    /// Writes the sparse index and footer, fsyncs, and renames the file
    /// to its final name.
    pub fn finish(mut self) -> Result<()> {
        let index_offset = self.bytes_written;

        self.writer
            .write_u32::<LittleEndian>(self.index.len() as u32)?;
        for (key, offset) in &self.index {
            self.writer.write_u32::<LittleEndian>(key.len() as u32)?;
            self.writer.write_all(key)?;
            self.writer.write_u64::<LittleEndian>(*offset)?;
        }
        self.writer.write_u64::<LittleEndian>(index_offset)?;

        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        std::fs::rename(&self.tmp_path, &self.final_path)?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.tmp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sstable::TableReader;
    use tempfile::TempDir;

    #[test]
    fn test_build_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_00000001.sst");

        let mut builder = TableBuilder::new(&path).expect("failed to create builder");
        builder.add(b"apple", b"fruit").unwrap();
        builder.add(b"banana", b"fruit").unwrap();
        builder.add(b"cherry", b"fruit").unwrap();
        builder.finish().expect("failed to finish table");

        let reader = TableReader::open(&path).expect("failed to open table");
        assert_eq!(reader.get(b"banana").unwrap(), Some(b"fruit".to_vec()));
        assert_eq!(reader.get(b"durian").unwrap(), None);
    }

    #[test]
    fn test_no_temp_file_survives_abort() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_00000001.sst");

        {
            let mut builder = TableBuilder::new(&path).unwrap();
            builder.add(b"key", b"value").unwrap();
            // Dropped without finish.
        }

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "temp file left behind: {leftovers:?}");
        assert!(!path.exists());
    }

    #[test]
    fn test_index_interval() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_00000001.sst");

        // 100-byte values: one index entry roughly every tenth record.
        let mut builder = TableBuilder::new(&path).unwrap();
        for i in 0..100 {
            let key = format!("key_{i:03}");
            builder.add(key.as_bytes(), &[b'x'; 100]).unwrap();
        }
        let entries = builder.index.len();
        assert!(entries > 1, "expected a sparse index, got {entries} entry");
        assert!(entries < 100, "index should not cover every record");
        builder.finish().unwrap();

        let reader = TableReader::open(&path).unwrap();
        for i in 0..100 {
            let key = format!("key_{i:03}");
            assert_eq!(
                reader.get(key.as_bytes()).unwrap(),
                Some(vec![b'x'; 100]),
                "missing {key}"
            );
        }
    }

    #[test]
    fn test_empty_table() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data_00000001.sst");

        TableBuilder::new(&path).unwrap().finish().unwrap();

        let reader = TableReader::open(&path).unwrap();
        assert_eq!(reader.get(b"anything").unwrap(), None);
        assert!(reader.read_all().unwrap().is_empty());
    }
}
