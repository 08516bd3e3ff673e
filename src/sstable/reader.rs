use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{Error, Result};

use super::FOOTER_SIZE;

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Read handle over a published sorted table.
///
/// The footer and sparse index are loaded into memory at open; lookups
/// binary-search the index and scan forward through at most one index
/// interval of records. Operations serialize on the internal file lock
/// because they seek a shared handle.
#[derive(Debug)]
pub struct TableReader {
    file: Mutex<File>,
    index: Vec<(Vec<u8>, u64)>,
    index_offset: u64,
    size: u64,
    path: PathBuf,
}

impl TableReader {
    /// Opens a table and loads its sparse index. A file shorter than the
    /// footer is accepted and treated as empty; a structurally invalid
    /// footer or index refuses to open with `Error::Corruption`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)?;
        let size = file.metadata()?.len();

        if size < FOOTER_SIZE {
            return Ok(Self {
                file: Mutex::new(file),
                index: Vec::new(),
                index_offset: 0,
                size,
                path,
            });
        }

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let index_offset = file.read_u64::<LittleEndian>()?;
        if index_offset > size - FOOTER_SIZE {
            return Err(Error::Corruption(format!(
                "table footer points past end of file: {index_offset} > {}",
                size - FOOTER_SIZE
            )));
        }

        // The index block spans from the footer's offset to the footer,
        // so its length is known before a single entry is parsed.
        let mut index_data = vec![0u8; (size - FOOTER_SIZE - index_offset) as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut index_data)?;
        let index = Self::parse_index(&index_data)?;

        Ok(Self {
            file: Mutex::new(file),
            index,
            index_offset,
            size,
            path,
        })
    }

    fn parse_index(data: &[u8]) -> Result<Vec<(Vec<u8>, u64)>> {
        let corrupt =
            |_: std::io::Error| -> Error { Error::Corruption("truncated table index".to_string()) };

        let mut cursor = std::io::Cursor::new(data);
        let count = cursor.read_u32::<LittleEndian>().map_err(corrupt)?;

        let mut index = Vec::new();
        for _ in 0..count {
            let key_len = cursor.read_u32::<LittleEndian>().map_err(corrupt)? as usize;
            if key_len > data.len() - cursor.position() as usize {
                return Err(Error::Corruption(
                    "index entry key overruns index block".to_string(),
                ));
            }
            let mut key = vec![0u8; key_len];
            cursor.read_exact(&mut key).map_err(corrupt)?;
            let offset = cursor.read_u64::<LittleEndian>().map_err(corrupt)?;
            index.push((key, offset));
        }
        Ok(index)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File size at open time, used by the compaction tier selector.
    pub fn size_bytes(&self) -> u64 {
        self.size
    }

    /// Offset of the record block the index says may hold `key`: the
    /// greatest indexed key that is <= `key`, or the start of the file.
    fn seek_hint(&self, key: &[u8]) -> u64 {
        let n = self.index.partition_point(|(k, _)| k.as_slice() <= key);
        if n == 0 {
            0
        } else {
            self.index[n - 1].1
        }
    }

    /// Point lookup. Returns the stored value (which is empty for a
    /// tombstone) or `None` if the key is not in this table.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let start = self.seek_hint(key);

        let mut file = self.file.lock()?;
        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(&mut *file);

        let mut pos = start;
        while pos < self.index_offset {
            let key_len = match reader.read_u32::<LittleEndian>() {
                Ok(len) => len as usize,
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(err) => return Err(err.into()),
            };
            let val_len = reader.read_u32::<LittleEndian>()? as usize;

            let mut record_key = vec![0u8; key_len];
            reader.read_exact(&mut record_key)?;

            match record_key.as_slice().cmp(key) {
                std::cmp::Ordering::Equal => {
                    let mut value = vec![0u8; val_len];
                    reader.read_exact(&mut value)?;
                    return Ok(Some(value));
                }
                // Records are sorted: the key cannot appear later.
                std::cmp::Ordering::Greater => return Ok(None),
                std::cmp::Ordering::Less => {
                    reader.seek_relative(val_len as i64)?;
                    pos += 8 + key_len as u64 + val_len as u64;
                }
            }
        }
        Ok(None)
    }

    /// Full ordered scan of the data block.
    pub fn read_all(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut file = self.file.lock()?;
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&mut *file);

        let mut records = Vec::new();
        let mut pos = 0u64;
        while pos < self.index_offset {
            let (key, value) = read_record(&mut reader)?;
            pos += 8 + key.len() as u64 + value.len() as u64;
            records.push((key, value));
        }
        Ok(records)
    }

    /// Streaming iterator with its own file handle, so a long merge does
    /// not hold the lookup lock.
    pub fn iter(&self) -> Result<TableIter> {
        let file = File::open(&self.path)?;
        Ok(TableIter {
            reader: BufReader::new(file),
            pos: 0,
            index_offset: self.index_offset,
        })
    }
}

fn read_record(reader: &mut impl Read) -> Result<(Vec<u8>, Vec<u8>)> {
    let truncated = |err: std::io::Error| -> Error {
        if err.kind() == ErrorKind::UnexpectedEof {
            Error::Corruption("truncated table data block".to_string())
        } else {
            Error::Io(err)
        }
    };

    let key_len = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let val_len = reader.read_u32::<LittleEndian>().map_err(truncated)? as usize;
    let mut key = vec![0u8; key_len];
    reader.read_exact(&mut key).map_err(truncated)?;
    let mut value = vec![0u8; val_len];
    reader.read_exact(&mut value).map_err(truncated)?;
    Ok((key, value))
}

/// Sequential cursor over a table's data block.
pub struct TableIter {
    reader: BufReader<File>,
    pos: u64,
    index_offset: u64,
}

impl Iterator for TableIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.index_offset {
            return None;
        }
        match read_record(&mut self.reader) {
            Ok((key, value)) => {
                self.pos += 8 + key.len() as u64 + value.len() as u64;
                Some(Ok((key, value)))
            }
            Err(err) => {
                self.pos = self.index_offset;
                Some(Err(err))
            }
        }
    }
}
