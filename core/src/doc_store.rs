//! Append-only record file addressed by byte offset.
//!
//! One record per line, fields joined by [`DELIMITER`] in the column order of
//! [`RECORD_FIELDS`](crate::index::RECORD_FIELDS). No header.

use crate::error::{Error, Result};
use crate::index::{DocumentRecord, RECORD_FIELDS};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const DELIMITER: char = '|';

pub struct DocumentStore {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl DocumentStore {
    /// Open the store at `path`, creating an empty file if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::storage(&path, e))?;
        Ok(Self { path, append_lock: Mutex::new(()) })
    }

    /// Write `record` at the end of the file and return the offset it starts at.
    pub fn append(&self, record: &DocumentRecord) -> Result<u64> {
        record.check_storable()?;
        let mut line = record.columns().join(&DELIMITER.to_string());
        line.push('\n');

        let _guard = self.append_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::storage(&self.path, e))?;
        let offset = file.seek(SeekFrom::End(0)).map_err(|e| Error::storage(&self.path, e))?;
        file.write_all(line.as_bytes()).map_err(|e| Error::storage(&self.path, e))?;
        file.sync_data().map_err(|e| Error::storage(&self.path, e))?;
        Ok(offset)
    }

    pub fn read_at(&self, byte_offset: u64) -> Result<DocumentRecord> {
        let file = File::open(&self.path).map_err(|e| Error::storage(&self.path, e))?;
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(byte_offset)).map_err(|e| Error::storage(&self.path, e))?;
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(|e| Error::storage(&self.path, e))?;
        if n == 0 {
            return Err(Error::corrupt(&self.path, format!("no record at offset {byte_offset}")));
        }
        let line = line.trim_end_matches(['\n', '\r']);
        let columns: Vec<String> = line.split(DELIMITER).map(str::to_string).collect();
        if columns.len() != RECORD_FIELDS.len() {
            return Err(Error::corrupt(
                &self.path,
                format!("record at offset {byte_offset} has {} fields, expected {}", columns.len(), RECORD_FIELDS.len()),
            ));
        }
        DocumentRecord::from_columns(columns)
    }

    /// Number of stored records, used to derive the next document id.
    pub fn count_records(&self) -> Result<u32> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::storage(&self.path, e)),
        };
        let mut reader = BufReader::new(file);
        let mut buf = [0u8; 64 * 1024];
        let mut count = 0u32;
        loop {
            let n = reader.read(&mut buf).map_err(|e| Error::storage(&self.path, e))?;
            if n == 0 {
                break;
            }
            count += buf[..n].iter().filter(|&&b| b == b'\n').count() as u32;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str) -> DocumentRecord {
        DocumentRecord {
            title: title.to_string(),
            abstract_text: "An abstract about graphs.".into(),
            year: "2019".into(),
            keywords: "graph,theory".into(),
            n_citation: "12".into(),
            url: "http://example.org/paper".into(),
        }
    }

    #[test]
    fn offsets_address_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.psv");
        let store = DocumentStore::open(&path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);

        let first = store.append(&record("First")).unwrap();
        let second = store.append(&record("Second")).unwrap();
        assert_eq!(first, 0);
        assert!(second > first);
        let first_line_len = record("First").columns().join("|").len() as u64 + 1;
        assert_eq!(second, first_line_len);

        assert_eq!(store.read_at(second).unwrap(), record("Second"));
        assert_eq!(store.read_at(first).unwrap(), record("First"));
        assert_eq!(store.count_records().unwrap(), 2);
    }

    #[test]
    fn append_rejects_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.psv");
        let store = DocumentStore::open(&path).unwrap();
        assert!(matches!(store.append(&record("a|b")), Err(Error::Validation(_))));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn reading_past_end_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path().join("documents.psv")).unwrap();
        store.append(&record("Only")).unwrap();
        let err = store.read_at(10_000).unwrap_err();
        assert!(err.is_storage_fault());
    }

    #[test]
    fn short_row_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("documents.psv");
        std::fs::write(&path, "title|abstract|2020\n").unwrap();
        let store = DocumentStore::open(&path).unwrap();
        assert!(matches!(store.read_at(0), Err(Error::Corrupt { .. })));
    }
}
