//! Barrel-sharded inverted index.
//!
//! Term `id` lives in barrel `id % barrel_count` at row `id / barrel_count`.
//! Row positions are never stored; they hold only because every barrel
//! receives its ids in strictly increasing order with no gaps. Barrel 0 row 0
//! belongs to id 0, which is never assigned, and is kept as an empty row.
//!
//! Each barrel is a tab-separated table with a `WordId\tDocumentDetails`
//! header; the second column is the JSON posting list for that id. Writes go
//! to a temporary file that is renamed over the barrel, under that barrel's
//! write lock. A barrel may lag behind the lexicon when a commit was
//! interrupted; the missing rows are restored as empty ones on the next write.

use crate::error::{Error, Result};
use crate::index::{Posting, TermId};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

const HEADER: &str = "WordId\tDocumentDetails";
const EMPTY_POSTINGS: &str = "[]";

pub fn barrel_of(id: TermId, barrel_count: u32) -> u32 {
    id % barrel_count
}

pub fn row_of(id: TermId, barrel_count: u32) -> usize {
    (id / barrel_count) as usize
}

/// A barrel row with its posting list still serialized.
type RawRow = (TermId, String);

pub struct BarrelStore {
    dir: PathBuf,
    barrel_count: u32,
    locks: Vec<RwLock<()>>,
}

impl BarrelStore {
    /// Attach to barrels already on disk. Files are opened lazily.
    pub fn open<P: AsRef<Path>>(dir: P, barrel_count: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if barrel_count == 0 {
            return Err(Error::Config("barrel_count must be positive".into()));
        }
        if !dir.is_dir() {
            return Err(Error::storage(&dir, std::io::Error::new(ErrorKind::NotFound, "barrel directory missing")));
        }
        let locks = (0..barrel_count).map(|_| RwLock::new(())).collect();
        Ok(Self { dir, barrel_count, locks })
    }

    /// Create `barrel_count` empty barrels, replacing any existing ones.
    pub fn create<P: AsRef<Path>>(dir: P, barrel_count: u32) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| Error::storage(dir, e))?;
        let store = Self::open(dir, barrel_count)?;
        store.write_all(&BTreeMap::new(), 0)?;
        Ok(store)
    }

    pub fn barrel_count(&self) -> u32 { self.barrel_count }

    pub fn barrel_path(&self, barrel: u32) -> PathBuf {
        self.dir.join(format!("barrel_{barrel}.tsv"))
    }

    fn tmp_path(&self, barrel: u32) -> PathBuf {
        self.dir.join(format!("barrel_{barrel}.tsv.tmp"))
    }

    pub fn barrel_of(&self, id: TermId) -> u32 { barrel_of(id, self.barrel_count) }

    pub fn row_of(&self, id: TermId) -> usize { row_of(id, self.barrel_count) }

    /// Postings of `id`, or empty when its barrel has no row for it yet.
    pub fn read_postings(&self, id: TermId) -> Result<Vec<Posting>> {
        let barrel = self.barrel_of(id);
        let row = self.row_of(id);
        let path = self.barrel_path(barrel);
        let _guard = self.locks[barrel as usize].read();

        let file = File::open(&path).map_err(|e| Error::storage(&path, e))?;
        let mut lines = BufReader::new(file).lines();
        check_header(&path, lines.next())?;
        let Some(line) = lines.nth(row) else {
            tracing::debug!(id, barrel, row, "term has no barrel row");
            return Ok(Vec::new());
        };
        let line = line.map_err(|e| Error::storage(&path, e))?;
        let (word_id, payload) = parse_row(&path, &line, row + 2)?;
        if word_id != id {
            return Err(Error::corrupt(&path, format!("row {row} holds id {word_id}, expected {id}")));
        }
        decode_postings(&path, payload)
    }

    pub fn append(&self, id: TermId, posting: Posting) -> Result<()> {
        self.append_batch(vec![(id, posting)])
    }

    /// Add postings to their terms' rows, creating rows for ids new to a barrel.
    pub fn append_batch(&self, items: Vec<(TermId, Posting)>) -> Result<()> {
        self.stage_batch(items, 0)?.commit()
    }

    /// Write every touched barrel to a temporary file and hold its write lock.
    ///
    /// Nothing visible changes until [`StagedBatch::commit`]. Rows missing for
    /// ids up to `known_max` are restored as empty rows; any other gap is
    /// corruption.
    pub fn stage_batch(&self, items: Vec<(TermId, Posting)>, known_max: TermId) -> Result<StagedBatch<'_>> {
        let mut by_barrel: BTreeMap<u32, Vec<(TermId, Posting)>> = BTreeMap::new();
        for (id, posting) in items {
            by_barrel.entry(self.barrel_of(id)).or_default().push((id, posting));
        }
        // Ascending barrel order keeps concurrent batches from deadlocking.
        let guards: Vec<RwLockWriteGuard<'_, ()>> =
            by_barrel.keys().map(|b| self.locks[*b as usize].write()).collect();

        let mut batch = StagedBatch { store: self, barrels: Vec::with_capacity(by_barrel.len()), _guards: guards };
        for (barrel, mut items) in by_barrel {
            items.sort_by_key(|(id, _)| *id);
            batch.barrels.push(barrel);
            self.stage_barrel(barrel, items, known_max)?;
        }
        Ok(batch)
    }

    fn stage_barrel(&self, barrel: u32, items: Vec<(TermId, Posting)>, known_max: TermId) -> Result<()> {
        let path = self.barrel_path(barrel);
        let mut rows = self.load_rows(barrel)?;
        for (id, posting) in items {
            let row = self.row_of(id);
            while rows.len() < row {
                let missing = rows.len() as u64 * self.barrel_count as u64 + barrel as u64;
                if missing > known_max as u64 {
                    return Err(Error::corrupt(
                        &path,
                        format!("id {id} belongs at row {row} but the barrel has only {} rows", rows.len()),
                    ));
                }
                tracing::warn!(barrel, id = missing, "restoring missing row");
                rows.push((missing as TermId, EMPTY_POSTINGS.to_string()));
            }
            if row < rows.len() {
                let (word_id, payload) = &mut rows[row];
                if *word_id != id {
                    return Err(Error::corrupt(&path, format!("row {row} holds id {word_id}, expected {id}")));
                }
                let mut postings = decode_postings(&path, payload)?;
                postings.push(posting);
                *payload = encode_postings(&path, &postings)?;
            } else {
                rows.push((id, encode_postings(&path, std::slice::from_ref(&posting))?));
            }
        }
        write_rows(&self.tmp_path(barrel), &rows)
    }

    fn load_rows(&self, barrel: u32) -> Result<Vec<RawRow>> {
        let path = self.barrel_path(barrel);
        let file = File::open(&path).map_err(|e| Error::storage(&path, e))?;
        let mut lines = BufReader::new(file).lines();
        check_header(&path, lines.next())?;
        let mut rows = Vec::new();
        for (row, line) in lines.enumerate() {
            let line = line.map_err(|e| Error::storage(&path, e))?;
            let (word_id, payload) = parse_row(&path, &line, row + 2)?;
            let expected = row as u64 * self.barrel_count as u64 + barrel as u64;
            if word_id as u64 != expected {
                return Err(Error::corrupt(&path, format!("row {row} holds id {word_id}, expected {expected}")));
            }
            rows.push((word_id, payload.to_string()));
        }
        Ok(rows)
    }

    /// Write every barrel from scratch with dense rows for ids `0..=max_id`.
    ///
    /// Ids without postings get an empty list so later rows stay addressable.
    pub fn write_all(&self, postings: &BTreeMap<TermId, Vec<Posting>>, max_id: TermId) -> Result<()> {
        let _guards: Vec<RwLockWriteGuard<'_, ()>> = self.locks.iter().map(|l| l.write()).collect();
        for barrel in 0..self.barrel_count {
            let path = self.barrel_path(barrel);
            let mut rows: Vec<RawRow> = Vec::new();
            let mut id = barrel;
            while id <= max_id {
                let payload = match postings.get(&id) {
                    Some(list) => encode_postings(&path, list)?,
                    None => EMPTY_POSTINGS.to_string(),
                };
                rows.push((id, payload));
                id = match id.checked_add(self.barrel_count) {
                    Some(next) => next,
                    None => break,
                };
            }
            let tmp = self.tmp_path(barrel);
            write_rows(&tmp, &rows)?;
            fs::rename(&tmp, &path).map_err(|e| Error::storage(&path, e))?;
        }
        tracing::info!(barrels = self.barrel_count, max_id, terms = postings.len(), "barrels written");
        Ok(())
    }

    /// Number of rows per barrel.
    pub fn row_counts(&self) -> Result<Vec<usize>> {
        (0..self.barrel_count)
            .map(|b| {
                let _guard = self.locks[b as usize].read();
                self.load_rows(b).map(|rows| rows.len())
            })
            .collect()
    }
}

/// Barrels rewritten to temporary files, waiting to be renamed into place.
///
/// Holds the write lock of every touched barrel. Dropping it without
/// committing removes the temporary files.
pub struct StagedBatch<'a> {
    store: &'a BarrelStore,
    barrels: Vec<u32>,
    _guards: Vec<RwLockWriteGuard<'a, ()>>,
}

impl StagedBatch<'_> {
    pub fn barrels(&self) -> &[u32] { &self.barrels }

    /// Rename every staged barrel over its live file, in ascending order.
    ///
    /// A failed rename leaves the earlier barrels committed and the rest untouched.
    pub fn commit(mut self) -> Result<()> {
        let barrels = std::mem::take(&mut self.barrels);
        for (i, &barrel) in barrels.iter().enumerate() {
            let path = self.store.barrel_path(barrel);
            if let Err(e) = fs::rename(self.store.tmp_path(barrel), &path) {
                self.barrels = barrels[i..].to_vec();
                return Err(Error::storage(&path, e));
            }
            tracing::debug!(barrel, "barrel committed");
        }
        Ok(())
    }
}

impl Drop for StagedBatch<'_> {
    fn drop(&mut self) {
        for &barrel in &self.barrels {
            let _ = fs::remove_file(self.store.tmp_path(barrel));
        }
    }
}

fn check_header(path: &Path, line: Option<std::io::Result<String>>) -> Result<()> {
    match line {
        Some(Ok(header)) if header.trim_end() == HEADER => Ok(()),
        Some(Ok(other)) => Err(Error::corrupt(path, format!("unexpected header `{other}`"))),
        Some(Err(e)) => Err(Error::storage(path, e)),
        None => Err(Error::corrupt(path, "missing header")),
    }
}

fn parse_row<'a>(path: &Path, line: &'a str, line_no: usize) -> Result<(TermId, &'a str)> {
    let (id, payload) = line
        .split_once('\t')
        .ok_or_else(|| Error::corrupt(path, format!("line {line_no}: expected two columns")))?;
    let id = id
        .parse()
        .map_err(|_| Error::corrupt(path, format!("line {line_no}: bad word id `{id}`")))?;
    Ok((id, payload.trim_end_matches('\r')))
}

fn decode_postings(path: &Path, payload: &str) -> Result<Vec<Posting>> {
    serde_json::from_str(payload).map_err(|e| Error::corrupt(path, format!("malformed posting list: {e}")))
}

fn encode_postings(path: &Path, postings: &[Posting]) -> Result<String> {
    serde_json::to_string(postings).map_err(|e| Error::corrupt(path, e.to_string()))
}

fn write_rows(path: &Path, rows: &[RawRow]) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::storage(path, e))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{HEADER}").map_err(|e| Error::storage(path, e))?;
    for (id, payload) in rows {
        writeln!(out, "{id}\t{payload}").map_err(|e| Error::storage(path, e))?;
    }
    out.flush().map_err(|e| Error::storage(path, e))?;
    out.get_ref().sync_data().map_err(|e| Error::storage(path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(doc_id: u32) -> Posting {
        Posting { doc_id, byte_offset: doc_id as u64 * 100, length: [1, 4, 2], frequency: [1, 0, 0], positions: vec![] }
    }

    #[test]
    fn addressing_is_arithmetic() {
        assert_eq!(barrel_of(1, 120), 1);
        assert_eq!(row_of(1, 120), 0);
        assert_eq!(barrel_of(120, 120), 0);
        assert_eq!(row_of(120, 120), 1);
        assert_eq!(barrel_of(245, 120), 5);
        assert_eq!(row_of(245, 120), 2);
    }

    #[test]
    fn fresh_barrels_reserve_id_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 4).unwrap();
        assert_eq!(store.row_counts().unwrap(), vec![1, 0, 0, 0]);
        let text = fs::read_to_string(store.barrel_path(0)).unwrap();
        assert_eq!(text, "WordId\tDocumentDetails\n0\t[]\n");
        assert!(store.read_postings(0).unwrap().is_empty());
        assert!(store.read_postings(3).unwrap().is_empty());
    }

    #[test]
    fn every_id_resolves_to_its_own_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 3).unwrap();
        for id in 1..=20u32 {
            store.append(id, posting(id)).unwrap();
        }
        // Second posting for a handful of existing terms.
        for id in [2u32, 9, 20] {
            store.append(id, posting(100 + id)).unwrap();
        }
        for id in 1..=20u32 {
            let postings = store.read_postings(id).unwrap();
            assert_eq!(postings[0], posting(id), "id {id}");
            if [2, 9, 20].contains(&id) {
                assert_eq!(postings.len(), 2);
                assert_eq!(postings[1].doc_id, 100 + id);
            } else {
                assert_eq!(postings.len(), 1);
            }
        }
        assert_eq!(store.row_counts().unwrap(), vec![7, 7, 7]);
    }

    #[test]
    fn batch_orders_new_rows_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 2).unwrap();
        store.append_batch(vec![(3, posting(0)), (1, posting(0)), (2, posting(0)), (4, posting(0))]).unwrap();
        for id in 1..=4 {
            assert_eq!(store.read_postings(id).unwrap().len(), 1);
        }
    }

    #[test]
    fn gap_is_rejected_and_leaves_barrels_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 2).unwrap();
        store.append(1, posting(0)).unwrap();
        let before: Vec<String> = (0..2).map(|b| fs::read_to_string(store.barrel_path(b)).unwrap()).collect();

        // id 2 is valid, id 5 skips row 1 of barrel 1.
        let err = store.append_batch(vec![(2, posting(1)), (5, posting(1))]).unwrap_err();
        assert!(err.is_storage_fault());
        let after: Vec<String> = (0..2).map(|b| fs::read_to_string(store.barrel_path(b)).unwrap()).collect();
        assert_eq!(before, after);
        assert!(!store.tmp_path(0).exists());
        assert!(!store.tmp_path(1).exists());
    }

    #[test]
    fn staging_restores_rows_for_known_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 2).unwrap();
        store.append(1, posting(0)).unwrap();
        // Ids 2 and 3 were claimed but their rows never landed.
        let batch = store.stage_batch(vec![(4, posting(1)), (5, posting(1))], 3).unwrap();
        assert_eq!(batch.barrels(), &[0, 1]);
        batch.commit().unwrap();

        assert!(store.read_postings(2).unwrap().is_empty());
        assert!(store.read_postings(3).unwrap().is_empty());
        assert_eq!(store.read_postings(4).unwrap()[0].doc_id, 1);
        assert_eq!(store.read_postings(5).unwrap()[0].doc_id, 1);
        assert_eq!(store.row_counts().unwrap(), vec![3, 3]);
    }

    #[test]
    fn dropped_batch_leaves_barrels_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 2).unwrap();
        let before = fs::read_to_string(store.barrel_path(1)).unwrap();
        let batch = store.stage_batch(vec![(1, posting(0))], 0).unwrap();
        assert!(store.tmp_path(1).exists());
        drop(batch);
        assert!(!store.tmp_path(1).exists());
        assert_eq!(fs::read_to_string(store.barrel_path(1)).unwrap(), before);
    }

    #[test]
    fn write_all_fills_missing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 3).unwrap();
        let mut postings = BTreeMap::new();
        postings.insert(1, vec![posting(0)]);
        postings.insert(7, vec![posting(1), posting(2)]);
        store.write_all(&postings, 7).unwrap();
        assert_eq!(store.read_postings(7).unwrap().len(), 2);
        assert!(store.read_postings(4).unwrap().is_empty());
        assert_eq!(store.row_counts().unwrap(), vec![3, 3, 2]);
        store.append(8, posting(3)).unwrap();
        assert_eq!(store.read_postings(8).unwrap()[0].doc_id, 3);
    }

    #[test]
    fn malformed_payload_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 2).unwrap();
        fs::write(store.barrel_path(1), "WordId\tDocumentDetails\n1\t[{\"DocumentID\":1}]\n").unwrap();
        assert!(matches!(store.read_postings(1), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn missing_barrel_is_storage_fault() {
        let dir = tempfile::tempdir().unwrap();
        let store = BarrelStore::create(dir.path(), 2).unwrap();
        fs::remove_file(store.barrel_path(1)).unwrap();
        assert!(matches!(store.read_postings(1), Err(Error::Storage { .. })));
    }
}
