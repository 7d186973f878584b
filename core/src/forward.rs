//! Forward index: per-document, per-section term statistics.
//!
//! A [`ForwardDocument`] is built from normalized sections before any term has
//! an id. Once ids are known it becomes a [`ForwardEntry`], which yields one
//! [`Posting`] per distinct term and is what `forward.log` records.

use crate::error::{Error, Result};
use crate::index::{DocId, DocumentRecord, Posting, Section, TermId, SECTION_COUNT};
use crate::tokenizer::Normalizer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermStats {
    pub frequency: [u32; SECTION_COUNT],
    pub positions: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardDocument {
    pub length: [u32; SECTION_COUNT],
    /// Distinct terms in first-seen order over title, abstract, keywords.
    pub terms: Vec<(String, TermStats)>,
}

impl ForwardDocument {
    pub fn from_sections(title: &[String], abstract_terms: &[String], keywords: &[String]) -> Self {
        let sections: [&[String]; SECTION_COUNT] = [title, abstract_terms, keywords];
        let mut length = [0u32; SECTION_COUNT];
        let mut slot: HashMap<&str, usize> = HashMap::new();
        let mut terms: Vec<(String, TermStats)> = Vec::new();

        for section in Section::ALL {
            let tokens = sections[section.index()];
            length[section.index()] = tokens.len() as u32;
            for (pos, token) in tokens.iter().enumerate() {
                let i = *slot.entry(token.as_str()).or_insert_with(|| {
                    terms.push((token.clone(), TermStats::default()));
                    terms.len() - 1
                });
                let stats = &mut terms[i].1;
                stats.frequency[section.index()] += 1;
                if section == Section::Abstract {
                    stats.positions.push(pos as u32);
                }
            }
        }
        Self { length, terms }
    }

    /// Normalize the title, abstract and keywords of `record` and build its statistics.
    pub fn from_record(normalizer: &dyn Normalizer, record: &DocumentRecord) -> Self {
        let title = normalizer.normalize(&record.title);
        let abstract_terms = normalizer.normalize(&record.abstract_text);
        let keywords = normalizer.normalize(&record.keywords);
        Self::from_sections(&title, &abstract_terms, &keywords)
    }

    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|(w, _)| w.as_str())
    }

    /// Attach ids, given in the same order as [`terms`](Self::terms).
    pub fn into_entry(self, doc_id: DocId, byte_offset: u64, ids: &[TermId]) -> Result<ForwardEntry> {
        if ids.len() != self.terms.len() {
            return Err(Error::Invariant(format!(
                "forward entry for document {doc_id} has {} terms but {} ids",
                self.terms.len(),
                ids.len()
            )));
        }
        let terms = ids.iter().copied().zip(self.terms.into_iter().map(|(_, stats)| stats)).collect();
        Ok(ForwardEntry { doc_id, byte_offset, length: self.length, terms })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardEntry {
    pub doc_id: DocId,
    pub byte_offset: u64,
    pub length: [u32; SECTION_COUNT],
    pub terms: Vec<(TermId, TermStats)>,
}

impl ForwardEntry {
    pub fn postings(&self) -> impl Iterator<Item = (TermId, Posting)> + '_ {
        self.terms.iter().map(move |(id, stats)| {
            (
                *id,
                Posting {
                    doc_id: self.doc_id,
                    byte_offset: self.byte_offset,
                    length: self.length,
                    frequency: stats.frequency,
                    positions: stats.positions.clone(),
                },
            )
        })
    }
}

/// Length-prefixed bincode frames of [`ForwardEntry`], appended in document order.
pub struct ForwardLog {
    path: PathBuf,
}

impl ForwardLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn append(&self, entries: &[ForwardEntry]) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::storage(&self.path, e))?;
        let mut out = BufWriter::new(file);
        for entry in entries {
            let bytes = bincode::serialize(entry).map_err(|e| Error::corrupt(&self.path, e.to_string()))?;
            out.write_all(&(bytes.len() as u32).to_le_bytes()).map_err(|e| Error::storage(&self.path, e))?;
            out.write_all(&bytes).map_err(|e| Error::storage(&self.path, e))?;
        }
        out.flush().map_err(|e| Error::storage(&self.path, e))?;
        Ok(())
    }

    pub fn truncate(&self) -> Result<()> {
        File::create(&self.path).map_err(|e| Error::storage(&self.path, e))?;
        Ok(())
    }

    pub fn read_all(&self) -> Result<Vec<ForwardEntry>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(&self.path, e)),
        };
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        loop {
            let mut len = [0u8; 4];
            match reader.read_exact(&mut len) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(Error::storage(&self.path, e)),
            }
            let mut frame = vec![0u8; u32::from_le_bytes(len) as usize];
            reader.read_exact(&mut frame).map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => Error::corrupt(&self.path, format!("truncated frame after {} entries", entries.len())),
                _ => Error::storage(&self.path, e),
            })?;
            let entry: ForwardEntry =
                bincode::deserialize(&frame).map_err(|e| Error::corrupt(&self.path, e.to_string()))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn stats_per_section() {
        let doc = ForwardDocument::from_sections(
            &toks(&["quantum", "entangl"]),
            &toks(&["studi", "quantum", "entangl", "phenomena", "quantum"]),
            &toks(&["physic", "quantum"]),
        );
        assert_eq!(doc.length, [2, 5, 2]);
        let words: Vec<&str> = doc.words().collect();
        assert_eq!(words, vec!["quantum", "entangl", "studi", "phenomena", "physic"]);

        let quantum = &doc.terms[0].1;
        assert_eq!(quantum.frequency, [1, 2, 1]);
        assert_eq!(quantum.positions, vec![1, 4]);

        let physic = &doc.terms[4].1;
        assert_eq!(physic.frequency, [0, 0, 1]);
        assert!(physic.positions.is_empty());
    }

    #[test]
    fn entry_emits_one_posting_per_term() {
        let doc = ForwardDocument::from_sections(&toks(&["graph"]), &toks(&["graph", "walk"]), &[]);
        let entry = doc.into_entry(4, 900, &[10, 11]).unwrap();
        let postings: Vec<(TermId, Posting)> = entry.postings().collect();
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].0, 10);
        assert_eq!(
            postings[0].1,
            Posting { doc_id: 4, byte_offset: 900, length: [1, 2, 0], frequency: [1, 1, 0], positions: vec![0] }
        );
        assert_eq!(postings[1].1.positions, vec![1]);
    }

    #[test]
    fn entry_requires_matching_ids() {
        let doc = ForwardDocument::from_sections(&toks(&["graph"]), &[], &[]);
        assert!(doc.into_entry(0, 0, &[]).is_err());
    }

    #[test]
    fn log_appends_and_replays() {
        let dir = tempfile::tempdir().unwrap();
        let log = ForwardLog::new(dir.path().join("forward.log"));
        assert!(log.read_all().unwrap().is_empty());

        let a = ForwardDocument::from_sections(&toks(&["a1"]), &[], &[]).into_entry(0, 0, &[1]).unwrap();
        let b = ForwardDocument::from_sections(&toks(&["b1"]), &[], &[]).into_entry(1, 30, &[2]).unwrap();
        log.append(std::slice::from_ref(&a)).unwrap();
        log.append(std::slice::from_ref(&b)).unwrap();
        assert_eq!(log.read_all().unwrap(), vec![a, b]);
    }

    #[test]
    fn truncated_log_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("forward.log");
        std::fs::write(&path, [20u8, 0, 0, 0, 1, 2]).unwrap();
        assert!(matches!(ForwardLog::new(&path).read_all(), Err(Error::Corrupt { .. })));
    }
}
