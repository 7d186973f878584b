//! Bidirectional term/id mapping persisted as `Word,WordId` rows.
//!
//! Ids are handed out in first-seen order starting at 1 and never reused, so
//! the live set is always exactly `1..=max_id`. The barrel addressing depends
//! on that density.

use crate::error::{Error, Result};
use crate::index::TermId;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

const HEADER: &str = "Word,WordId";

#[derive(Debug, Default, Clone)]
pub struct Lexicon {
    words: HashMap<String, TermId>,
    max_id: TermId,
}

/// A term id decided ahead of any mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermAssignment {
    pub word: String,
    pub id: TermId,
    pub is_new: bool,
}

impl Lexicon {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.words.len() }

    pub fn is_empty(&self) -> bool { self.words.is_empty() }

    pub fn max_id(&self) -> TermId { self.max_id }

    pub fn lookup(&self, word: &str) -> Option<TermId> {
        self.words.get(word).copied()
    }

    pub fn words(&self) -> impl Iterator<Item = (&str, TermId)> {
        self.words.iter().map(|(w, id)| (w.as_str(), *id))
    }

    /// Existing id for `word`, or the next id after the current maximum.
    pub fn resolve_or_create(&mut self, word: &str) -> TermId {
        if let Some(&id) = self.words.get(word) {
            return id;
        }
        self.max_id += 1;
        self.words.insert(word.to_string(), self.max_id);
        self.max_id
    }

    /// Decide ids for `words` without touching the map.
    ///
    /// Unknown words receive consecutive ids in the order given, exactly as
    /// successive `resolve_or_create` calls would. Duplicates are collapsed.
    pub fn stage<'a, I>(&self, words: I) -> Vec<TermAssignment>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut next = self.max_id;
        let mut pending: HashMap<&str, TermId> = HashMap::new();
        let mut out = Vec::new();
        for word in words {
            if pending.contains_key(word) {
                continue;
            }
            let (id, is_new) = match self.lookup(word) {
                Some(id) => (id, false),
                None => {
                    next += 1;
                    (next, true)
                }
            };
            pending.insert(word, id);
            out.push(TermAssignment { word: word.to_string(), id, is_new });
        }
        out
    }

    /// Apply the new ids from a [`stage`](Self::stage) result.
    pub fn commit(&mut self, staged: &[TermAssignment]) -> Result<()> {
        for term in staged.iter().filter(|t| t.is_new) {
            if term.id != self.max_id + 1 || self.words.contains_key(&term.word) {
                return Err(Error::Invariant(format!(
                    "stale term assignment `{}` -> {} (lexicon max id is {})",
                    term.word, term.id, self.max_id
                )));
            }
            self.words.insert(term.word.clone(), term.id);
            self.max_id = term.id;
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::storage(path, e))?;
        let mut lines = BufReader::new(file).lines();
        match lines.next() {
            Some(Ok(header)) if header.trim_end() == HEADER => {}
            Some(Ok(other)) => return Err(Error::corrupt(path, format!("unexpected header `{other}`"))),
            Some(Err(e)) => return Err(Error::storage(path, e)),
            None => return Err(Error::corrupt(path, "missing header")),
        }

        let mut lexicon = Lexicon::new();
        let mut seen_ids = std::collections::HashSet::new();
        for (n, line) in lines.enumerate() {
            let line = line.map_err(|e| Error::storage(path, e))?;
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            let row = n + 2;
            let (word, id) = line
                .rsplit_once(',')
                .ok_or_else(|| Error::corrupt(path, format!("row {row}: expected `word,id`")))?;
            let id: TermId = id
                .trim()
                .parse()
                .map_err(|_| Error::corrupt(path, format!("row {row}: bad id `{id}`")))?;
            if id == 0 || !seen_ids.insert(id) {
                return Err(Error::corrupt(path, format!("row {row}: id {id} is zero or repeated")));
            }
            if lexicon.words.insert(word.to_string(), id).is_some() {
                return Err(Error::corrupt(path, format!("row {row}: word `{word}` repeated")));
            }
            lexicon.max_id = lexicon.max_id.max(id);
        }
        if lexicon.max_id as usize != lexicon.words.len() {
            return Err(Error::corrupt(
                path,
                format!("ids are not dense: {} words but max id {}", lexicon.words.len(), lexicon.max_id),
            ));
        }
        tracing::debug!(terms = lexicon.len(), path = %path.display(), "lexicon loaded");
        Ok(lexicon)
    }

    /// Write the whole lexicon, ordered by id, replacing the file in one rename.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut rows: Vec<(&str, TermId)> = self.words().collect();
        rows.sort_by_key(|(_, id)| *id);
        let tmp = path.with_extension("csv.tmp");
        let file = File::create(&tmp).map_err(|e| Error::storage(&tmp, e))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{HEADER}").map_err(|e| Error::storage(&tmp, e))?;
        for (word, id) in rows {
            writeln!(out, "{word},{id}").map_err(|e| Error::storage(&tmp, e))?;
        }
        out.flush().map_err(|e| Error::storage(&tmp, e))?;
        drop(out);
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(Error::storage(path, e));
        }
        Ok(())
    }

    /// Append rows for newly created terms; the existing rows are left alone.
    pub fn append_rows<P: AsRef<Path>>(path: P, terms: &[TermAssignment]) -> Result<()> {
        let path = path.as_ref();
        let new_terms: Vec<&TermAssignment> = terms.iter().filter(|t| t.is_new).collect();
        if new_terms.is_empty() {
            return Ok(());
        }
        let fresh = !path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| Error::storage(path, e))?;
        let mut out = BufWriter::new(file);
        if fresh {
            writeln!(out, "{HEADER}").map_err(|e| Error::storage(path, e))?;
        }
        for term in new_terms {
            writeln!(out, "{},{}", term.word, term.id).map_err(|e| Error::storage(path, e))?;
        }
        out.flush().map_err(|e| Error::storage(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_first_seen_order() {
        let mut lex = Lexicon::new();
        assert_eq!(lex.resolve_or_create("quantum"), 1);
        assert_eq!(lex.resolve_or_create("entangl"), 2);
        assert_eq!(lex.resolve_or_create("quantum"), 1);
        assert_eq!(lex.resolve_or_create("studi"), 3);
        assert_eq!(lex.lookup("entangl"), Some(2));
        assert_eq!(lex.lookup("missing"), None);
        assert_eq!(lex.max_id(), 3);
    }

    #[test]
    fn stage_matches_resolve_without_mutating() {
        let mut lex = Lexicon::new();
        lex.resolve_or_create("alpha");
        let staged = lex.stage(["beta", "alpha", "gamma", "beta"]);
        assert_eq!(
            staged,
            vec![
                TermAssignment { word: "beta".into(), id: 2, is_new: true },
                TermAssignment { word: "alpha".into(), id: 1, is_new: false },
                TermAssignment { word: "gamma".into(), id: 3, is_new: true },
            ]
        );
        assert_eq!(lex.len(), 1);
        lex.commit(&staged).unwrap();
        assert_eq!(lex.lookup("gamma"), Some(3));
        assert_eq!(lex.max_id(), 3);
    }

    #[test]
    fn commit_rejects_stale_stage() {
        let mut lex = Lexicon::new();
        let staged = lex.stage(["one"]);
        lex.resolve_or_create("other");
        assert!(lex.commit(&staged).is_err());
    }

    #[test]
    fn save_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.csv");
        let mut lex = Lexicon::new();
        lex.resolve_or_create("graph");
        lex.resolve_or_create("neural");
        lex.save(&path).unwrap();

        let staged = lex.stage(["neural", "network"]);
        Lexicon::append_rows(&path, &staged).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Word,WordId\ngraph,1\nneural,2\nnetwork,3\n");
        let loaded = Lexicon::load(&path).unwrap();
        assert_eq!(loaded.lookup("network"), Some(3));
        assert_eq!(loaded.max_id(), 3);
    }

    #[test]
    fn load_rejects_gaps_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.csv");
        std::fs::write(&path, "Word,WordId\na,1\nb,3\n").unwrap();
        assert!(matches!(Lexicon::load(&path), Err(Error::Corrupt { .. })));
        std::fs::write(&path, "Word,WordId\na,1\nb,1\n").unwrap();
        assert!(matches!(Lexicon::load(&path), Err(Error::Corrupt { .. })));
        std::fs::write(&path, "Word,WordId\na,x\n").unwrap();
        assert!(matches!(Lexicon::load(&path), Err(Error::Corrupt { .. })));
    }
}
