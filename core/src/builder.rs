//! Offline bulk build and barrel re-sharding.

use crate::barrels::BarrelStore;
use crate::config::IndexConfig;
use crate::doc_store::DocumentStore;
use crate::error::{Error, Result};
use crate::forward::{ForwardDocument, ForwardEntry, ForwardLog};
use crate::index::{DocId, DocumentRecord, Posting, TermId};
use crate::lexicon::Lexicon;
use crate::persist::{load_meta, save_meta, IndexPaths, MetaFile};
use crate::tokenizer::{Normalizer, StemmingNormalizer};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const FORWARD_FLUSH_EVERY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildSummary {
    pub num_docs: u32,
    pub num_terms: usize,
    pub barrel_count: u32,
}

/// Builds a fresh index from a stream of records.
///
/// Records go to the document store as they arrive; postings are held in
/// memory and written to the barrels by [`finish`](Self::finish).
pub struct IndexBuilder {
    paths: IndexPaths,
    config: IndexConfig,
    normalizer: Box<dyn Normalizer>,
    lexicon: Lexicon,
    documents: DocumentStore,
    forward_log: ForwardLog,
    pending_forward: Vec<ForwardEntry>,
    postings: BTreeMap<TermId, Vec<Posting>>,
    next_doc_id: DocId,
}

impl IndexBuilder {
    /// Start a build under `root`, discarding any previous documents and forward log.
    pub fn new<P: AsRef<Path>>(root: P, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let paths = IndexPaths::new(root);
        paths.ensure_dirs()?;
        let documents_path = paths.documents();
        if documents_path.exists() {
            fs::remove_file(&documents_path).map_err(|e| Error::storage(&documents_path, e))?;
        }
        let documents = DocumentStore::open(&documents_path)?;
        let forward_log = ForwardLog::new(paths.forward_log());
        forward_log.truncate()?;
        Ok(Self {
            paths,
            config,
            normalizer: Box::new(StemmingNormalizer),
            lexicon: Lexicon::new(),
            documents,
            forward_log,
            pending_forward: Vec::new(),
            postings: BTreeMap::new(),
            next_doc_id: 0,
        })
    }

    pub fn with_normalizer(mut self, normalizer: Box<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Store and index one record. Delimiters and line breaks inside fields are
    /// replaced with spaces.
    pub fn add(&mut self, record: DocumentRecord) -> Result<DocId> {
        let record = record.sanitized();
        let doc = ForwardDocument::from_record(self.normalizer.as_ref(), &record);
        let doc_id = self.next_doc_id;
        let byte_offset = self.documents.append(&record)?;
        self.next_doc_id += 1;

        let ids: Vec<TermId> = doc.words().map(|w| self.lexicon.resolve_or_create(w)).collect();
        let entry = doc.into_entry(doc_id, byte_offset, &ids)?;
        for (id, posting) in entry.postings() {
            self.postings.entry(id).or_default().push(posting);
        }
        self.pending_forward.push(entry);
        if self.pending_forward.len() >= FORWARD_FLUSH_EVERY {
            self.forward_log.append(&self.pending_forward)?;
            self.pending_forward.clear();
        }
        Ok(doc_id)
    }

    pub fn finish(mut self) -> Result<BuildSummary> {
        self.forward_log.append(&self.pending_forward)?;
        self.pending_forward.clear();

        let barrels = BarrelStore::open(self.paths.barrels_dir(), self.config.barrel_count)?;
        remove_extra_barrels(&self.paths, self.config.barrel_count)?;
        barrels.write_all(&self.postings, self.lexicon.max_id())?;
        self.lexicon.save(self.paths.lexicon())?;
        save_meta(&self.paths, &MetaFile::new(self.next_doc_id, self.config.barrel_count))?;

        let summary = BuildSummary {
            num_docs: self.next_doc_id,
            num_terms: self.lexicon.len(),
            barrel_count: self.config.barrel_count,
        };
        tracing::info!(?summary, root = %self.paths.root.display(), "index build complete");
        Ok(summary)
    }
}

/// Rebuild every barrel of the index under `root` for a new barrel count,
/// replaying the forward log.
pub fn reshard<P: AsRef<Path>>(root: P, barrel_count: u32) -> Result<BuildSummary> {
    if barrel_count == 0 {
        return Err(Error::Config("barrel_count must be positive".into()));
    }
    let paths = IndexPaths::new(root);
    let mut meta = load_meta(&paths)?;
    let lexicon = Lexicon::load(paths.lexicon())?;
    let entries = ForwardLog::new(paths.forward_log()).read_all()?;

    let mut postings: BTreeMap<TermId, Vec<Posting>> = BTreeMap::new();
    for entry in &entries {
        for (id, posting) in entry.postings() {
            if id > lexicon.max_id() {
                return Err(Error::corrupt(
                    paths.forward_log(),
                    format!("document {} references term {id} beyond lexicon max {}", entry.doc_id, lexicon.max_id()),
                ));
            }
            postings.entry(id).or_default().push(posting);
        }
    }

    let barrels = BarrelStore::open(paths.barrels_dir(), barrel_count)?;
    remove_extra_barrels(&paths, barrel_count)?;
    barrels.write_all(&postings, lexicon.max_id())?;

    tracing::info!(from = meta.barrel_count, to = barrel_count, docs = entries.len(), "barrels resharded");
    meta.barrel_count = barrel_count;
    save_meta(&paths, &meta)?;
    Ok(BuildSummary { num_docs: meta.num_docs, num_terms: lexicon.len(), barrel_count })
}

/// Delete barrel files numbered at or above `barrel_count`.
fn remove_extra_barrels(paths: &IndexPaths, barrel_count: u32) -> Result<()> {
    let dir = paths.barrels_dir();
    let listing = fs::read_dir(&dir).map_err(|e| Error::storage(&dir, e))?;
    for item in listing {
        let item = item.map_err(|e| Error::storage(&dir, e))?;
        let name = item.file_name();
        let Some(index) = name
            .to_str()
            .and_then(|n| n.strip_prefix("barrel_"))
            .and_then(|n| n.strip_suffix(".tsv"))
            .and_then(|n| n.parse::<u32>().ok())
        else {
            continue;
        };
        if index >= barrel_count {
            fs::remove_file(item.path()).map_err(|e| Error::storage(item.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, abstract_text: &str, keywords: &str) -> DocumentRecord {
        DocumentRecord {
            title: title.into(),
            abstract_text: abstract_text.into(),
            year: "2020".into(),
            keywords: keywords.into(),
            n_citation: "1".into(),
            url: "http://example.org".into(),
        }
    }

    #[test]
    fn build_writes_all_parts() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig { barrel_count: 4, ..IndexConfig::default() };
        let mut builder = IndexBuilder::new(dir.path(), config).unwrap();
        assert_eq!(builder.add(record("Graph neural networks", "Message passing over graph structure", "graph")).unwrap(), 0);
        assert_eq!(builder.add(record("Quantum|computing", "Qubits and quantum gates", "quantum")).unwrap(), 1);
        let summary = builder.finish().unwrap();
        assert_eq!(summary.num_docs, 2);

        let paths = IndexPaths::new(dir.path());
        let lexicon = Lexicon::load(paths.lexicon()).unwrap();
        assert_eq!(lexicon.len(), summary.num_terms);
        assert_eq!(lexicon.lookup("graph"), Some(1));

        let barrels = BarrelStore::open(paths.barrels_dir(), 4).unwrap();
        let graph = barrels.read_postings(1).unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph[0].frequency, [1, 1, 1]);

        let store = DocumentStore::open(paths.documents()).unwrap();
        let second = barrels.read_postings(lexicon.lookup("qubit").unwrap()).unwrap();
        assert_eq!(store.read_at(second[0].byte_offset).unwrap().title, "Quantum computing");
        assert_eq!(load_meta(&paths).unwrap().num_docs, 2);
    }

    #[test]
    fn reshard_preserves_postings() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig { barrel_count: 5, ..IndexConfig::default() };
        let mut builder = IndexBuilder::new(dir.path(), config).unwrap();
        for i in 0..6 {
            builder.add(record(&format!("paper topic{i}"), "shared abstract words", "common")).unwrap();
        }
        builder.finish().unwrap();

        let paths = IndexPaths::new(dir.path());
        let lexicon = Lexicon::load(paths.lexicon()).unwrap();
        let before: Vec<Vec<Posting>> = {
            let barrels = BarrelStore::open(paths.barrels_dir(), 5).unwrap();
            (1..=lexicon.max_id()).map(|id| barrels.read_postings(id).unwrap()).collect()
        };

        let summary = reshard(dir.path(), 2).unwrap();
        assert_eq!(summary.barrel_count, 2);
        assert_eq!(load_meta(&paths).unwrap().barrel_count, 2);
        assert!(!paths.barrels_dir().join("barrel_4.tsv").exists());

        let barrels = BarrelStore::open(paths.barrels_dir(), 2).unwrap();
        let after: Vec<Vec<Posting>> = (1..=lexicon.max_id()).map(|id| barrels.read_postings(id).unwrap()).collect();
        assert_eq!(before, after);
    }
}
