//! The owned index-service object: lexicon and trie in memory, barrels and
//! documents on disk, behind an explicit lock discipline.
//!
//! Lookups take read locks on the lexicon and trie and per-barrel read locks;
//! ingestion is serialized by `writer` and takes write locks only for the
//! barrels it touches and for the brief in-memory publish of new terms.

use crate::barrels::BarrelStore;
use crate::config::IndexConfig;
use crate::doc_store::DocumentStore;
use crate::error::{Error, Result};
use crate::forward::ForwardLog;
use crate::index::{DocId, DocumentRecord, TermId};
use crate::lexicon::Lexicon;
use crate::persist::{load_meta, save_meta, IndexPaths, MetaFile};
use crate::query::{resolve_terms, QueryPage, Ranker};
use crate::tokenizer::{Normalizer, StemmingNormalizer};
use crate::trie::{Trie, DEFAULT_COMPLETION_LIMIT};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::Path;

pub(crate) struct WriterState {
    pub(crate) next_doc_id: DocId,
    pub(crate) meta: MetaFile,
    /// The lexicon file may disagree with memory and must be rewritten whole.
    pub(crate) lexicon_dirty: bool,
}

pub struct IndexService {
    config: IndexConfig,
    pub(crate) paths: IndexPaths,
    pub(crate) lexicon: RwLock<Lexicon>,
    pub(crate) trie: RwLock<Trie>,
    pub(crate) barrels: BarrelStore,
    pub(crate) documents: DocumentStore,
    pub(crate) forward_log: ForwardLog,
    normalizer: Box<dyn Normalizer>,
    pub(crate) writer: Mutex<WriterState>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub byte_offset: u64,
    pub score: f64,
    #[serde(flatten)]
    pub record: DocumentRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResults {
    pub query: String,
    pub total_matches: usize,
    pub fallback: bool,
    pub hits: Vec<SearchHit>,
}

impl IndexService {
    /// Initialize an empty index under `root`, replacing whatever is there.
    pub fn create<P: AsRef<Path>>(root: P, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let paths = IndexPaths::new(root);
        paths.ensure_dirs()?;
        BarrelStore::create(paths.barrels_dir(), config.barrel_count)?;
        Lexicon::new().save(paths.lexicon())?;
        let _ = std::fs::remove_file(paths.documents());
        ForwardLog::new(paths.forward_log()).truncate()?;
        save_meta(&paths, &MetaFile::new(0, config.barrel_count))?;
        tracing::info!(root = %paths.root.display(), barrels = config.barrel_count, "created empty index");
        Self::open(&paths.root, config)
    }

    pub fn open<P: AsRef<Path>>(root: P, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let paths = IndexPaths::new(root);
        let meta = load_meta(&paths)?;
        if meta.barrel_count != config.barrel_count {
            return Err(Error::Config(format!(
                "index at {} was built with {} barrels but {} are configured",
                paths.root.display(),
                meta.barrel_count,
                config.barrel_count
            )));
        }
        let lexicon = Lexicon::load(paths.lexicon())?;
        let trie = Trie::build(lexicon.words().map(|(w, _)| w));
        let barrels = BarrelStore::open(paths.barrels_dir(), config.barrel_count)?;
        check_barrels_within(&barrels, lexicon.max_id())?;
        let documents = DocumentStore::open(paths.documents())?;
        let next_doc_id = documents.count_records()?;
        let forward_log = ForwardLog::new(paths.forward_log());

        tracing::info!(
            root = %paths.root.display(),
            terms = lexicon.len(),
            completions = trie.len(),
            docs = next_doc_id,
            barrels = config.barrel_count,
            "index opened"
        );
        Ok(Self {
            config,
            paths,
            lexicon: RwLock::new(lexicon),
            trie: RwLock::new(trie),
            barrels,
            documents,
            forward_log,
            normalizer: Box::new(StemmingNormalizer),
            writer: Mutex::new(WriterState { next_doc_id, meta, lexicon_dirty: false }),
        })
    }

    /// Open the index under `root`, creating an empty one when it has no meta file.
    pub fn open_or_create<P: AsRef<Path>>(root: P, config: IndexConfig) -> Result<Self> {
        if IndexPaths::new(&root).meta().exists() {
            Self::open(root, config)
        } else {
            Self::create(root, config)
        }
    }

    pub fn with_normalizer(mut self, normalizer: Box<dyn Normalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn config(&self) -> &IndexConfig { &self.config }

    pub fn paths(&self) -> &IndexPaths { &self.paths }

    pub(crate) fn normalizer(&self) -> &dyn Normalizer { self.normalizer.as_ref() }

    pub fn term_count(&self) -> usize { self.lexicon.read().len() }

    pub fn document_count(&self) -> DocId { self.writer.lock().next_doc_id }

    pub fn lookup(&self, word: &str) -> Option<TermId> { self.lexicon.read().lookup(word) }

    pub fn document_at(&self, byte_offset: u64) -> Result<DocumentRecord> {
        self.documents.read_at(byte_offset)
    }

    /// Rank already-normalized `terms` and return one page of the result.
    pub fn rank_terms<S: AsRef<str>>(&self, terms: &[S], page: usize, per_page: usize) -> Result<QueryPage> {
        let ids = {
            let lexicon = self.lexicon.read();
            resolve_terms(&lexicon, terms)
        };
        let ranker = Ranker::new(&self.config);
        let ranked = ranker.rank(&ids, &self.barrels)?;
        Ok(ranker.page(&ranked, page, per_page))
    }

    /// Normalize `query`, rank it and load the records of the requested page.
    pub fn search(&self, query: &str, page: usize, per_page: usize) -> Result<SearchResults> {
        let terms = self.normalizer.normalize(query);
        let page = self.rank_terms(terms.as_slice(), page, per_page)?;

        let mut hits = Vec::with_capacity(page.docs.len());
        for doc in page.docs {
            match self.documents.read_at(doc.byte_offset) {
                Ok(record) => hits.push(SearchHit { doc_id: doc.doc_id, byte_offset: doc.byte_offset, score: doc.score, record }),
                Err(e) if page.fallback => {
                    tracing::warn!(doc_id = doc.doc_id, byte_offset = doc.byte_offset, error = %e, "skipping unreadable fallback record");
                }
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(query, total = page.total_matches, fallback = page.fallback, "search done");
        Ok(SearchResults { query: query.to_string(), total_matches: page.total_matches, fallback: page.fallback, hits })
    }

    /// Up to ten lexicon words starting with `prefix`.
    pub fn autocomplete(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.trim().to_lowercase();
        self.trie.read().complete(&prefix, DEFAULT_COMPLETION_LIMIT)
    }
}

/// Fail when a barrel holds rows for ids the lexicon never assigned.
fn check_barrels_within(barrels: &BarrelStore, max_id: TermId) -> Result<()> {
    let count = barrels.barrel_count() as u64;
    for (barrel, rows) in barrels.row_counts()?.into_iter().enumerate() {
        if rows == 0 {
            continue;
        }
        let last_id = (rows as u64 - 1) * count + barrel as u64;
        if last_id > max_id as u64 {
            return Err(Error::corrupt(
                barrels.barrel_path(barrel as u32),
                format!("row for id {last_id} but the lexicon ends at {max_id}"),
            ));
        }
    }
    Ok(())
}
