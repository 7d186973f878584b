//! BM25 ranking over barrel postings.

use crate::barrels::BarrelStore;
use crate::config::{IndexConfig, SectionWeights};
use crate::error::Result;
use crate::index::{DocId, Posting, Section, TermId};
use crate::lexicon::Lexicon;
use std::collections::{HashMap, HashSet};

/// Anything that can hand out the posting list of a term id.
pub trait PostingSource {
    fn postings(&self, id: TermId) -> Result<Vec<Posting>>;
}

impl PostingSource for BarrelStore {
    fn postings(&self, id: TermId) -> Result<Vec<Posting>> {
        self.read_postings(id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedDoc {
    pub doc_id: DocId,
    pub byte_offset: u64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPage {
    /// Documents matched by the query; zero when `fallback` is set.
    pub total_matches: usize,
    pub docs: Vec<RankedDoc>,
    pub fallback: bool,
}

/// Ids of the distinct known terms, in query order. Unknown terms are dropped.
pub fn resolve_terms<S: AsRef<str>>(lexicon: &Lexicon, terms: &[S]) -> Vec<TermId> {
    let mut seen = HashSet::new();
    terms
        .iter()
        .filter_map(|t| {
            let id = lexicon.lookup(t.as_ref());
            if id.is_none() {
                tracing::debug!(term = t.as_ref(), "query term not in lexicon");
            }
            id
        })
        .filter(|id| seen.insert(*id))
        .collect()
}

/// `ln((N - df + 0.5) / (df + 0.5) + 1)`
pub fn idf(doc_freq: usize, corpus_size: f64) -> f64 {
    let df = doc_freq as f64;
    ((corpus_size - df + 0.5) / (df + 0.5) + 1.0).ln()
}

/// Section-weighted term frequency. Empty sections contribute nothing.
pub fn weighted_tf(posting: &Posting, weights: &SectionWeights) -> f64 {
    let ratio = |section: Section| {
        let len = posting.length[section.index()];
        if len == 0 {
            0.0
        } else {
            posting.frequency[section.index()] as f64 / len as f64
        }
    };
    weights.title * ratio(Section::Title)
        + weights.keywords / weights.keywords_divisor * ratio(Section::Keywords)
        + weights.abstract_ * ratio(Section::Abstract)
}

pub struct Ranker<'a> {
    config: &'a IndexConfig,
}

impl<'a> Ranker<'a> {
    pub fn new(config: &'a IndexConfig) -> Self {
        Self { config }
    }

    /// BM25 contribution of one term to one document.
    pub fn term_score(&self, tf: f64, doc_length: f64, idf: f64) -> f64 {
        let IndexConfig { k1, b, avg_doc_length, .. } = *self.config;
        idf * (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * (doc_length / avg_doc_length)))
    }

    pub fn score_posting(&self, posting: &Posting, idf: f64) -> f64 {
        let tf = weighted_tf(posting, &self.config.section_weights);
        self.term_score(tf, posting.doc_length() as f64, idf)
    }

    /// Score every document reachable from `term_ids`, best first.
    ///
    /// Ties are broken by ascending document id so repeated queries are stable.
    pub fn rank<P: PostingSource + ?Sized>(&self, term_ids: &[TermId], source: &P) -> Result<Vec<RankedDoc>> {
        let corpus_size = self.config.corpus_size as f64;
        let mut scores: HashMap<DocId, RankedDoc> = HashMap::new();
        for &id in term_ids {
            let postings = source.postings(id)?;
            let term_idf = idf(postings.len(), corpus_size);
            for posting in &postings {
                let contribution = self.score_posting(posting, term_idf);
                let doc = scores.entry(posting.doc_id).or_insert(RankedDoc {
                    doc_id: posting.doc_id,
                    byte_offset: posting.byte_offset,
                    score: 0.0,
                });
                doc.score += contribution;
                doc.byte_offset = posting.byte_offset;
            }
        }
        let mut ranked: Vec<RankedDoc> = scores.into_values().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.doc_id.cmp(&b.doc_id)));
        Ok(ranked)
    }

    /// Slice `[(page-1)*page_size, page*page_size)` of `ranked`, or the curated
    /// fallback list when nothing matched. Page numbers start at 1.
    pub fn page(&self, ranked: &[RankedDoc], page: usize, page_size: usize) -> QueryPage {
        if ranked.is_empty() {
            let docs = self
                .config
                .fallback
                .iter()
                .map(|&(doc_id, byte_offset)| RankedDoc { doc_id, byte_offset, score: 0.0 })
                .collect();
            return QueryPage { total_matches: 0, docs, fallback: true };
        }
        let start = page.max(1).saturating_sub(1).saturating_mul(page_size);
        let docs = ranked.iter().skip(start).take(page_size).cloned().collect();
        QueryPage { total_matches: ranked.len(), docs, fallback: false }
    }
}
