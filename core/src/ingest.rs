//! Single-document ingestion.
//!
//! Mutations run in an order where a failure never leaves postings pointing at
//! a document the store does not hold, and never lets a term id carry
//! postings of a word it was not assigned to:
//!
//! 1. normalize and build the forward statistics (no I/O)
//! 2. decide term ids against a read-only view of the lexicon
//! 3. append the record to the document store
//! 4. rewrite the touched barrels into temporary files, holding their locks
//! 5. persist the new terms to the lexicon file
//! 6. publish the new terms in memory, append the forward entry, rename the
//!    barrels into place
//!
//! A failure before step 6 assigns no id: the staged barrels are discarded and
//! the next document is offered the same ids. From step 6 on the ids are
//! claimed for good; a barrel left behind by a failed rename gets its missing
//! rows restored as empty ones on its next write. A failed lexicon write marks
//! the file dirty and the next ingestion rewrites it whole.

use crate::error::{Error, Result};
use crate::forward::ForwardDocument;
use crate::index::{DocId, DocumentRecord, TermId};
use crate::lexicon::{Lexicon, TermAssignment};
use crate::persist::save_meta;
use crate::service::{IndexService, WriterState};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Normalizing,
    ResolvingTerms,
    AppendingDocument,
    UpdatingBarrels,
    PersistingLexicon,
    CommittingBarrels,
    Done,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IngestStage::Normalizing => "normalizing",
            IngestStage::ResolvingTerms => "resolving terms",
            IngestStage::AppendingDocument => "appending document",
            IngestStage::UpdatingBarrels => "updating barrels",
            IngestStage::PersistingLexicon => "persisting lexicon",
            IngestStage::CommittingBarrels => "committing barrels",
            IngestStage::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub message: String,
    pub doc_id: DocId,
    pub byte_offset: u64,
    pub new_terms: usize,
    #[serde(rename = "time_taken", serialize_with = "secs")]
    pub elapsed: Duration,
}

fn secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

trait AtStage<T> {
    fn at(self, stage: IngestStage) -> Result<T>;
}

impl<T> AtStage<T> for Result<T> {
    fn at(self, stage: IngestStage) -> Result<T> {
        self.map_err(|e| {
            tracing::warn!(%stage, error = %e, "ingestion failed");
            Error::Ingest { stage, source: Box::new(e) }
        })
    }
}

impl IndexService {
    /// Validate loosely typed request fields and ingest them as one document.
    pub fn add_document(&self, fields: &Map<String, Value>) -> Result<IngestReport> {
        let record = DocumentRecord::from_fields(fields)?;
        self.add_record(record)
    }

    pub fn add_record(&self, record: DocumentRecord) -> Result<IngestReport> {
        let start = Instant::now();
        record.check_storable()?;

        tracing::debug!(stage = %IngestStage::Normalizing);
        let doc = ForwardDocument::from_record(self.normalizer(), &record);

        let mut writer = self.writer.lock();
        let doc_id = writer.next_doc_id;

        tracing::debug!(stage = %IngestStage::ResolvingTerms, doc_id);
        let (staged, known_max) = {
            let lexicon = self.lexicon.read();
            (lexicon.stage(doc.words()), lexicon.max_id())
        };
        let ids: Vec<TermId> = staged.iter().map(|t| t.id).collect();
        let new_terms = staged.iter().filter(|t| t.is_new).count();

        tracing::debug!(stage = %IngestStage::AppendingDocument, doc_id);
        let byte_offset = self.documents.append(&record).at(IngestStage::AppendingDocument)?;
        writer.next_doc_id += 1;
        let entry = doc.into_entry(doc_id, byte_offset, &ids).at(IngestStage::AppendingDocument)?;

        tracing::debug!(stage = %IngestStage::UpdatingBarrels, doc_id, terms = ids.len());
        let batch = self
            .barrels
            .stage_batch(entry.postings().collect(), known_max)
            .at(IngestStage::UpdatingBarrels)?;

        tracing::debug!(stage = %IngestStage::PersistingLexicon, doc_id, new_terms);
        self.persist_terms(&mut writer, &staged).at(IngestStage::PersistingLexicon)?;
        {
            let mut lexicon = self.lexicon.write();
            let committed = lexicon.commit(&staged);
            if committed.is_err() {
                writer.lexicon_dirty = true;
            }
            committed.at(IngestStage::PersistingLexicon)?;
            let mut trie = self.trie.write();
            for term in staged.iter().filter(|t| t.is_new) {
                trie.insert(&term.word);
            }
        }

        tracing::debug!(stage = %IngestStage::CommittingBarrels, doc_id, barrels = batch.barrels().len());
        self.forward_log.append(std::slice::from_ref(&entry)).at(IngestStage::CommittingBarrels)?;
        batch.commit().at(IngestStage::CommittingBarrels)?;
        writer.meta.num_docs = writer.next_doc_id;
        save_meta(&self.paths, &writer.meta).at(IngestStage::CommittingBarrels)?;
        drop(writer);

        let elapsed = start.elapsed();
        tracing::info!(stage = %IngestStage::Done, doc_id, byte_offset, new_terms, ?elapsed, "document added");
        Ok(IngestReport { message: "Document added successfully".into(), doc_id, byte_offset, new_terms, elapsed })
    }

    /// Append new terms to the lexicon file, or rewrite it whole after an earlier failure.
    fn persist_terms(&self, writer: &mut WriterState, staged: &[TermAssignment]) -> Result<()> {
        let path = self.paths.lexicon();
        let result = if writer.lexicon_dirty {
            let mut next = self.lexicon.read().clone();
            next.commit(staged)?;
            tracing::info!(terms = next.len(), "rewriting lexicon file");
            next.save(&path)
        } else {
            Lexicon::append_rows(&path, staged)
        };
        writer.lexicon_dirty = result.is_err();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_read_in_messages() {
        let err = Error::Ingest {
            stage: IngestStage::UpdatingBarrels,
            source: Box::new(Error::Validation("x".into())),
        };
        assert_eq!(err.to_string(), "ingestion failed while updating barrels: validation failed: x");
    }

    #[test]
    fn report_serializes_seconds() {
        let report = IngestReport {
            message: "ok".into(),
            doc_id: 3,
            byte_offset: 10,
            new_terms: 2,
            elapsed: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["time_taken"], 1.5);
        assert_eq!(json["doc_id"], 3);
    }
}
