pub mod barrels;
pub mod builder;
pub mod config;
pub mod doc_store;
pub mod error;
pub mod forward;
pub mod index;
pub mod ingest;
pub mod lexicon;
pub mod persist;
pub mod query;
pub mod service;
pub mod tokenizer;
pub mod trie;

pub use config::{IndexConfig, SectionWeights};
pub use error::{Error, Result};
pub use index::{DocId, DocumentRecord, Posting, Section, TermId};
pub use service::{IndexService, SearchHit, SearchResults};
