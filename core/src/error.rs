use crate::ingest::IngestStage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the index core.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller supplied an unusable document; nothing was mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage fault on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// On-disk data exists but cannot be interpreted.
    #[error("corrupt data in {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    /// An in-memory structure disagrees with what the caller expected of it.
    #[error("index invariant violated: {0}")]
    Invariant(String),

    #[error("ingestion failed while {stage}: {source}")]
    Ingest {
        stage: IngestStage,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn storage(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Storage { path: path.as_ref().to_path_buf(), source }
    }

    pub fn corrupt(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Error::Corrupt { path: path.as_ref().to_path_buf(), reason: reason.into() }
    }

    /// True for I/O and corruption failures, as opposed to caller mistakes.
    pub fn is_storage_fault(&self) -> bool {
        match self {
            Error::Storage { .. } | Error::Corrupt { .. } => true,
            Error::Ingest { source, .. } => source.is_storage_fault(),
            Error::Validation(_) | Error::Config(_) | Error::Invariant(_) => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            Error::Validation(_) => true,
            Error::Ingest { source, .. } => source.is_validation(),
            _ => false,
        }
    }
}
