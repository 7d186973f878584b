use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// On-disk format revision written to `meta.json`.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: u32,
    pub created_at: String,
    pub version: u32,
    pub barrel_count: u32,
}

impl MetaFile {
    pub fn new(num_docs: u32, barrel_count: u32) -> Self {
        Self { num_docs, created_at: now_rfc3339(), version: FORMAT_VERSION, barrel_count }
    }
}

/// File layout of one index directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn lexicon(&self) -> PathBuf { self.root.join("lexicon.csv") }
    pub fn documents(&self) -> PathBuf { self.root.join("documents.psv") }
    pub fn forward_log(&self) -> PathBuf { self.root.join("forward.log") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn barrels_dir(&self) -> PathBuf { self.root.join("barrels") }

    pub fn ensure_dirs(&self) -> Result<()> {
        let dir = self.barrels_dir();
        create_dir_all(&dir).map_err(|e| Error::storage(&dir, e))
    }
}

pub fn save_meta(paths: &IndexPaths, meta: &MetaFile) -> Result<()> {
    let path = paths.meta();
    create_dir_all(&paths.root).map_err(|e| Error::storage(&paths.root, e))?;
    let json = serde_json::to_string_pretty(meta).map_err(|e| Error::corrupt(&path, e.to_string()))?;
    let mut f = File::create(&path).map_err(|e| Error::storage(&path, e))?;
    f.write_all(json.as_bytes()).map_err(|e| Error::storage(&path, e))?;
    Ok(())
}

pub fn load_meta(paths: &IndexPaths) -> Result<MetaFile> {
    let path = paths.meta();
    let mut f = File::open(&path).map_err(|e| Error::storage(&path, e))?;
    let mut buf = String::new();
    f.read_to_string(&mut buf).map_err(|e| Error::storage(&path, e))?;
    let meta: MetaFile = serde_json::from_str(&buf).map_err(|e| Error::corrupt(&path, e.to_string()))?;
    Ok(meta)
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
