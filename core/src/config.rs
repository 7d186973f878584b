use crate::error::{Error, Result};
use crate::index::DocId;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_BARREL_COUNT: u32 = 120;
/// Offline approximation of the corpus size, not a live count.
pub const DEFAULT_CORPUS_SIZE: u32 = 200_000;
/// Empirical average token count per document, computed offline.
pub const DEFAULT_AVG_DOC_LENGTH: f64 = 112.766185;
pub const DEFAULT_K1: f64 = 1.5;
pub const DEFAULT_B: f64 = 0.75;

/// Curated results served when a query matches nothing: (document id, byte offset).
pub const DEFAULT_FALLBACK: [(DocId, u64); 10] = [
    (6835, 9040287),
    (124369, 173489852),
    (22679, 29713425),
    (33470, 44328753),
    (21085, 27681541),
    (24494, 32075782),
    (167004, 232005384),
    (5229, 7111431),
    (3885, 5416440),
    (4112, 5708273),
];

/// Per-section multipliers for the weighted term frequency.
///
/// Keyword matches are multiplied by `keywords` and then divided by
/// `keywords_divisor`, so with the defaults a keyword hit is worth 3/5 of an
/// abstract hit while a title hit is worth 5.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionWeights {
    pub title: f64,
    #[serde(rename = "abstract")]
    pub abstract_: f64,
    pub keywords: f64,
    pub keywords_divisor: f64,
}

impl Default for SectionWeights {
    fn default() -> Self {
        Self { title: 5.0, abstract_: 1.0, keywords: 3.0, keywords_divisor: 5.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub barrel_count: u32,
    pub corpus_size: u32,
    pub avg_doc_length: f64,
    pub k1: f64,
    pub b: f64,
    pub section_weights: SectionWeights,
    pub fallback: Vec<(DocId, u64)>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            barrel_count: DEFAULT_BARREL_COUNT,
            corpus_size: DEFAULT_CORPUS_SIZE,
            avg_doc_length: DEFAULT_AVG_DOC_LENGTH,
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            section_weights: SectionWeights::default(),
            fallback: DEFAULT_FALLBACK.to_vec(),
        }
    }
}

impl IndexConfig {
    /// Load a JSON config file. Missing keys keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::storage(path, e))?;
        let config: IndexConfig =
            serde_json::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.barrel_count == 0 {
            return Err(Error::Config("barrel_count must be positive".into()));
        }
        if self.corpus_size == 0 {
            return Err(Error::Config("corpus_size must be positive".into()));
        }
        if !(self.avg_doc_length > 0.0) {
            return Err(Error::Config("avg_doc_length must be positive".into()));
        }
        if !(self.k1 >= 0.0) {
            return Err(Error::Config("k1 must not be negative".into()));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::Config("b must lie in [0, 1]".into()));
        }
        if !(self.section_weights.keywords_divisor > 0.0) {
            return Err(Error::Config("section_weights.keywords_divisor must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let c = IndexConfig::default();
        assert_eq!(c.barrel_count, 120);
        assert_eq!(c.corpus_size, 200_000);
        assert_eq!(c.avg_doc_length, 112.766185);
        assert_eq!(c.k1, 1.5);
        assert_eq!(c.b, 0.75);
        assert_eq!(c.fallback.len(), 10);
        c.validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "barrel_count": 8, "section_weights": { "title": 2.0 } }"#).unwrap();
        let c = IndexConfig::from_json_file(&path).unwrap();
        assert_eq!(c.barrel_count, 8);
        assert_eq!(c.section_weights.title, 2.0);
        assert_eq!(c.section_weights.keywords_divisor, 5.0);
        assert_eq!(c.k1, 1.5);
    }

    #[test]
    fn rejects_zero_barrels() {
        let c = IndexConfig { barrel_count: 0, ..IndexConfig::default() };
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }
}
