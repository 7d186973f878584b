use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type TermId = u32;
pub type DocId = u32;

/// Number of weighted sections tracked per posting.
pub const SECTION_COUNT: usize = 3;

/// Column order of a stored document record.
pub const RECORD_FIELDS: [&str; 6] = ["title", "abstract", "year", "keywords", "n_citation", "url"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Title = 0,
    Abstract = 1,
    Keywords = 2,
}

impl Section {
    pub const ALL: [Section; SECTION_COUNT] = [Section::Title, Section::Abstract, Section::Keywords];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// One document's statistics for one term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Posting {
    #[serde(rename = "DocumentID")]
    pub doc_id: DocId,
    pub byte_offset: u64,
    /// Token counts of title, abstract and keywords.
    pub length: [u32; SECTION_COUNT],
    /// Occurrences of the term per section, same order as `length`.
    pub frequency: [u32; SECTION_COUNT],
    /// Zero-based positions of the term inside the abstract.
    pub positions: Vec<u32>,
}

impl Posting {
    pub fn doc_length(&self) -> u32 {
        self.length.iter().sum()
    }
}

/// Raw paper record as stored in the document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub year: String,
    pub keywords: String,
    pub n_citation: String,
    pub url: String,
}

impl DocumentRecord {
    /// Build a record from loosely typed request fields.
    ///
    /// Every field in [`RECORD_FIELDS`] must be present and non-null. Numbers are
    /// kept in their textual form; a keyword list is joined with commas.
    pub fn from_fields(fields: &Map<String, Value>) -> Result<Self> {
        let missing: Vec<&str> = RECORD_FIELDS
            .iter()
            .copied()
            .filter(|name| fields.get(*name).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return Err(Error::Validation(format!("missing required fields: {}", missing.join(", "))));
        }

        let mut values = Vec::with_capacity(RECORD_FIELDS.len());
        for name in RECORD_FIELDS {
            values.push(field_text(name, &fields[name])?);
        }
        let record = Self::from_columns(values)?;
        record.check_storable()?;
        Ok(record)
    }

    pub(crate) fn from_columns(columns: Vec<String>) -> Result<Self> {
        let [title, abstract_text, year, keywords, n_citation, url]: [String; 6] = columns
            .try_into()
            .map_err(|cols: Vec<String>| Error::Validation(format!("expected {} fields, got {}", RECORD_FIELDS.len(), cols.len())))?;
        Ok(Self { title, abstract_text, year, keywords, n_citation, url })
    }

    pub fn columns(&self) -> [&str; 6] {
        [&self.title, &self.abstract_text, &self.year, &self.keywords, &self.n_citation, &self.url]
    }

    /// Rejects values that would break the one-line, pipe-delimited store format.
    pub fn check_storable(&self) -> Result<()> {
        for (name, value) in RECORD_FIELDS.iter().zip(self.columns()) {
            if value.contains(crate::doc_store::DELIMITER) || value.contains(['\n', '\r']) {
                return Err(Error::Validation(format!("field `{name}` contains a delimiter or line break")));
            }
        }
        Ok(())
    }

    /// Replace delimiters and line breaks with spaces, as the corpus cleaning stage does.
    pub fn sanitized(self) -> Self {
        let clean = |s: String| s.replace([crate::doc_store::DELIMITER, '\n', '\r'], " ");
        Self {
            title: clean(self.title),
            abstract_text: clean(self.abstract_text),
            year: clean(self.year),
            keywords: clean(self.keywords),
            n_citation: clean(self.n_citation),
            url: clean(self.url),
        }
    }
}

fn field_text(name: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => parts.push(s.clone()),
                    Value::Number(n) => parts.push(n.to_string()),
                    _ => return Err(Error::Validation(format!("field `{name}` must be a list of strings"))),
                }
            }
            Ok(parts.join(","))
        }
        Value::Null | Value::Object(_) => Err(Error::Validation(format!("field `{name}` has an unsupported type"))),
    }
}
