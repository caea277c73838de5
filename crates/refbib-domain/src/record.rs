//! Canonical record model

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Placeholder title used when a source entry carries no title.
pub const UNTITLED: &str = "Untitled";

/// An author of a bibliographic record.
///
/// Either part may be absent; sources that only provide a single name put
/// it in `family`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAuthor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given: Option<String>,
}

impl RecordAuthor {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: Some(family.into()),
            given: None,
        }
    }

    pub fn with_given(mut self, given: impl Into<String>) -> Self {
        self.given = Some(given.into());
        self
    }
}

/// A normalized bibliographic entry with a stable citation key.
///
/// Records are immutable value objects: caches replace them wholesale and
/// never mutate one in place. The `id` is unique within any single cache
/// snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Citation key.
    pub id: String,
    /// Entry type tag ("article", "book", ...).
    #[serde(default, rename = "type")]
    pub record_type: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty", rename = "author")]
    pub authors: Vec<RecordAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        alias = "journal",
        alias = "container-title"
    )]
    pub container_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "issue")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "page")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "DOI")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "URL")]
    pub url: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "abstract"
    )]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Attached-file path references, usually parsed out of a `file` field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<String>,
    /// Owning remote library/group id, when the record came from a remote
    /// reference manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<i64>,
    /// Originating bibliography file, for edit-jump.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
    /// 1-based line of the entry header in `source_file`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_line: Option<u32>,
    /// Date the entry was added to its source, as the source recorded it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<String>,
}

fn default_title() -> String {
    UNTITLED.to_string()
}

impl Record {
    /// Create a record with the required fields; everything else empty.
    pub fn new(id: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            title: default_title(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_year(mut self, year: impl Into<String>) -> Self {
        self.year = Some(year.into());
        self
    }

    pub fn with_authors(mut self, authors: Vec<RecordAuthor>) -> Self {
        self.authors = authors;
        self
    }

    /// First author's family name, if any.
    pub fn first_author_family(&self) -> Option<&str> {
        self.authors.first().and_then(|a| a.family.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_title_defaults_to_sentinel() {
        let rec: Record = serde_json::from_str(r#"{"id":"x","type":"article"}"#).unwrap();
        assert_eq!(rec.title, UNTITLED);
    }

    #[test]
    fn test_container_title_aliases() {
        let a: Record =
            serde_json::from_str(r#"{"id":"a","journal":"Nature"}"#).unwrap();
        let b: Record =
            serde_json::from_str(r#"{"id":"b","container-title":"Nature"}"#).unwrap();
        assert_eq!(a.container_title.as_deref(), Some("Nature"));
        assert_eq!(b.container_title.as_deref(), Some("Nature"));
    }

    #[test]
    fn test_roundtrip_canonical_shape() {
        let rec = Record::new("doe2020", "article")
            .with_title("Foo")
            .with_year("2020")
            .with_authors(vec![RecordAuthor::new("Doe").with_given("Jane")]);
        let json = serde_json::to_string(&rec).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(rec, back);
    }
}
