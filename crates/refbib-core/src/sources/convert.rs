//! Converter output normalization
//!
//! The external converter and the remote export endpoint both emit
//! CSL-JSON item arrays. [`RawConverterRecord`] accepts that shape
//! loosely (field aliases, year buried in `issued` date-parts, keyword
//! strings) and normalizes into the canonical [`Record`].

use refbib_domain::{Record, RecordAuthor, UNTITLED};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawName {
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub given: Option<String>,
    /// Corporate or single-token names come through as `literal`.
    #[serde(default)]
    pub literal: Option<String>,
}

impl RawName {
    fn into_author(self) -> RecordAuthor {
        RecordAuthor {
            family: self.family.or(self.literal),
            given: self.given,
        }
    }
}

/// One item as the converter or remote emits it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConverterRecord {
    #[serde(alias = "citekey", alias = "citation-key")]
    pub id: String,
    #[serde(default, rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Vec<RawName>,
    /// CSL date variable; year lives in `date-parts[0][0]` or `raw`.
    #[serde(default)]
    pub issued: Option<Value>,
    #[serde(default, alias = "journal", alias = "booktitle", rename = "container-title")]
    pub container_title: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub volume: Option<Value>,
    #[serde(default, alias = "number")]
    pub issue: Option<Value>,
    #[serde(default, alias = "pages")]
    pub page: Option<String>,
    #[serde(default, rename = "DOI")]
    pub doi: Option<String>,
    #[serde(default, rename = "URL")]
    pub url: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    /// Comma or semicolon separated keyword string.
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default, rename = "groupID")]
    pub group_id: Option<i64>,
}

impl RawConverterRecord {
    pub fn into_record(self) -> Record {
        Record {
            id: self.id,
            record_type: self.record_type,
            title: self
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| UNTITLED.to_string()),
            authors: self.author.into_iter().map(RawName::into_author).collect(),
            year: self.issued.as_ref().and_then(issued_year),
            container_title: self.container_title,
            publisher: self.publisher,
            volume: self.volume.as_ref().and_then(scalar_string),
            number: self.issue.as_ref().and_then(scalar_string),
            pages: self.page,
            doi: self.doi,
            url: self.url,
            abstract_text: self.abstract_text,
            note: self.note,
            keywords: self
                .keyword
                .map(|k| {
                    k.split(|c| c == ',' || c == ';')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            attachments: Vec::new(),
            group_id: self.group_id,
            source_file: None,
            source_line: None,
            added: None,
        }
    }
}

/// Year from a CSL `issued` value: `date-parts[0][0]`, `raw`, or a bare
/// string/number.
fn issued_year(issued: &Value) -> Option<String> {
    if let Some(parts) = issued.get("date-parts") {
        let year = parts.get(0)?.get(0)?;
        return scalar_string(year);
    }
    if let Some(raw) = issued.get("raw").and_then(Value::as_str) {
        let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.len() == 4 {
            return Some(digits);
        }
        return Some(raw.to_string());
    }
    scalar_string(issued)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a converter/remote payload: a CSL-JSON item array.
pub fn records_from_json(data: &str) -> Result<Vec<Record>, serde_json::Error> {
    let raw: Vec<RawConverterRecord> = serde_json::from_str(data)?;
    Ok(raw.into_iter().map(RawConverterRecord::into_record).collect())
}
