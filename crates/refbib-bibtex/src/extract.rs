//! Free-text record extraction

use crate::author::parse_author_field;
use crate::scanner::{extract_field, scan_entries};
use refbib_domain::Record;

/// Extract canonical records from loose text.
///
/// Commentary and markdown code fences around the entries are tolerated;
/// anything that is not part of an `@type{key,` entry is ignored.
pub fn extract_records(text: &str) -> Vec<Record> {
    let cleaned = strip_code_fences(text);
    let mut records = Vec::new();

    for entry in scan_entries(&cleaned) {
        let mut record = Record::new(entry.key, entry.entry_type);

        if let Some(title) = extract_field(entry.body, "title") {
            record.title = title;
        }
        if let Some(author) = extract_field(entry.body, "author") {
            record.authors = parse_author_field(&author);
        }
        record.year = extract_field(entry.body, "year");
        record.container_title = extract_field(entry.body, "journal")
            .or_else(|| extract_field(entry.body, "booktitle"));
        record.doi = extract_field(entry.body, "doi");
        record.url = extract_field(entry.body, "url");
        record.abstract_text = extract_field(entry.body, "abstract");
        record.note = extract_field(entry.body, "note");
        record.publisher = extract_field(entry.body, "publisher");

        records.push(record);
    }

    records
}

/// Drop markdown fence markers without touching entry content. A `%` can
/// legitimately appear inside values, so no comment stripping happens here.
fn strip_code_fences(text: &str) -> String {
    text.replace("```bibtex", "").replace("```", "")
}
