//! Brace-depth entry scanning
//!
//! An entry begins at `@type{key,` and ends where the brace depth opened by
//! the header returns to zero. Scanning character-by-character with a depth
//! counter spans nested braces inside field values, which a "find the next
//! closing brace" approach would truncate.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref ENTRY_HEADER: Regex = Regex::new(r"@(\w+)\s*\{\s*([^,\s}]+)\s*,").unwrap();
}

/// One entry located in the scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry<'a> {
    /// Entry type, lowercased ("article", "book", ...).
    pub entry_type: String,
    /// Citation key.
    pub key: String,
    /// Entry body between the header and the matching closing brace.
    pub body: &'a str,
    /// 1-based line of the entry header.
    pub line: u32,
}

/// Fields recovered from a raw source that converters tend to drop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryExtras {
    pub line: u32,
    pub file: Option<String>,
    pub added: Option<String>,
}

/// Scan text for entries. Entries whose closing brace is never found are
/// skipped.
pub fn scan_entries(text: &str) -> Vec<RawEntry<'_>> {
    let mut entries = Vec::new();

    for caps in ENTRY_HEADER.captures_iter(text) {
        let whole = caps.get(0).expect("capture 0 always present");
        let body_start = whole.end();

        // Depth 1 from the header's opening brace; body ends where it
        // closes.
        let mut depth = 1i32;
        let mut body_end = None;
        for (i, ch) in text[body_start..].char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        body_end = Some(body_start + i);
                        break;
                    }
                }
                _ => {}
            }
        }

        let Some(body_end) = body_end else {
            continue;
        };

        let line = text[..whole.start()].matches('\n').count() as u32 + 1;
        entries.push(RawEntry {
            entry_type: caps[1].to_lowercase(),
            key: caps[2].trim().to_string(),
            body: &text[body_start..body_end],
            line,
        });
    }

    entries
}

/// Locate a field by case-insensitive `name = ` and read its value.
///
/// The value is brace-delimited (depth-tracked, so `{34\%}` inside a braced
/// value is read whole), else quote-delimited, else a bare token terminated
/// by comma, brace, or whitespace. Whitespace runs inside the value are
/// collapsed.
pub fn extract_field(body: &str, name: &str) -> Option<String> {
    let pattern = format!(r"(?i)\b{}\s*=\s*", regex::escape(name));
    let re = Regex::new(&pattern).ok()?;
    let m = re.find(body)?;
    let rest = body[m.end()..].trim_start();

    let value = if let Some(inner) = rest.strip_prefix('{') {
        let mut depth = 1i32;
        let mut end = None;
        for (i, ch) in inner.char_indices() {
            match ch {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        inner[..end?].to_string()
    } else if let Some(inner) = rest.strip_prefix('"') {
        inner[..inner.find('"')?].to_string()
    } else {
        let end = rest
            .find(|c: char| c == ',' || c == '}' || c.is_whitespace())
            .unwrap_or(rest.len());
        if end == 0 {
            return None;
        }
        rest[..end].to_string()
    };

    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Re-scan raw bibliography text for per-entry extras keyed by citation
/// key: header line number, `file` attachment field, and add-date.
pub fn scan_extras(text: &str) -> HashMap<String, EntryExtras> {
    let mut extras = HashMap::new();
    for entry in scan_entries(text) {
        extras.insert(
            entry.key.clone(),
            EntryExtras {
                line: entry.line,
                file: extract_field(entry.body, "file"),
                added: extract_field(entry.body, "add_date"),
            },
        );
    }
    extras
}
