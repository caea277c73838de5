//! Tolerant BibTeX scanning and record extraction
//!
//! This crate deliberately does not implement a strict BibTeX grammar. It
//! scans loose text (pasted references, converter source files, model
//! output) for `@type{key,` entry headers and walks each entry with a
//! brace-depth counter, so nested braces inside field values are spanned
//! correctly. Malformed entries are skipped, never fatal.
//!
//! The same scanner backs two consumers:
//! - `extract_records`: turn free text into canonical [`Record`]s
//! - `scan_extras`: recover fields an external converter drops
//!   (attachment paths, entry line numbers, add-dates)

mod author;
mod extract;
mod scanner;

pub use author::parse_author_field;
pub use extract::extract_records;
pub use scanner::{extract_field, scan_entries, scan_extras, EntryExtras, RawEntry};
