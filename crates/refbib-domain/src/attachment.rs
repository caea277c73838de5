//! Attachment reference parsing
//!
//! BibTeX managers store attachments in a `file` field shaped like
//! `description:path:type;description:path:type`. Only the path segment is
//! of interest, and only document formats are kept.

use std::path::Path;

const DOCUMENT_EXTENSIONS: [&str; 2] = ["pdf", "epub"];

/// Split a `file` field into attachment paths.
///
/// Each `;`-separated piece is either a bare path or a
/// `description:path:type` triple. Surrounding braces and quotes are
/// stripped. Relative paths are resolved against `root` when given.
pub fn parse_file_field(field: &str, root: Option<&Path>) -> Vec<String> {
    let mut paths = Vec::new();
    for piece in field.split(';') {
        let parts: Vec<&str> = piece.split(':').collect();
        let raw = if parts.len() >= 2 { parts[1] } else { piece };
        let cleaned = raw
            .trim()
            .trim_matches(|c| c == '{' || c == '}' || c == '"')
            .trim();
        if cleaned.is_empty() {
            continue;
        }
        let path = Path::new(cleaned);
        let resolved = match root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        };
        if has_document_extension(&resolved) {
            paths.push(resolved.to_string_lossy().into_owned());
        }
    }
    paths
}

fn has_document_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            DOCUMENT_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_bare_path() {
        let paths = parse_file_field("/home/u/papers/doe2020.pdf", None);
        assert_eq!(paths, vec!["/home/u/papers/doe2020.pdf"]);
    }

    #[test]
    fn test_triple_format() {
        let paths = parse_file_field("Full Text:/papers/a.pdf:application/pdf", None);
        assert_eq!(paths, vec!["/papers/a.pdf"]);
    }

    #[test]
    fn test_multiple_and_filtering() {
        let paths = parse_file_field(
            "desc:/papers/a.pdf:pdf;notes:/papers/a.txt:text;{/papers/b.epub}",
            None,
        );
        assert_eq!(paths, vec!["/papers/a.pdf", "/papers/b.epub"]);
    }

    #[test]
    fn test_relative_resolved_against_root() {
        let root = PathBuf::from("/vault");
        let paths = parse_file_field("papers/a.pdf", Some(&root));
        assert_eq!(paths, vec!["/vault/papers/a.pdf"]);
    }
}
