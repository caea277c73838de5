//! Per-document scope settings
//!
//! A document can override the global style, language, or bibliography
//! set through its metadata block. Two scopes that compare equal bind to
//! the same records, index, and engine.

use serde::Serialize;
use std::path::Path;

/// Document-level overrides extracted from metadata. Equality is value
/// equality; the pipeline reuses a binding whenever the scope is
/// unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ScopeSettings {
    /// Style id, URL, or path override.
    pub style: Option<String>,
    /// Locale code override.
    pub lang: Option<String>,
    /// Bibliography files replacing the global sources.
    pub bibliography: Option<Vec<String>>,
}

impl ScopeSettings {
    pub fn is_empty(&self) -> bool {
        self.style.is_none() && self.lang.is_none() && self.bibliography.is_none()
    }
}

/// Extract scope overrides from document metadata. Returns `None` when
/// the metadata carries no recognized key, meaning the document uses the
/// global binding.
///
/// Recognized keys: `bibliography` (string with comma-separated paths,
/// or array of strings), `csl` / `citation-style`, `lang` /
/// `citation-language`. Relative bibliography paths are resolved
/// against the document directory when a file exists there.
pub fn resolve_scope(meta: &serde_json::Value, doc_dir: &Path) -> Option<ScopeSettings> {
    let obj = meta.as_object()?;

    let style = string_value(obj.get("csl").or_else(|| obj.get("citation-style")));
    let lang = string_value(obj.get("lang").or_else(|| obj.get("citation-language")));

    let bibliography = obj.get("bibliography").and_then(|value| {
        let raw: Vec<String> = match value {
            serde_json::Value::String(s) => s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect(),
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.into_iter()
                .map(|p| anchor_path(&p, doc_dir))
                .collect::<Vec<_>>(),
        )
    });

    let scope = ScopeSettings {
        style,
        lang,
        bibliography,
    };
    if scope.is_empty() {
        None
    } else {
        Some(scope)
    }
}

fn string_value(value: Option<&serde_json::Value>) -> Option<String> {
    value
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// A relative path is anchored to the document directory when the file
/// exists there; otherwise the raw path is kept for the loader's
/// project-root retry.
fn anchor_path(raw: &str, doc_dir: &Path) -> String {
    let path = Path::new(raw);
    if path.is_absolute() {
        return raw.to_string();
    }
    let anchored = doc_dir.join(path);
    if anchored.exists() {
        anchored.to_string_lossy().into_owned()
    } else {
        raw.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_no_recognized_keys_is_none() {
        let meta = json!({ "title": "My Doc" });
        assert!(resolve_scope(&meta, Path::new("/docs")).is_none());
    }

    #[test]
    fn test_style_and_lang_aliases() {
        let meta = json!({ "citation-style": "apa.csl", "lang": "de-DE" });
        let scope = resolve_scope(&meta, Path::new("/docs")).unwrap();
        assert_eq!(scope.style.as_deref(), Some("apa.csl"));
        assert_eq!(scope.lang.as_deref(), Some("de-DE"));
    }

    #[test]
    fn test_bibliography_string_splits_on_commas() {
        let meta = json!({ "bibliography": "a.bib, b.bib" });
        let scope = resolve_scope(&meta, Path::new("/docs")).unwrap();
        assert_eq!(
            scope.bibliography,
            Some(vec!["a.bib".to_string(), "b.bib".to_string()])
        );
    }

    #[test]
    fn test_bibliography_array_form() {
        let meta = json!({ "bibliography": ["a.bib", "b.bib"] });
        let scope = resolve_scope(&meta, Path::new("/docs")).unwrap();
        assert_eq!(scope.bibliography.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_relative_path_anchored_when_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("local.bib"), "@misc{x,}").unwrap();
        let meta = json!({ "bibliography": "local.bib" });
        let scope = resolve_scope(&meta, dir.path()).unwrap();
        let resolved = &scope.bibliography.unwrap()[0];
        assert!(Path::new(resolved).is_absolute());
        assert!(resolved.ends_with("local.bib"));
    }

    #[test]
    fn test_scope_equality_drives_reuse() {
        let meta = json!({ "csl": "apa.csl" });
        let a = resolve_scope(&meta, Path::new("/docs")).unwrap();
        let b = resolve_scope(&meta, Path::new("/docs")).unwrap();
        assert_eq!(a, b);
    }
}
