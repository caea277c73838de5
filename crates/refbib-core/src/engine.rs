//! Citation engine seam
//!
//! The resolution pipeline renders citations and bibliographies through
//! the [`CitationEngine`] trait so the actual formatter is pluggable. A
//! built-in author-year engine covers the common case; embedders that
//! link a full CSL processor implement [`EngineFactory`] instead.

use crate::error::{RefbibError, Result};
use crate::styles::StyleResolver;
use refbib_domain::{CitationCluster, Record, RenderedCitation, UNTITLED};
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves a record id to its cached record.
pub type RecordLookup = Arc<dyn Fn(&str) -> Option<Arc<Record>> + Send + Sync>;

/// Resolves a normalized locale code to cached locale XML.
pub type LocaleLookup = Arc<dyn Fn(&str) -> Option<Arc<str>> + Send + Sync>;

/// A formatted bibliography: wrapper markup plus one entry per record,
/// keyed by record id.
#[derive(Debug, Clone, PartialEq)]
pub struct Bibliography {
    pub bib_start: String,
    pub bib_end: String,
    pub entries: Vec<(String, String)>,
}

impl Bibliography {
    pub fn to_html(&self) -> String {
        let mut out = String::from(&self.bib_start);
        for (_, entry) in &self.entries {
            out.push_str(entry);
        }
        out.push_str(&self.bib_end);
        out
    }
}

/// A stateful formatter bound to one style, locale, and record set.
pub trait CitationEngine: Send + Sync {
    /// Render each cluster to inline markup. Clusters whose items cannot
    /// all be resolved render as `None`.
    fn render_citations(&self, clusters: &[CitationCluster]) -> Vec<RenderedCitation>;

    /// Format a bibliography for the given record ids. Returns `None`
    /// when no id resolves.
    fn make_bibliography(&self, ids: &[String]) -> Option<Bibliography>;
}

/// Everything an [`EngineFactory`] needs to construct an engine.
pub struct EngineInputs {
    pub style_text: Arc<str>,
    pub locale_codes: Vec<String>,
    pub locales: LocaleLookup,
    pub records: RecordLookup,
}

/// Builds engines from resolved style and locale text.
pub trait EngineFactory: Send + Sync {
    fn build(&self, inputs: EngineInputs) -> Result<Box<dyn CitationEngine>>;
}

/// Construct an engine from already-resolved caches. Style and locale
/// text must be present in the resolver's memory tier; a miss is a
/// contract violation, not a recoverable fetch.
pub fn build_engine(
    factory: &dyn EngineFactory,
    resolver: &StyleResolver,
    style_key: &str,
    locale_codes: &[String],
    records: RecordLookup,
) -> Result<Box<dyn CitationEngine>> {
    let style_text = resolver.cached_style(style_key).ok_or_else(|| {
        RefbibError::InvalidState(format!("style '{style_key}' is not in the style cache"))
    })?;
    for code in locale_codes {
        if resolver.cached_locale(code).is_none() {
            return Err(RefbibError::InvalidState(format!(
                "locale '{code}' is not in the locale cache"
            )));
        }
    }

    let lookup: HashMap<String, Arc<str>> = locale_codes
        .iter()
        .filter_map(|c| resolver.cached_locale(c).map(|t| (c.clone(), t)))
        .collect();
    let locales: LocaleLookup = Arc::new(move |code| lookup.get(code).cloned());

    factory.build(EngineInputs {
        style_text,
        locale_codes: locale_codes.to_vec(),
        locales,
        records,
    })
}

/// Factory for the built-in author-year engine.
pub struct AuthorYearFactory;

impl EngineFactory for AuthorYearFactory {
    fn build(&self, inputs: EngineInputs) -> Result<Box<dyn CitationEngine>> {
        Ok(Box::new(AuthorYearEngine {
            records: inputs.records,
        }))
    }
}

/// Minimal author-year formatter: `(Family Year)` inline citations and
/// `csl-entry` div bibliography entries sorted by author, year, title.
struct AuthorYearEngine {
    records: RecordLookup,
}

impl AuthorYearEngine {
    fn inline_label(&self, record: &Record) -> String {
        let family = record
            .first_author_family()
            .map(str::to_string)
            .unwrap_or_else(|| record.title.clone());
        match &record.year {
            Some(year) => format!("{family} {year}"),
            None => format!("{family} n.d."),
        }
    }

    fn entry_html(&self, record: &Record) -> String {
        let mut parts: Vec<String> = Vec::new();
        let authors: Vec<String> = record
            .authors
            .iter()
            .filter_map(|a| {
                let family = a.family.as_deref()?;
                Some(match a.given.as_deref() {
                    Some(given) => format!("{family}, {given}"),
                    None => family.to_string(),
                })
            })
            .collect();
        if !authors.is_empty() {
            parts.push(authors.join("; "));
        }
        if let Some(year) = &record.year {
            parts.push(format!("({year})"));
        }
        if record.title != UNTITLED || parts.is_empty() {
            parts.push(record.title.clone());
        }
        if let Some(container) = &record.container_title {
            parts.push(format!("<i>{container}</i>"));
        }
        if let Some(doi) = &record.doi {
            parts.push(format!("https://doi.org/{doi}"));
        }
        format!(
            "<div class=\"csl-entry\" id=\"{}\">{}.</div>",
            record.id,
            parts.join(". ")
        )
    }
}

impl CitationEngine for AuthorYearEngine {
    fn render_citations(&self, clusters: &[CitationCluster]) -> Vec<RenderedCitation> {
        clusters
            .iter()
            .map(|cluster| {
                let mut labels: Vec<String> = Vec::with_capacity(cluster.items.len());
                let mut complete = true;
                for item in &cluster.items {
                    match (self.records)(&item.id) {
                        Some(record) => {
                            let label = if item.suppress_author {
                                record.year.clone().unwrap_or_else(|| "n.d.".to_string())
                            } else {
                                self.inline_label(&record)
                            };
                            let mut piece = String::new();
                            if let Some(prefix) = &item.prefix {
                                piece.push_str(prefix);
                                piece.push(' ');
                            }
                            piece.push_str(&label);
                            if let Some(locator) = &item.locator {
                                piece.push_str(", ");
                                piece.push_str(locator);
                            }
                            if let Some(suffix) = &item.suffix {
                                piece.push_str(", ");
                                piece.push_str(suffix);
                            }
                            labels.push(piece);
                        }
                        None => {
                            complete = false;
                            break;
                        }
                    }
                }
                RenderedCitation {
                    cluster: cluster.clone(),
                    markup: complete.then(|| format!("({})", labels.join("; "))),
                    note_index: None,
                }
            })
            .collect()
    }

    fn make_bibliography(&self, ids: &[String]) -> Option<Bibliography> {
        let mut records: Vec<Arc<Record>> = ids.iter().filter_map(|id| (self.records)(id)).collect();
        if records.is_empty() {
            return None;
        }
        records.sort_by(|a, b| {
            let key = |r: &Record| {
                (
                    r.first_author_family().map(str::to_string).unwrap_or_default(),
                    r.year.clone().unwrap_or_default(),
                    r.title.clone(),
                )
            };
            key(a).cmp(&key(b))
        });
        Some(Bibliography {
            bib_start: "<div class=\"csl-bib-body\">".to_string(),
            bib_end: "</div>".to_string(),
            entries: records
                .iter()
                .map(|r| (r.id.clone(), self.entry_html(r)))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refbib_domain::{ClusterItem, RecordAuthor};

    fn lookup(records: Vec<Record>) -> RecordLookup {
        let map: HashMap<String, Arc<Record>> = records
            .into_iter()
            .map(|r| (r.id.clone(), Arc::new(r)))
            .collect();
        Arc::new(move |id| map.get(id).cloned())
    }

    fn engine(records: Vec<Record>) -> Box<dyn CitationEngine> {
        Box::new(AuthorYearEngine {
            records: lookup(records),
        })
    }

    fn doe2020() -> Record {
        Record::new("doe2020", "article")
            .with_title("On Things")
            .with_year("2020")
            .with_authors(vec![RecordAuthor::new("Doe").with_given("Jane")])
    }

    fn cluster(ids: &[&str]) -> CitationCluster {
        CitationCluster {
            items: ids
                .iter()
                .map(|id| ClusterItem {
                    id: id.to_string(),
                    locator: None,
                    prefix: None,
                    suffix: None,
                    suppress_author: false,
                })
                .collect(),
            from: 0,
            to: 0,
        }
    }

    #[test]
    fn test_inline_author_year() {
        let engine = engine(vec![doe2020()]);
        let rendered = engine.render_citations(&[cluster(&["doe2020"])]);
        assert_eq!(rendered[0].markup.as_deref(), Some("(Doe 2020)"));
    }

    #[test]
    fn test_cluster_with_unknown_key_renders_none() {
        let engine = engine(vec![doe2020()]);
        let rendered = engine.render_citations(&[cluster(&["doe2020", "nope"])]);
        assert_eq!(rendered[0].markup, None);
    }

    #[test]
    fn test_bibliography_sorted_and_wrapped() {
        let smith = Record::new("smith2019", "article")
            .with_year("2019")
            .with_authors(vec![RecordAuthor::new("Smith")]);
        let engine = engine(vec![doe2020(), smith]);
        let bib = engine
            .make_bibliography(&["smith2019".to_string(), "doe2020".to_string()])
            .unwrap();
        assert_eq!(bib.entries[0].0, "doe2020");
        assert_eq!(bib.entries[1].0, "smith2019");
        assert!(bib.to_html().starts_with("<div class=\"csl-bib-body\">"));
        assert!(bib.to_html().ends_with("</div>"));
    }

    #[test]
    fn test_bibliography_none_when_nothing_resolves() {
        let engine = engine(vec![]);
        assert!(engine.make_bibliography(&["x".to_string()]).is_none());
    }

    #[tokio::test]
    async fn test_build_engine_requires_cached_style() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = StyleResolver::new(dir.path().to_path_buf()).unwrap();
        let err = build_engine(
            &AuthorYearFactory,
            &resolver,
            "missing-style",
            &[],
            lookup(vec![]),
        )
        .err()
        .unwrap();
        assert!(matches!(err, RefbibError::InvalidState(_)));
    }
}
