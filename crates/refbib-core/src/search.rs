//! Fuzzy suggestion index over cached records
//!
//! Immutable by construction: refreshes build a new index and publish it
//! whole, so readers never observe a partially updated one. Matching is
//! weighted Jaro-Winkler over citekey, title, and author names, with a
//! hard boost for prefix matches so short queries behave like
//! autocomplete.

use refbib_domain::Record;
use std::sync::Arc;
use strsim::jaro_winkler;

const WEIGHT_ID: f64 = 0.7;
const WEIGHT_TITLE: f64 = 0.3;
const WEIGHT_FAMILY: f64 = 0.2;
const WEIGHT_GIVEN: f64 = 0.1;

/// Minimum similarity for a field to contribute to the score.
const SIMILARITY_THRESHOLD: f64 = 0.65;

/// Queries shorter than this return nothing.
pub const MIN_QUERY_LEN: usize = 2;

struct IndexEntry {
    record: Arc<Record>,
    id_lower: String,
    title_lower: String,
    families: Vec<String>,
    givens: Vec<String>,
}

impl IndexEntry {
    fn new(record: Arc<Record>) -> Self {
        Self {
            id_lower: record.id.to_lowercase(),
            title_lower: record.title.to_lowercase(),
            families: record
                .authors
                .iter()
                .filter_map(|a| a.family.as_deref())
                .map(str::to_lowercase)
                .collect(),
            givens: record
                .authors
                .iter()
                .filter_map(|a| a.given.as_deref())
                .map(str::to_lowercase)
                .collect(),
            record,
        }
    }

    fn score(&self, query: &str) -> f64 {
        let mut score = field_score(&self.id_lower, query) * WEIGHT_ID;
        score += field_score(&self.title_lower, query) * WEIGHT_TITLE;
        score += self
            .families
            .iter()
            .map(|f| field_score(f, query))
            .fold(0.0, f64::max)
            * WEIGHT_FAMILY;
        score += self
            .givens
            .iter()
            .map(|g| field_score(g, query))
            .fold(0.0, f64::max)
            * WEIGHT_GIVEN;
        score
    }
}

/// Similarity of one field against the query. A prefix match is a full
/// hit regardless of length difference; otherwise Jaro-Winkler gated by
/// the threshold.
fn field_score(field: &str, query: &str) -> f64 {
    if field.is_empty() {
        return 0.0;
    }
    if field.starts_with(query) {
        return 1.0;
    }
    let similarity = jaro_winkler(field, query);
    if similarity >= SIMILARITY_THRESHOLD {
        similarity
    } else {
        0.0
    }
}

pub struct SearchIndex {
    entries: Vec<IndexEntry>,
}

impl SearchIndex {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn build<I>(records: I) -> Self
    where
        I: IntoIterator<Item = Arc<Record>>,
    {
        Self {
            entries: records.into_iter().map(IndexEntry::new).collect(),
        }
    }

    /// A new index with the given records replacing any existing entries
    /// with the same id and appended otherwise.
    pub fn with_upserted(&self, records: &[Arc<Record>]) -> Self {
        let mut entries: Vec<IndexEntry> = self
            .entries
            .iter()
            .filter(|e| !records.iter().any(|r| r.id == e.record.id))
            .map(|e| IndexEntry::new(e.record.clone()))
            .collect();
        entries.extend(records.iter().cloned().map(IndexEntry::new));
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `limit` matches for the query, best first.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Arc<Record>> {
        let query = query.trim().to_lowercase();
        if query.len() < MIN_QUERY_LEN || limit == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &IndexEntry)> = self
            .entries
            .iter()
            .map(|e| (e.score(&query), e))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, e)| e.record.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refbib_domain::RecordAuthor;

    fn record(id: &str, title: &str, family: &str) -> Arc<Record> {
        Arc::new(
            Record::new(id, "article")
                .with_title(title)
                .with_authors(vec![RecordAuthor::new(family)]),
        )
    }

    fn index() -> SearchIndex {
        SearchIndex::build(vec![
            record("doe2020", "Climate Dynamics", "Doe"),
            record("smith2019", "Ocean Currents", "Smith"),
            record("roe2021", "Climate Feedback", "Roe"),
        ])
    }

    #[test]
    fn test_short_query_returns_nothing() {
        assert!(index().search("d", 10).is_empty());
    }

    #[test]
    fn test_citekey_prefix_wins() {
        let results = index().search("doe", 10);
        assert_eq!(results[0].id, "doe2020");
    }

    #[test]
    fn test_title_match() {
        let results = index().search("climate", 10);
        assert_eq!(results.len(), 2);
        for r in &results {
            assert!(r.title.to_lowercase().contains("climate"));
        }
    }

    #[test]
    fn test_author_family_match() {
        let results = index().search("smith", 10);
        assert_eq!(results[0].id, "smith2019");
    }

    #[test]
    fn test_limit_respected() {
        assert_eq!(index().search("climate", 1).len(), 1);
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let updated = record("doe2020", "Revised Title", "Doe");
        let next = index().with_upserted(&[updated]);
        assert_eq!(next.len(), 3);
        let results = next.search("revised", 10);
        assert_eq!(results[0].id, "doe2020");
    }

    #[test]
    fn test_upsert_appends_new() {
        let extra = record("new2022", "Fresh Work", "New");
        let next = index().with_upserted(&[extra]);
        assert_eq!(next.len(), 4);
    }
}
