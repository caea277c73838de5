//! Document resolution pipeline
//!
//! One resolve pass: wait for readiness, bind the document's scope,
//! scan for citation clusters, partition keys into resolved and
//! unresolved, render, and publish a snapshot. The key partition is
//! computed even when no engine is available, so unresolved-key
//! reporting survives a style that failed to load.

use super::{BibService, RecordMap};
use crate::engine::{CitationEngine, RecordLookup};
use crate::scope::{resolve_scope, ScopeSettings};
use crate::search::SearchIndex;
use crate::sources::SourceLoader;
use lazy_static::lazy_static;
use refbib_domain::{Record, RenderedCitation};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

lazy_static! {
    static ref ENTRY_TAG: Regex = Regex::new(r"^<([a-zA-Z0-9]+)").unwrap();
}

/// Records and engine a document is bound to. Documents with equal
/// scopes share a binding; the global binding carries no record set of
/// its own and reads the live global cache.
pub struct ScopedBinding {
    pub scope: Option<ScopeSettings>,
    /// Scoped record set; `None` means the global cache.
    records: Option<Arc<RecordMap>>,
    /// Search index over the scoped record set; `None` means the global
    /// index.
    index: Option<Arc<SearchIndex>>,
    engine: Option<Arc<dyn CitationEngine>>,
    /// Resolved scoped bibliography files, for watch bookkeeping.
    sources: Vec<PathBuf>,
}

impl ScopedBinding {
    fn lookup(&self, service: &BibService, id: &str) -> Option<Arc<Record>> {
        match &self.records {
            Some(map) => map.get(id).cloned(),
            None => service.record(id),
        }
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }
}

/// The cached result of resolving one document.
pub struct DocumentSnapshot {
    pub scope: Option<ScopeSettings>,
    /// Every key the document cites, in first-citation order.
    pub keys: Vec<String>,
    pub resolved: Vec<String>,
    pub unresolved: Vec<String>,
    pub citations: Vec<RenderedCitation>,
    /// Bibliography entry markup per resolved key, with `data-citekey`
    /// injected on the entry's outer tag.
    pub entry_markup: HashMap<String, String>,
    /// Full bibliography HTML, when an engine was available and at least
    /// one key resolved.
    pub bibliography: Option<String>,
    pub(crate) binding: Arc<ScopedBinding>,
}

impl DocumentSnapshot {
    pub(crate) fn uses_source(&self, path: &Path) -> bool {
        self.binding.sources.iter().any(|p| p == path)
    }

    pub(crate) fn sources(&self) -> &[PathBuf] {
        &self.binding.sources
    }

    pub(crate) fn scoped_index(&self) -> Option<&SearchIndex> {
        self.binding.index.as_deref()
    }
}

impl BibService {
    /// Resolve a document: scan `content` for citations, bind `meta`'s
    /// scope, and return the bibliography HTML. Blocks until the service
    /// is ready. Publishes a snapshot unless the rendered citations are
    /// identical to the previous pass.
    pub async fn resolve(
        &self,
        doc: &Path,
        meta: &serde_json::Value,
        content: &str,
    ) -> Option<String> {
        self.inner.gate.wait().await;

        let doc_dir = doc.parent().unwrap_or_else(|| Path::new("."));
        let scope = resolve_scope(meta, doc_dir);
        let previous = self.snapshot_for(doc);

        let binding = match &previous {
            Some(prev) if prev.scope == scope => prev.binding.clone(),
            _ => Arc::new(self.build_binding(scope.clone()).await),
        };

        let clusters = self.inner.scanner.clusters(content);
        let mut keys: Vec<String> = Vec::new();
        for cluster in &clusters {
            for id in cluster.ids() {
                if !keys.iter().any(|k| k == id) {
                    keys.push(id.to_string());
                }
            }
        }

        let (resolved, unresolved): (Vec<String>, Vec<String>) = keys
            .iter()
            .cloned()
            .partition(|key| binding.lookup(self, key).is_some());

        // A cluster with any unknown key is dropped whole: the engine
        // never sees it, it renders as null markup, and its keys do not
        // reach the bibliography.
        let renderable: Vec<_> = clusters
            .iter()
            .filter(|cluster| cluster.ids().all(|id| binding.lookup(self, id).is_some()))
            .cloned()
            .collect();
        let mut bib_ids: Vec<String> = Vec::new();
        for cluster in &renderable {
            for id in cluster.ids() {
                if !bib_ids.iter().any(|k| k == id) {
                    bib_ids.push(id.to_string());
                }
            }
        }

        let citations: Vec<RenderedCitation> = match &binding.engine {
            Some(engine) => {
                let mut rendered = engine.render_citations(&renderable).into_iter();
                clusters
                    .iter()
                    .map(|cluster| {
                        if renderable.contains(cluster) {
                            rendered.next().unwrap_or_else(|| RenderedCitation {
                                cluster: cluster.clone(),
                                markup: None,
                                note_index: None,
                            })
                        } else {
                            RenderedCitation {
                                cluster: cluster.clone(),
                                markup: None,
                                note_index: None,
                            }
                        }
                    })
                    .collect()
            }
            None => clusters
                .iter()
                .map(|cluster| RenderedCitation {
                    cluster: cluster.clone(),
                    markup: None,
                    note_index: None,
                })
                .collect(),
        };

        // Identical render with an unchanged scope means nothing the
        // snapshot exposes can differ; keep the old one.
        if let Some(prev) = &previous {
            if prev.scope == scope && prev.citations == citations {
                debug!(doc = %doc.display(), "rendered citations unchanged, reusing snapshot");
                return prev.bibliography.clone();
            }
        }

        // The bibliography covers only keys cited by a surviving
        // cluster; none surviving means no bibliography at all.
        let (bibliography, entry_markup) = match &binding.engine {
            Some(engine) if !bib_ids.is_empty() => {
                render_bibliography(engine.as_ref(), &bib_ids)
            }
            _ => (None, HashMap::new()),
        };

        let snapshot = Arc::new(DocumentSnapshot {
            scope,
            keys,
            resolved,
            unresolved,
            citations,
            entry_markup,
            bibliography: bibliography.clone(),
            binding,
        });

        let evicted = {
            let mut snapshots = self.inner.snapshots.lock().expect("snapshot lock");
            snapshots.push(doc.to_path_buf(), snapshot)
        };
        if let Some((evicted_doc, old)) = evicted {
            if evicted_doc != doc {
                debug!(doc = %evicted_doc.display(), "snapshot evicted");
            }
            self.release_scoped_watches(&old);
        }

        self.inner.sink.snapshot_published(doc);
        bibliography
    }

    /// Build the binding for a scope: the global one, or scoped records
    /// and an engine for the overridden style, language, or bibliography.
    async fn build_binding(&self, scope: Option<ScopeSettings>) -> ScopedBinding {
        let config = self.inner.config.load_full();

        let Some(settings) = scope.clone() else {
            let engine = self.inner.engine.load_full().map(|b| b.engine.clone());
            return ScopedBinding {
                scope: None,
                records: None,
                index: None,
                engine,
                sources: Vec::new(),
            };
        };

        let mut sources: Vec<PathBuf> = Vec::new();
        let records: Option<Arc<RecordMap>> = match &settings.bibliography {
            Some(paths) => {
                let loader = SourceLoader::new(
                    config.sources.converter_path.clone(),
                    config.sources.project_root.clone(),
                    config.cache.cache_dir.clone(),
                );
                let mut map = RecordMap::new();
                for raw in paths {
                    let path = Path::new(raw);
                    match loader.load_file(path).await {
                        Ok(loaded) => {
                            if let Ok(resolved) = loader.resolve_path(path) {
                                sources.push(resolved);
                            }
                            for record in loaded {
                                map.insert(record.id.clone(), Arc::new(record));
                            }
                        }
                        Err(e) => {
                            warn!(path = %raw, error = %e, "skipping scoped bibliography");
                            self.inner.sink.report_error(&e.to_string());
                        }
                    }
                }
                self.watch_scoped(&sources);
                Some(Arc::new(map))
            }
            None => None,
        };

        // Suggestions in a scoped document search its own bibliography,
        // not the global cache.
        let index = records
            .as_ref()
            .map(|map| Arc::new(SearchIndex::build(map.values().cloned())));

        let style_key = settings
            .style
            .clone()
            .unwrap_or_else(|| config.style_key());
        let lang = settings
            .lang
            .clone()
            .unwrap_or_else(|| config.style.locale.clone());

        let lookup: RecordLookup = match &records {
            Some(map) => {
                let map = Arc::clone(map);
                Arc::new(move |id| map.get(id).cloned())
            }
            None => self.global_record_lookup(),
        };

        let engine = match self.build_engine_for(&style_key, &lang, lookup).await {
            Ok(engine) => Some(engine),
            Err(e) => {
                warn!(style = %style_key, error = %e, "scoped engine unavailable");
                self.inner.sink.report_error(&e.to_string());
                None
            }
        };

        ScopedBinding {
            scope,
            records,
            index,
            engine,
            sources,
        }
    }

    fn watch_scoped(&self, sources: &[PathBuf]) {
        let mut watches = self.inner.watches.lock().expect("watch lock");
        for path in sources {
            if !watches.contains_key(path) {
                self.inner.watcher.watch(path);
                watches.insert(path.clone(), super::WatchKind::Scoped);
            }
        }
    }

    /// Drop scoped watches owned by an evicted snapshot, unless another
    /// cached snapshot still uses the file.
    pub(crate) fn release_scoped_watches(&self, snapshot: &DocumentSnapshot) {
        if snapshot.sources().is_empty() {
            return;
        }
        let still_used: Vec<PathBuf> = {
            let snapshots = self.inner.snapshots.lock().expect("snapshot lock");
            snapshots
                .iter()
                .flat_map(|(_, s)| s.sources().iter().cloned())
                .collect()
        };
        let mut watches = self.inner.watches.lock().expect("watch lock");
        for source in snapshot.sources() {
            if still_used.contains(source) {
                continue;
            }
            if watches.get(source) == Some(&super::WatchKind::Scoped) {
                self.inner.watcher.unwatch(source);
                watches.remove(source);
            }
        }
    }
}

/// Render the bibliography and per-entry markup, tagging each entry's
/// outer element with its citation key.
fn render_bibliography(
    engine: &dyn CitationEngine,
    resolved: &[String],
) -> (Option<String>, HashMap<String, String>) {
    let Some(bib) = engine.make_bibliography(resolved) else {
        return (None, HashMap::new());
    };
    let mut entry_markup = HashMap::new();
    let mut html = String::from(&bib.bib_start);
    for (id, entry) in &bib.entries {
        let injected = inject_citekey(entry, id);
        html.push_str(&injected);
        entry_markup.insert(id.clone(), injected);
    }
    html.push_str(&bib.bib_end);
    (Some(html), entry_markup)
}

fn inject_citekey(entry: &str, id: &str) -> String {
    ENTRY_TAG
        .replace(entry, format!("<$1 data-citekey=\"{id}\""))
        .into_owned()
}
