//! The resolution service
//!
//! [`BibService`] owns every cache: the global record map, the search
//! index, the global engine binding, and the per-document snapshot
//! cache. Data caches are published copy-then-swap so readers never
//! block; the short mutexes here guard bookkeeping only and are never
//! held across an await.

mod pipeline;
mod reinit;

pub use pipeline::{DocumentSnapshot, ScopedBinding};

use crate::config::ResolverConfig;
use crate::engine::{AuthorYearFactory, CitationEngine, EngineFactory};
use crate::error::{RefbibError, Result};
use crate::host::{NoopSink, NoopWatcher, ResolutionSink, SourceWatcher};
use crate::scan::{CitationScanner, PandocScanner};
use crate::search::SearchIndex;
use crate::service::reinit::{ReadyGate, ReinitState};
use crate::sources::RemoteClient;
use crate::styles::StyleResolver;
use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::Utc;
use lru::LruCache;
use refbib_domain::Record;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

pub(crate) type RecordMap = HashMap<String, Arc<Record>>;

/// The global engine plus the style and locale it was built for.
pub struct EngineBinding {
    pub engine: Arc<dyn CitationEngine>,
    pub style_key: String,
    pub lang: String,
}

/// Why a file is being watched. Global watches follow the configured
/// sources; scoped watches are owned by document snapshots and released
/// on eviction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WatchKind {
    Global,
    Scoped,
}

pub(crate) struct ServiceInner {
    pub(crate) config: ArcSwap<ResolverConfig>,
    pub(crate) styles: StyleResolver,
    pub(crate) remote: ArcSwap<RemoteClient>,
    pub(crate) factory: Arc<dyn EngineFactory>,
    pub(crate) scanner: Arc<dyn CitationScanner>,
    pub(crate) watcher: Arc<dyn SourceWatcher>,
    pub(crate) sink: Arc<dyn ResolutionSink>,

    /// Global record cache, keyed by citation key.
    pub(crate) records: Arc<ArcSwap<RecordMap>>,
    pub(crate) index: ArcSwap<SearchIndex>,
    pub(crate) engine: ArcSwapOption<EngineBinding>,

    pub(crate) gate: ReadyGate,
    pub(crate) reinit: tokio::sync::Mutex<ReinitState>,
    pub(crate) snapshots: Mutex<LruCache<PathBuf, Arc<DocumentSnapshot>>>,
    pub(crate) watches: Mutex<HashMap<PathBuf, WatchKind>>,
    /// Last successful incremental sync per remote group, epoch ms.
    pub(crate) group_sync: Mutex<HashMap<i64, i64>>,
    /// Debounce generation per watched path. Keyed per path so a burst
    /// on one file cannot cancel another file's pending reload.
    pub(crate) debounce: Mutex<HashMap<PathBuf, u64>>,
}

/// Handle to the resolution service. Cheap to clone; all clones share
/// the same caches.
#[derive(Clone)]
pub struct BibService {
    pub(crate) inner: Arc<ServiceInner>,
}

pub struct BibServiceBuilder {
    config: ResolverConfig,
    factory: Arc<dyn EngineFactory>,
    scanner: Arc<dyn CitationScanner>,
    watcher: Arc<dyn SourceWatcher>,
    sink: Arc<dyn ResolutionSink>,
}

impl BibServiceBuilder {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            factory: Arc::new(AuthorYearFactory),
            scanner: Arc::new(PandocScanner),
            watcher: Arc::new(NoopWatcher),
            sink: Arc::new(NoopSink),
        }
    }

    pub fn engine_factory(mut self, factory: Arc<dyn EngineFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn scanner(mut self, scanner: Arc<dyn CitationScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    pub fn watcher(mut self, watcher: Arc<dyn SourceWatcher>) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ResolutionSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<BibService> {
        self.config
            .validate()
            .map_err(|e| RefbibError::InvalidState(e.to_string()))?;
        let capacity = NonZeroUsize::new(self.config.cache.snapshot_capacity)
            .expect("capacity validated nonzero");
        let remote = RemoteClient::new(
            self.config.remote.port,
            self.config.cache.cache_dir.clone(),
        )?;
        let styles = StyleResolver::new(self.config.cache.cache_dir.clone())?;

        Ok(BibService {
            inner: Arc::new(ServiceInner {
                config: ArcSwap::from_pointee(self.config),
                styles,
                remote: ArcSwap::from_pointee(remote),
                factory: self.factory,
                scanner: self.scanner,
                watcher: self.watcher,
                sink: self.sink,
                records: Arc::new(ArcSwap::from_pointee(HashMap::new())),
                index: ArcSwap::from_pointee(SearchIndex::empty()),
                engine: ArcSwapOption::empty(),
                gate: ReadyGate::new(),
                reinit: tokio::sync::Mutex::new(ReinitState::default()),
                snapshots: Mutex::new(LruCache::new(capacity)),
                watches: Mutex::new(HashMap::new()),
                group_sync: Mutex::new(HashMap::new()),
                debounce: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl BibService {
    pub fn new(config: ResolverConfig) -> Result<Self> {
        BibServiceBuilder::new(config).build()
    }

    pub fn builder(config: ResolverConfig) -> BibServiceBuilder {
        BibServiceBuilder::new(config)
    }

    /// First load. Equivalent to a non-clearing [`reinit`](Self::reinit).
    pub async fn initialize(&self) -> Result<()> {
        self.reinit(false).await
    }

    pub fn is_ready(&self) -> bool {
        self.inner.gate.is_ready()
    }

    pub(crate) fn remote_client(&self) -> Arc<RemoteClient> {
        self.inner.remote.load_full()
    }

    /// Cached record by citation key.
    pub fn record(&self, id: &str) -> Option<Arc<Record>> {
        self.inner.records.load().get(id).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.inner.records.load().len()
    }

    /// Fuzzy record suggestions for a partial query.
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<Arc<Record>> {
        self.inner.index.load().search(query, limit)
    }

    /// Fuzzy suggestions scoped to a document. A document bound to its
    /// own bibliography searches that set; otherwise the global index.
    pub fn suggest_for(&self, doc: &Path, query: &str, limit: usize) -> Vec<Arc<Record>> {
        match self.snapshot_for(doc) {
            Some(snapshot) => match snapshot.scoped_index() {
                Some(index) => index.search(query, limit),
                None => self.suggest(query, limit),
            },
            None => self.suggest(query, limit),
        }
    }

    /// The last computed snapshot for a document, if still cached.
    pub fn snapshot_for(&self, doc: &Path) -> Option<Arc<DocumentSnapshot>> {
        self.inner
            .snapshots
            .lock()
            .expect("snapshot lock")
            .peek(&doc.to_path_buf())
            .cloned()
    }

    /// Whether a key cited by the document resolved: `Some(true)` for
    /// resolved, `Some(false)` for cited-but-unknown, `None` when the
    /// document has no snapshot or never cites the key.
    pub fn resolution_for(&self, doc: &Path, key: &str) -> Option<bool> {
        let snapshot = self.snapshot_for(doc)?;
        if snapshot.resolved.iter().any(|k| k == key) {
            return Some(true);
        }
        if snapshot.unresolved.iter().any(|k| k == key) {
            return Some(false);
        }
        None
    }

    /// Rendered bibliography entry for one key cited by the document.
    pub fn bibliography_entry_for(&self, doc: &Path, key: &str) -> Option<String> {
        self.snapshot_for(doc)?.entry_markup.get(key).cloned()
    }

    /// Full item export for citation keys via the remote, when reachable.
    pub async fn items_for_keys(
        &self,
        keys: &[String],
        group_id: i64,
    ) -> Option<serde_json::Value> {
        self.remote_client().items_for_keys(keys, group_id).await
    }

    /// A watched bibliography file changed. Bursts within the debounce
    /// window collapse into one reload; must be called inside a tokio
    /// runtime.
    pub fn source_changed(&self, path: &Path) {
        let delay = Duration::from_millis(self.inner.config.load().cache.debounce_ms);
        let path = path.to_path_buf();
        let generation = {
            let mut debounce = self.inner.debounce.lock().expect("debounce lock");
            let counter = debounce.entry(path.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let service = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let superseded = {
                let debounce = service.inner.debounce.lock().expect("debounce lock");
                debounce.get(&path).copied() != Some(generation)
            };
            if superseded {
                return;
            }
            debug!(path = %path.display(), "source changed, reloading");
            let kind = {
                let watches = service.inner.watches.lock().expect("watch lock");
                watches.get(&path).copied()
            };
            match kind {
                Some(WatchKind::Scoped) => service.drop_snapshots_using(&path),
                _ => {
                    let _ = service.reinit(false).await;
                }
            }
        });
    }

    /// Evict snapshots whose scoped bibliography includes the file, so
    /// the next resolve rebuilds their binding.
    fn drop_snapshots_using(&self, path: &Path) {
        let evicted: Vec<Arc<DocumentSnapshot>> = {
            let mut snapshots = self.inner.snapshots.lock().expect("snapshot lock");
            let docs: Vec<PathBuf> = snapshots
                .iter()
                .filter(|(_, s)| s.uses_source(path))
                .map(|(doc, _)| doc.clone())
                .collect();
            docs.iter().filter_map(|doc| snapshots.pop(doc)).collect()
        };
        for snapshot in &evicted {
            self.release_scoped_watches(snapshot);
        }
        if !evicted.is_empty() {
            self.inner.sink.invalidated();
        }
    }

    /// Merge remote modifications into the caches for every enabled
    /// group. Returns true when anything changed.
    pub async fn refresh_remote(&self) -> bool {
        let config = self.inner.config.load_full();
        if !config.remote.enabled {
            return false;
        }
        let remote = self.remote_client();
        let mut changed = false;
        for group in &config.remote.groups {
            let since = {
                let sync = self.inner.group_sync.lock().expect("sync lock");
                sync.get(&group.id).copied()
            }
            .or(group.last_sync)
            .unwrap_or(0);

            if let Some(outcome) = remote.incremental_refresh(group, since).await {
                self.apply_modified(&outcome.modified);
                self.inner
                    .group_sync
                    .lock()
                    .expect("sync lock")
                    .insert(group.id, Utc::now().timestamp_millis());
                changed = true;
            }
        }
        changed
    }

    /// Parse loose bibliography text (pasted references, tool output)
    /// into records and merge them into the caches. Returns the records
    /// that were imported; malformed entries are skipped, never fatal.
    pub fn import_text(&self, text: &str) -> Vec<Arc<Record>> {
        let records = refbib_bibtex::extract_records(text);
        if records.is_empty() {
            return Vec::new();
        }
        self.apply_modified(&records)
    }

    /// Upsert modified records into the record cache and search index.
    fn apply_modified(&self, modified: &[Record]) -> Vec<Arc<Record>> {
        let arcs: Vec<Arc<Record>> = modified.iter().cloned().map(Arc::new).collect();
        self.inner.records.rcu(|map| {
            let mut next = RecordMap::clone(map);
            for record in &arcs {
                next.insert(record.id.clone(), record.clone());
            }
            next
        });
        let index = self.inner.index.load().with_upserted(&arcs);
        self.inner.index.store(Arc::new(index));
        self.inner.sink.records_updated(&arcs);
        arcs
    }

    /// Swap in a new configuration and rebuild everything from scratch.
    pub async fn update_config(&self, config: ResolverConfig) -> Result<()> {
        config
            .validate()
            .map_err(|e| RefbibError::InvalidState(e.to_string()))?;
        let remote = RemoteClient::new(config.remote.port, config.cache.cache_dir.clone())?;
        self.inner.remote.store(Arc::new(remote));
        self.inner.config.store(Arc::new(config));
        self.reinit(true).await
    }

    /// Drop every document snapshot and release the scoped watches they
    /// owned. Global watches are untouched.
    pub(crate) fn clear_snapshots(&self) {
        self.inner
            .snapshots
            .lock()
            .expect("snapshot lock")
            .clear();
        let mut watches = self.inner.watches.lock().expect("watch lock");
        let scoped: Vec<PathBuf> = watches
            .iter()
            .filter(|(_, kind)| **kind == WatchKind::Scoped)
            .map(|(path, _)| path.clone())
            .collect();
        for path in scoped {
            self.inner.watcher.unwatch(&path);
            watches.remove(&path);
        }
    }

    /// Tear down: release every watch and drop all cached state.
    pub fn destroy(&self) {
        self.inner.gate.set_ready(false);
        {
            let mut watches = self.inner.watches.lock().expect("watch lock");
            for path in watches.keys() {
                self.inner.watcher.unwatch(path);
            }
            watches.clear();
        }
        self.inner
            .snapshots
            .lock()
            .expect("snapshot lock")
            .clear();
        self.inner.records.store(Arc::new(HashMap::new()));
        self.inner.index.store(Arc::new(SearchIndex::empty()));
        self.inner.engine.store(None);
    }
}
