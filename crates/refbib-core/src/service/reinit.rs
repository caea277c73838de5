//! Initialization and reinitialization
//!
//! All cache rebuilds funnel through [`BibService::reinit`]. Concurrent
//! callers never trigger concurrent reloads: the first caller becomes
//! the runner and everyone else waits for its completion signal. A
//! `force_clear` requested while a reload is in flight is remembered and
//! drained by the runner before it signals, so the record cache is
//! guaranteed empty-then-rebuilt once every caller returns.

use super::{BibService, WatchKind};
use crate::engine::RecordLookup;
use crate::error::Result;
use crate::search::SearchIndex;
use crate::service::EngineBinding;
use crate::sources::SourceLoader;
use crate::styles::StyleResolver;
use refbib_domain::Record;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Readiness gate the pipeline waits on while a reload is running.
pub(super) struct ReadyGate {
    tx: watch::Sender<bool>,
}

impl ReadyGate {
    pub(super) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub(super) fn set_ready(&self, ready: bool) {
        // send_replace stores the value even with no live receivers;
        // send() would discard it and leave later waiters stuck.
        self.tx.send_replace(ready);
    }

    pub(super) fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    pub(super) async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }
}

/// Shared reinit bookkeeping, behind an async mutex.
#[derive(Default)]
pub(super) struct ReinitState {
    /// A force-clear was requested but not yet performed.
    pub(super) pending_clear: bool,
    /// Completion signal of the reload currently running.
    pub(super) in_flight: Option<watch::Receiver<bool>>,
}

impl BibService {
    /// Rebuild the record cache, search index, and global engine binding.
    ///
    /// With `force_clear`, all cached state is dropped before reloading.
    /// Concurrent calls coalesce into one reload; each returns once a
    /// reload covering its request has completed.
    pub async fn reinit(&self, force_clear: bool) -> Result<()> {
        let (done_tx, waiter) = {
            let mut state = self.inner.reinit.lock().await;
            if force_clear {
                state.pending_clear = true;
            }
            if let Some(rx) = state.in_flight.clone() {
                (None, Some(rx))
            } else {
                let (tx, rx) = watch::channel(false);
                state.in_flight = Some(rx);
                (Some(tx), None)
            }
        };

        if let Some(mut rx) = waiter {
            let _ = rx.wait_for(|done| *done).await;
            return Ok(());
        }
        let done_tx = done_tx.expect("runner holds the sender");

        let mut result = Ok(());
        loop {
            let clear = {
                let mut state = self.inner.reinit.lock().await;
                std::mem::take(&mut state.pending_clear)
            };
            if let Err(e) = self.run_reload(clear).await {
                warn!(error = %e, "reload failed");
                result = Err(e);
            }

            // Release the runner slot only if no new clear arrived while
            // reloading; the check and the release share one lock hold.
            let mut state = self.inner.reinit.lock().await;
            if !state.pending_clear {
                state.in_flight = None;
                drop(state);
                let _ = done_tx.send(true);
                break;
            }
        }
        result
    }

    async fn run_reload(&self, clear: bool) -> Result<()> {
        let inner = &self.inner;
        inner.gate.set_ready(false);

        if clear {
            info!("clearing record cache before reload");
            inner.records.store(Arc::new(HashMap::new()));
            inner.index.store(Arc::new(SearchIndex::empty()));
            inner.engine.store(None);
            inner.styles.clear();
            inner.sink.invalidated();
        }

        // Document snapshots are stale against whatever this reload
        // produces; drop them and the scoped watches they own.
        self.clear_snapshots();

        let config = inner.config.load_full();
        let loader = SourceLoader::new(
            config.sources.converter_path.clone(),
            config.sources.project_root.clone(),
            config.cache.cache_dir.clone(),
        );

        let mut records: Vec<Record> = Vec::new();
        if config.remote.enabled {
            let remote = inner.remote.load_full();
            for group in &config.remote.groups {
                match remote.full_pull(group, false).await {
                    Some(pulled) => records.extend(pulled),
                    None => inner.sink.report_error(&format!(
                        "remote group '{}' is unavailable and has no cached snapshot",
                        group.name
                    )),
                }
            }
        } else {
            for path in &config.sources.bibliography_paths {
                match loader.load_file(path).await {
                    Ok(loaded) => records.extend(loaded),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping bibliography source");
                        inner.sink.report_error(&e.to_string());
                    }
                }
            }
        }

        let map: HashMap<String, Arc<Record>> = records
            .into_iter()
            .map(|r| (r.id.clone(), Arc::new(r)))
            .collect();
        let listed: Vec<Arc<Record>> = map.values().cloned().collect();
        info!(count = map.len(), "record cache loaded");
        inner.index.store(Arc::new(SearchIndex::build(listed.clone())));
        inner.records.store(Arc::new(map));
        inner.sink.records_updated(&listed);

        self.refresh_global_watches(&config, &loader);

        // Engine failures leave resolution partition-only rather than
        // failing the whole reload.
        let style_key = config.style_key();
        let lang = config.style.locale.clone();
        match self
            .build_engine_for(&style_key, &lang, self.global_record_lookup())
            .await
        {
            Ok(engine) => {
                inner.engine.store(Some(Arc::new(EngineBinding {
                    engine,
                    style_key,
                    lang,
                })));
            }
            Err(e) => {
                warn!(style = %style_key, error = %e, "engine binding unavailable");
                inner.sink.report_error(&e.to_string());
                inner.engine.store(None);
            }
        }

        inner.gate.set_ready(true);
        Ok(())
    }

    /// A lookup over the live global record cache; engines built with it
    /// observe cache swaps without rebinding.
    pub(super) fn global_record_lookup(&self) -> RecordLookup {
        let records = Arc::clone(&self.inner.records);
        Arc::new(move |id| records.load().get(id).cloned())
    }

    pub(super) async fn build_engine_for(
        &self,
        style_key: &str,
        lang: &str,
        records: RecordLookup,
    ) -> Result<Arc<dyn crate::engine::CitationEngine>> {
        let styles = &self.inner.styles;
        let style_text = styles.resolve_style(style_key).await?;
        let locales = StyleResolver::required_locales(&style_text, &[lang]);
        for code in &locales {
            styles.resolve_locale(code).await?;
        }
        let engine = crate::engine::build_engine(
            self.inner.factory.as_ref(),
            styles,
            style_key,
            &locales,
            records,
        )?;
        Ok(Arc::from(engine))
    }

    /// Re-register watches for the configured global bibliography files,
    /// dropping global watches on files no longer configured. Scoped
    /// watches are owned by document snapshots and left alone.
    fn refresh_global_watches(&self, config: &crate::config::ResolverConfig, loader: &SourceLoader) {
        let resolved: Vec<_> = config
            .sources
            .bibliography_paths
            .iter()
            .filter_map(|p| loader.resolve_path(p).ok())
            .collect();

        let mut watches = self.inner.watches.lock().expect("watch lock");
        let stale: Vec<_> = watches
            .iter()
            .filter(|(path, kind)| **kind == WatchKind::Global && !resolved.contains(path))
            .map(|(path, _)| path.clone())
            .collect();
        for path in stale {
            self.inner.watcher.unwatch(&path);
            watches.remove(&path);
        }
        for path in resolved {
            if !watches.contains_key(&path) {
                self.inner.watcher.watch(&path);
                watches.insert(path, WatchKind::Global);
            }
        }
    }
}
