//! Host integration seams
//!
//! The embedding application owns file watching and result delivery.
//! These traits are the only surface it has to implement; the no-op
//! implementations make both optional.

use refbib_domain::Record;
use std::path::Path;
use std::sync::Arc;

/// Registers interest in bibliography files so the host can call back
/// `source_changed` when one is edited.
pub trait SourceWatcher: Send + Sync {
    fn watch(&self, path: &Path);
    fn unwatch(&self, path: &Path);
}

/// Receives pipeline results and errors.
pub trait ResolutionSink: Send + Sync {
    /// A document snapshot was (re)computed.
    fn snapshot_published(&self, doc: &Path);

    /// A non-fatal problem the user should see, e.g. a missing
    /// bibliography file or converter.
    fn report_error(&self, message: &str);

    /// Cached state was cleared; documents should re-resolve.
    fn invalidated(&self);

    /// The global record cache changed.
    fn records_updated(&self, _records: &[Arc<Record>]) {}
}

pub struct NoopWatcher;

impl SourceWatcher for NoopWatcher {
    fn watch(&self, _path: &Path) {}
    fn unwatch(&self, _path: &Path) {}
}

pub struct NoopSink;

impl ResolutionSink for NoopSink {
    fn snapshot_published(&self, _doc: &Path) {}
    fn report_error(&self, _message: &str) {}
    fn invalidated(&self) {}
}
