//! Remote reference-manager sync
//!
//! Talks to a locally running reference manager over its HTTP/JSON-RPC
//! endpoint. Remote failures are never fatal: every operation degrades
//! to the on-disk group snapshot or to `None`, and callers treat `None`
//! as "no change".

use crate::config::RemoteGroup;
use crate::error::Result;
use crate::http::HttpClient;
use crate::sources::convert::RawConverterRecord;
use chrono::{TimeZone, Utc};
use refbib_domain::Record;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Budget for deciding the remote is up. The probe races this timeout;
/// losing the race means unreachable.
const PROBE_TIMEOUT: Duration = Duration::from_millis(150);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteClient {
    http: HttpClient,
    port: u16,
    cache_dir: PathBuf,
}

/// Result of an incremental refresh: the merged record set plus the
/// records the remote reported as modified.
pub struct RefreshOutcome {
    pub records: Vec<Record>,
    pub modified: Vec<Record>,
}

impl RemoteClient {
    pub fn new(port: u16, cache_dir: PathBuf) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new(REQUEST_TIMEOUT)?,
            port,
            cache_dir,
        })
    }

    fn base(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Whether the remote is responding right now. Never errors; a slow
    /// or refused connection is simply `false`.
    pub async fn probe(&self) -> bool {
        let url = format!("{}/connector/ping", self.base());
        matches!(
            tokio::time::timeout(PROBE_TIMEOUT, self.http.get_text(&url)).await,
            Ok(Ok(_))
        )
    }

    /// Pull the full record set for a group.
    ///
    /// With `use_cache_only`, or when the remote is unreachable, the
    /// on-disk snapshot is returned instead; `None` only when there is
    /// nothing to fall back to.
    pub async fn full_pull(
        &self,
        group: &RemoteGroup,
        use_cache_only: bool,
    ) -> Option<Vec<Record>> {
        if use_cache_only || !self.probe().await {
            debug!(group = group.id, "full pull served from snapshot");
            return self.read_snapshot(group.id).await;
        }

        let url = format!("{}/export/library?group={}", self.base(), group.id);
        let payload = match self.http.get_text(&url).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(group = group.id, error = %e, "full pull failed, using snapshot");
                return self.read_snapshot(group.id).await;
            }
        };

        let raw: Vec<RawConverterRecord> = match serde_json::from_str(&payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(group = group.id, error = %e, "bad export payload, using snapshot");
                return self.read_snapshot(group.id).await;
            }
        };

        let records: Vec<Record> = raw
            .into_iter()
            .map(|r| {
                let mut record = r.into_record();
                record.group_id = Some(group.id);
                record
            })
            .collect();
        self.write_snapshot(group.id, &records).await;
        Some(records)
    }

    /// Fetch records modified since `since_ms` and merge them into the
    /// group snapshot. `None` means no change: remote down, no snapshot
    /// to merge into, or nothing modified.
    pub async fn incremental_refresh(
        &self,
        group: &RemoteGroup,
        since_ms: i64,
    ) -> Option<RefreshOutcome> {
        if !self.probe().await {
            return None;
        }
        let existing = self.read_snapshot(group.id).await?;

        let body = json!({
            "jsonrpc": "2.0",
            "method": "item.search",
            "params": [[["dateModified", "isAfter", timestamp_from_ms(since_ms)]], group.id],
            "id": 1,
        });
        let url = format!("{}/rpc", self.base());
        let response = match self.http.post_json(&url, &body).await {
            Ok(response) => response,
            Err(e) => {
                warn!(group = group.id, error = %e, "incremental refresh rpc failed");
                return None;
            }
        };

        let raw: Vec<RawConverterRecord> =
            match serde_json::from_value(response.get("result")?.clone()) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(group = group.id, error = %e, "bad rpc result payload");
                    return None;
                }
            };
        if raw.is_empty() {
            return None;
        }

        let modified: Vec<Record> = raw
            .into_iter()
            .map(|r| {
                let mut record = r.into_record();
                record.group_id = Some(group.id);
                record
            })
            .collect();
        let records = merge_by_id(existing, &modified);
        self.write_snapshot(group.id, &records).await;
        Some(RefreshOutcome { records, modified })
    }

    /// Export full item data for the given citation keys, for callers
    /// that need more than the canonical record fields.
    pub async fn items_for_keys(
        &self,
        keys: &[String],
        group_id: i64,
    ) -> Option<serde_json::Value> {
        if !self.probe().await {
            return None;
        }
        let body = json!({
            "jsonrpc": "2.0",
            "method": "item.export",
            "params": [keys, group_id],
            "id": 1,
        });
        let url = format!("{}/rpc", self.base());
        match self.http.post_json(&url, &body).await {
            Ok(response) => response.get("result").cloned(),
            Err(e) => {
                warn!(group = group_id, error = %e, "item export rpc failed");
                None
            }
        }
    }

    fn snapshot_path(&self, group_id: i64) -> PathBuf {
        self.cache_dir.join(format!("remote-group-{group_id}.json"))
    }

    async fn read_snapshot(&self, group_id: i64) -> Option<Vec<Record>> {
        let data = tokio::fs::read_to_string(self.snapshot_path(group_id))
            .await
            .ok()?;
        match serde_json::from_str(&data) {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(group = group_id, error = %e, "discarding bad group snapshot");
                None
            }
        }
    }

    async fn write_snapshot(&self, group_id: i64, records: &[Record]) {
        let path = self.snapshot_path(group_id);
        let write = async {
            tokio::fs::create_dir_all(&self.cache_dir).await?;
            let data = serde_json::to_string(records)?;
            tokio::fs::write(&path, data).await?;
            crate::error::Result::Ok(())
        };
        if let Err(e) = write.await {
            warn!(group = group_id, error = %e, "failed to write group snapshot");
        }
    }
}

/// Merge modified records into an existing set: a matching id replaces
/// the record in place, a new id is appended. Nothing is ever deleted;
/// remote deletions only disappear on the next full pull.
pub fn merge_by_id(mut existing: Vec<Record>, modified: &[Record]) -> Vec<Record> {
    for incoming in modified {
        match existing.iter_mut().find(|r| r.id == incoming.id) {
            Some(slot) => *slot = incoming.clone(),
            None => existing.push(incoming.clone()),
        }
    }
    existing
}

/// Epoch milliseconds to the remote's `YYYY-MM-DD HH:MM:SS` UTC form.
fn timestamp_from_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).single().expect("epoch"))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, title: &str) -> Record {
        Record::new(id, "article").with_title(title)
    }

    #[test]
    fn test_merge_replaces_in_place_and_appends() {
        let existing = vec![record("a", "old A"), record("b", "B")];
        let modified = vec![record("a", "new A"), record("c", "C")];
        let merged = merge_by_id(existing, &modified);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[0].title, "new A");
        assert_eq!(merged[1].id, "b");
        assert_eq!(merged[2].id, "c");
    }

    #[test]
    fn test_merge_never_deletes() {
        let existing = vec![record("a", "A"), record("b", "B")];
        let merged = merge_by_id(existing, &[record("a", "A2")]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(timestamp_from_ms(0), "1970-01-01 00:00:00");
        assert_eq!(timestamp_from_ms(1_700_000_000_000), "2023-11-14 22:13:20");
    }
}
