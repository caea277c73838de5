//! Remote sync tests against a minimal local HTTP stand-in.
//!
//! The fake remote answers the probe, the library export, and the RPC
//! endpoint with canned payloads; unreachable cases use a port nothing
//! listens on.

use refbib_core::config::RemoteGroup;
use refbib_core::sources::RemoteClient;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const EXPORT_PAYLOAD: &str = r#"[
  {"id":"doe2020","type":"article","title":"On Things","author":[{"family":"Doe"}],"issued":{"date-parts":[[2020]]}},
  {"id":"smith2019","type":"article","title":"Other","author":[{"family":"Smith"}],"issued":{"date-parts":[[2019]]}}
]"#;

const RPC_RESULT: &str = r#"{"jsonrpc":"2.0","id":1,"result":[
  {"id":"doe2020","type":"article","title":"On Things, revised","author":[{"family":"Doe"}],"issued":{"date-parts":[[2020]]}},
  {"id":"new2024","type":"article","title":"Brand New","author":[{"family":"New"}],"issued":{"date-parts":[[2024]]}}
]}"#;

/// Serve canned responses by path until the listener is dropped.
async fn spawn_fake_remote(rpc_result: &'static str) -> u16 {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let mut request = Vec::new();
                loop {
                    let Ok(n) = stream.read(&mut buf).await else {
                        return;
                    };
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    let Some(header_end) =
                        request.windows(4).position(|w| w == b"\r\n\r\n")
                    else {
                        continue;
                    };
                    let head = String::from_utf8_lossy(&request[..header_end]);
                    let content_length: usize = head
                        .lines()
                        .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::to_string))
                        .and_then(|v| v.trim().parse().ok())
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                let head = String::from_utf8_lossy(&request);
                let body = if head.contains("/connector/ping") {
                    "pong"
                } else if head.contains("/export/library") {
                    EXPORT_PAYLOAD
                } else {
                    rpc_result
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    port
}

/// A port with nothing listening: bind, read the port, drop.
async fn dead_port() -> u16 {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn group(id: i64) -> RemoteGroup {
    RemoteGroup {
        id,
        name: format!("group-{id}"),
        last_sync: None,
    }
}

#[tokio::test]
async fn test_probe_fails_fast_when_unreachable() {
    let dir = tempfile::tempdir().unwrap();
    let client = RemoteClient::new(dead_port().await, dir.path().to_path_buf()).unwrap();

    let started = Instant::now();
    assert!(!client.probe().await);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_probe_succeeds_against_listener() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_fake_remote(RPC_RESULT).await;
    let client = RemoteClient::new(port, dir.path().to_path_buf()).unwrap();
    assert!(client.probe().await);
}

#[tokio::test]
async fn test_full_pull_tags_group_and_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_fake_remote(RPC_RESULT).await;
    let client = RemoteClient::new(port, dir.path().to_path_buf()).unwrap();

    let records = client.full_pull(&group(7), false).await.unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.group_id == Some(7)));

    // The pull persisted a snapshot an unreachable client can serve.
    let offline = RemoteClient::new(dead_port().await, dir.path().to_path_buf()).unwrap();
    let cached = offline.full_pull(&group(7), false).await.unwrap();
    assert_eq!(cached.len(), 2);
}

#[tokio::test]
async fn test_full_pull_cache_only_skips_network() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_fake_remote(RPC_RESULT).await;
    let client = RemoteClient::new(port, dir.path().to_path_buf()).unwrap();

    // No snapshot yet, so cache-only has nothing to serve even though
    // the remote is up.
    assert!(client.full_pull(&group(7), true).await.is_none());

    client.full_pull(&group(7), false).await.unwrap();
    assert!(client.full_pull(&group(7), true).await.is_some());
}

#[tokio::test]
async fn test_full_pull_unreachable_without_snapshot_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let client = RemoteClient::new(dead_port().await, dir.path().to_path_buf()).unwrap();
    assert!(client.full_pull(&group(1), false).await.is_none());
}

#[tokio::test]
async fn test_incremental_refresh_merges_into_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_fake_remote(RPC_RESULT).await;
    let client = RemoteClient::new(port, dir.path().to_path_buf()).unwrap();

    client.full_pull(&group(7), false).await.unwrap();
    let outcome = client.incremental_refresh(&group(7), 0).await.unwrap();

    assert_eq!(outcome.modified.len(), 2);
    // doe2020 replaced in place, smith2019 kept, new2024 appended.
    assert_eq!(outcome.records.len(), 3);
    assert_eq!(outcome.records[0].id, "doe2020");
    assert_eq!(outcome.records[0].title, "On Things, revised");
    assert_eq!(outcome.records[1].id, "smith2019");
    assert_eq!(outcome.records[2].id, "new2024");
}

#[tokio::test]
async fn test_incremental_refresh_empty_result_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_fake_remote(r#"{"jsonrpc":"2.0","id":1,"result":[]}"#).await;
    let client = RemoteClient::new(port, dir.path().to_path_buf()).unwrap();

    client.full_pull(&group(7), false).await.unwrap();
    assert!(client.incremental_refresh(&group(7), 0).await.is_none());
}

#[tokio::test]
async fn test_incremental_refresh_requires_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_fake_remote(RPC_RESULT).await;
    let client = RemoteClient::new(port, dir.path().to_path_buf()).unwrap();
    assert!(client.incremental_refresh(&group(99), 0).await.is_none());
}

#[tokio::test]
async fn test_incremental_refresh_unreachable_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let client = RemoteClient::new(dead_port().await, dir.path().to_path_buf()).unwrap();
    assert!(client.incremental_refresh(&group(7), 0).await.is_none());
}

#[tokio::test]
async fn test_items_for_keys_returns_result_payload() {
    let dir = tempfile::tempdir().unwrap();
    let port = spawn_fake_remote(RPC_RESULT).await;
    let client = RemoteClient::new(port, dir.path().to_path_buf()).unwrap();

    let items = client
        .items_for_keys(&["doe2020".to_string()], 7)
        .await
        .unwrap();
    assert!(items.is_array());
    assert_eq!(items.as_array().unwrap().len(), 2);
}
