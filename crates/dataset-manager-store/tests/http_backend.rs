use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dataset_manager_model::{DatasetMetadata, DatasetName, DatasetRecord};
use dataset_manager_store::{
    compress_artifact, HttpBackend, ObjectStore, RetryPolicy, StoreErrorCode,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;

#[derive(Default)]
struct ServerState {
    meta_calls: AtomicUsize,
    artifact_calls: AtomicUsize,
    auth_headers: Mutex<Vec<String>>,
}

fn records() -> Vec<DatasetRecord> {
    (0..3_u64)
        .map(|i| DatasetRecord {
            timestamp: 1_700_000_000 + i * 3600,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 10.0,
        })
        .collect()
}

async fn spawn_bucket(state: Arc<ServerState>, meta_json: Vec<u8>, artifact: Vec<u8>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(v) => v,
                Err(_) => break,
            };
            let mut req = vec![0_u8; 8192];
            let n = stream.read(&mut req).await.expect("read req");
            let req_text = String::from_utf8_lossy(&req[..n]).to_string();
            let path = req_text
                .lines()
                .next()
                .and_then(|l| l.split_whitespace().nth(1))
                .unwrap_or_default()
                .to_string();
            if let Some(auth) = req_text
                .lines()
                .find(|l| l.to_ascii_lowercase().starts_with("authorization:"))
            {
                state.auth_headers.lock().await.push(auth.to_string());
            }

            let body: Option<&[u8]> = if path == "/crypto/ETHUSDT/1h/meta.json" {
                let calls = state.meta_calls.fetch_add(1, Ordering::Relaxed) + 1;
                if calls == 1 {
                    let _ = stream
                        .write_all(
                            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                        )
                        .await;
                    continue;
                }
                Some(meta_json.as_slice())
            } else if path == "/crypto/ETHUSDT/1h/candles.bin.gz" {
                state.artifact_calls.fetch_add(1, Ordering::Relaxed);
                Some(artifact.as_slice())
            } else if path == "/crypto/LOCKED/1h/meta.json" {
                let _ = stream
                    .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
                continue;
            } else {
                None
            };

            match body {
                Some(body) => {
                    let header = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = stream.write_all(header.as_bytes()).await;
                    let _ = stream.write_all(body).await;
                }
                None => {
                    let _ = stream
                        .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                }
            }
        }
    });
    format!("http://{addr}")
}

fn backend(base: &str, bearer: Option<&str>) -> HttpBackend {
    HttpBackend::new(
        base,
        "crypto",
        bearer.map(ToString::to_string),
        RetryPolicy {
            max_attempts: 3,
            base_backoff_ms: 5,
        },
        Duration::from_secs(5),
    )
    .expect("backend")
}

#[tokio::test]
async fn http_backend_retries_server_errors_then_succeeds() {
    let metadata = DatasetMetadata::describe("ETHUSDT", "1h", &records()).expect("meta");
    let meta_json = serde_json::to_vec(&metadata).expect("json");
    let artifact =
        compress_artifact(&dataset_manager_model::encode(&records())).expect("gzip");
    let state = Arc::new(ServerState::default());
    let base = spawn_bucket(Arc::clone(&state), meta_json, artifact.clone()).await;

    let store = backend(&base, Some("secret-token"));
    let name = DatasetName::parse("ETHUSDT-1h").expect("name");
    let fetched = store.fetch_metadata(&name).await.expect("metadata after retry");
    assert_eq!(fetched, metadata);
    assert_eq!(state.meta_calls.load(Ordering::Relaxed), 2);

    let bytes = store.fetch_artifact(&name).await.expect("artifact");
    assert_eq!(bytes, artifact);

    let auth = state.auth_headers.lock().await.clone();
    assert!(!auth.is_empty());
    assert!(auth.iter().all(|h| h.ends_with("Bearer secret-token")));
}

#[tokio::test]
async fn http_backend_maps_404_to_not_found_without_retry() {
    let state = Arc::new(ServerState::default());
    let base = spawn_bucket(Arc::clone(&state), Vec::new(), Vec::new()).await;
    let store = backend(&base, None);
    let name = DatasetName::parse("FAKE-9x").expect("name");
    let err = store.fetch_metadata(&name).await.expect_err("missing");
    assert_eq!(err.code, StoreErrorCode::NotFound);
    assert!(state.auth_headers.lock().await.is_empty());
}

#[tokio::test]
async fn http_backend_denied_access_is_unavailable() {
    let state = Arc::new(ServerState::default());
    let base = spawn_bucket(Arc::clone(&state), Vec::new(), Vec::new()).await;
    let store = backend(&base, None);
    let name = DatasetName::parse("LOCKED-1h").expect("name");
    let err = store.fetch_metadata(&name).await.expect_err("denied");
    assert_eq!(err.code, StoreErrorCode::Network);
    assert_eq!(
        err.code.as_error_code(),
        dataset_manager_core::ErrorCode::Unavailable
    );
}

#[tokio::test]
async fn http_backend_gives_up_after_max_attempts() {
    let store = backend("http://127.0.0.1:9", None);
    let name = DatasetName::parse("ETHUSDT-1h").expect("name");
    let err = store.fetch_artifact(&name).await.expect_err("unreachable");
    assert_eq!(err.code, StoreErrorCode::Network);
}
