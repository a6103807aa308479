use dataset_manager_api::{decode_frame, ControlResponse};
use dataset_manager_client::{ClientError, DatasetClient, MappedDataset};
use dataset_manager_core::ErrorCode;
use dataset_manager_model::{DatasetName, DatasetRecord};
use dataset_manager_server::{
    CacheConfig, ControlConfig, ControlServer, DatasetCache, FakeStore,
};
use dataset_manager_store::{publish_dataset, LocalFsBackend, ObjectStore};
use std::io::{Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn candles() -> Vec<DatasetRecord> {
    [1_700_000_000_u64, 1_700_003_600, 1_700_007_200]
        .into_iter()
        .map(|timestamp| DatasetRecord {
            timestamp,
            open: 2_000.0,
            high: 2_010.0,
            low: 1_990.0,
            close: 2_005.0,
            volume: 12.5,
        })
        .collect()
}

struct Manager {
    cache: Arc<DatasetCache>,
    socket: PathBuf,
    shutdown: oneshot::Sender<()>,
    serving: JoinHandle<std::io::Result<()>>,
}

impl Manager {
    async fn start(root: &Path, store: Arc<dyn ObjectStore>, control: ControlConfig) -> Self {
        let cache = DatasetCache::new(
            CacheConfig {
                root: root.join("cache"),
                ..CacheConfig::default()
            },
            store,
        )
        .expect("cache");
        let server = ControlServer::bind(&control, Arc::clone(&cache)).expect("bind");
        let (shutdown, rx) = oneshot::channel::<()>();
        let serving = tokio::spawn(server.serve_until(async move {
            let _ = rx.await;
        }));
        Self {
            cache,
            socket: control.socket_path,
            shutdown,
            serving,
        }
    }

    async fn open(&self, name: &str) -> Result<MappedDataset, ClientError> {
        let client = DatasetClient::new(&self.socket).with_timeout(Duration::from_secs(5));
        let name = name.to_string();
        tokio::task::spawn_blocking(move || client.open(&name))
            .await
            .expect("client task")
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        self.serving.await.expect("serve task").expect("serve");
    }
}

fn control_at(root: &Path) -> ControlConfig {
    ControlConfig {
        socket_path: root.join("dataset_manager.sock"),
        ..ControlConfig::default()
    }
}

fn local_store(root: &Path) -> Arc<dyn ObjectStore> {
    let store_root = root.join("bucket");
    publish_dataset(&store_root, "crypto", "ETHUSDT", "1h", &candles()).expect("publish");
    Arc::new(LocalFsBackend::new(store_root, "crypto"))
}

async fn wait_for_release(cache: &DatasetCache, name: &str) {
    let name = DatasetName::parse(name).expect("name");
    for _ in 0..100 {
        if cache.ref_count(&name).await == Some(0) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("reference for {name} was never released");
}

/// Sends raw request bytes and returns the decoded reply.
fn raw_exchange(socket: &Path, request: &[u8]) -> ControlResponse {
    let mut stream = std::os::unix::net::UnixStream::connect(socket).expect("connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    stream.write_all(request).expect("write");
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).expect("read reply");
    let body: serde_json::Value = serde_json::from_slice(&reply[4..]).expect("json body");
    assert_eq!(body.get("ok").and_then(|v| v.as_bool()), Some(false));
    decode_frame(&reply).expect("frame")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn download_then_serve_maps_published_records() {
    let tmp = tempdir().expect("tempdir");
    let store = local_store(tmp.path());
    let manager = Manager::start(tmp.path(), store, control_at(tmp.path())).await;

    let dataset = manager.open("ETHUSDT-1h").await.expect("open dataset");
    let meta = dataset.metadata();
    assert_eq!(meta.candles, 3);
    assert_eq!(meta.start_ts, 1_700_000_000);
    assert_eq!(meta.end_ts, 1_700_007_200);
    assert_eq!(dataset.len(), 84);
    let first = u64::from_le_bytes(dataset.as_bytes()[..8].try_into().expect("8 bytes"));
    assert_eq!(first, 1_700_000_000);
    dataset.verify_digest().expect("digest");
    let view = dataset.records().expect("records");
    assert_eq!(view.iter().map(|r| r.timestamp).last(), Some(1_700_007_200));

    wait_for_release(&manager.cache, "ETHUSDT-1h").await;
    let second = manager.open("ETHUSDT-1h").await.expect("cached open");
    assert_eq!(second.as_bytes(), dataset.as_bytes());
    let stats = manager.cache.stats().await;
    assert_eq!(stats.remote_fetches, 1);
    assert!(stats.hits >= 1);

    let socket = manager.socket.clone();
    manager.stop().await;
    assert!(!socket.exists(), "socket file removed on shutdown");
    // The mapping does not depend on the manager.
    assert_eq!(dataset.first_timestamp(), Some(1_700_000_000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_dataset_is_not_found_without_descriptor() {
    let tmp = tempdir().expect("tempdir");
    let store = local_store(tmp.path());
    let manager = Manager::start(tmp.path(), store, control_at(tmp.path())).await;

    // A descriptor on an error reply would surface as a protocol error.
    let err = manager.open("FAKE-9x").await.expect_err("unknown dataset");
    assert_eq!(err.code, ErrorCode::NotFound);

    let socket = manager.socket.clone();
    let reply = tokio::task::spawn_blocking(move || raw_exchange(&socket, b"FAKE-9x\n"))
        .await
        .expect("raw task");
    let doc = reply.to_document();
    assert_eq!(doc.error.as_deref(), Some("not_found"));
    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_requests_get_bad_request() {
    let tmp = tempdir().expect("tempdir");
    let store = local_store(tmp.path());
    let manager = Manager::start(tmp.path(), store, control_at(tmp.path())).await;

    let socket = manager.socket.clone();
    let replies = tokio::task::spawn_blocking(move || {
        let long = [vec![b'A'; 300], b"-1h\n".to_vec()].concat();
        [
            &b"not a dataset\n"[..],
            &[0xff, 0xfe, b'\n'][..],
            &long[..],
            &b"\n"[..],
        ]
        .iter()
        .map(|raw| raw_exchange(&socket, raw))
        .collect::<Vec<_>>()
    })
    .await
    .expect("raw task");
    for reply in replies {
        assert_eq!(reply.to_document().error.as_deref(), Some("bad_request"));
    }
    // The server keeps serving after bad requests.
    manager.open("ETHUSDT-1h").await.expect("still serving");
    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_connection_gets_bad_request_after_timeout() {
    let tmp = tempdir().expect("tempdir");
    let store = local_store(tmp.path());
    let control = ControlConfig {
        request_timeout: Duration::from_millis(100),
        ..control_at(tmp.path())
    };
    let manager = Manager::start(tmp.path(), store, control).await;

    let socket = manager.socket.clone();
    let reply = tokio::task::spawn_blocking(move || {
        let mut stream = std::os::unix::net::UnixStream::connect(&socket).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).expect("read reply");
        decode_frame(&reply).expect("frame")
    })
    .await
    .expect("raw task");
    assert_eq!(reply.to_document().error.as_deref(), Some("bad_request"));
    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_share_one_fetch() {
    let tmp = tempdir().expect("tempdir");
    let fake = Arc::new(FakeStore::default());
    fake.insert(&DatasetName::parse("ETHUSDT-1h").expect("name"), &candles())
        .await
        .expect("seed");
    let manager = Manager::start(tmp.path(), fake.clone(), control_at(tmp.path())).await;

    let mut joins = Vec::new();
    for _ in 0..8 {
        let client = DatasetClient::new(&manager.socket).with_timeout(Duration::from_secs(5));
        joins.push(tokio::task::spawn_blocking(move || client.open("ETHUSDT-1h")));
    }
    for join in joins {
        let dataset = join.await.expect("client task").expect("open");
        assert_eq!(dataset.metadata().candles, 3);
    }
    assert_eq!(fake.metadata_fetches(), 1);
    wait_for_release(&manager.cache, "ETHUSDT-1h").await;
    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_artifact_is_reported_as_integrity_error() {
    let tmp = tempdir().expect("tempdir");
    let fake = Arc::new(FakeStore::default());
    fake.insert(&DatasetName::parse("ETHUSDT-1h").expect("name"), &candles())
        .await
        .expect("seed");
    fake.corrupt_artifacts
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let manager = Manager::start(tmp.path(), fake, control_at(tmp.path())).await;

    let err = manager.open("ETHUSDT-1h").await.expect_err("corrupt");
    assert_eq!(err.code, ErrorCode::Integrity);
    assert!(!err.is_retryable());
    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bind_replaces_stale_socket_and_refuses_live_one() {
    let tmp = tempdir().expect("tempdir");
    let control = control_at(tmp.path());
    drop(std::os::unix::net::UnixListener::bind(&control.socket_path).expect("stale socket"));
    assert!(control.socket_path.exists());

    let store = local_store(tmp.path());
    let manager = Manager::start(tmp.path(), store.clone(), control.clone()).await;
    let mode = std::fs::metadata(&manager.socket)
        .expect("socket metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o660);

    let cache = DatasetCache::new(
        CacheConfig {
            root: tmp.path().join("other-cache"),
            ..CacheConfig::default()
        },
        store,
    )
    .expect("cache");
    let err = ControlServer::bind(&control, cache)
        .err()
        .expect("live socket must not be replaced");
    assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bare_name_without_newline_or_half_close_is_served() {
    let tmp = tempdir().expect("tempdir");
    let store = local_store(tmp.path());
    let manager = Manager::start(tmp.path(), store, control_at(tmp.path())).await;

    let socket = manager.socket.clone();
    let (reply, elapsed) = tokio::task::spawn_blocking(move || {
        let started = std::time::Instant::now();
        let mut stream = std::os::unix::net::UnixStream::connect(&socket).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        // Write side stays open, like a client that goes straight to recvmsg.
        stream.write_all(b"ETHUSDT-1h").expect("write");
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).expect("read reply");
        (decode_frame(&reply).expect("frame"), started.elapsed())
    })
    .await
    .expect("raw task");
    let doc = reply.to_document();
    assert!(doc.ok, "unexpected reply: {doc:?}");
    assert_eq!(doc.metadata.map(|m| m.candles), Some(3));
    assert!(
        elapsed < ControlConfig::default().request_timeout,
        "request waited for the read timeout: {elapsed:?}"
    );
    wait_for_release(&manager.cache, "ETHUSDT-1h").await;
    manager.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_disconnect_mid_fill_still_caches_dataset() {
    let tmp = tempdir().expect("tempdir");
    let fake = Arc::new(FakeStore::default());
    let ds = DatasetName::parse("ETHUSDT-1h").expect("name");
    fake.insert(&ds, &candles()).await.expect("seed");
    fake.slow_read
        .store(true, std::sync::atomic::Ordering::Relaxed);
    let manager = Manager::start(tmp.path(), fake.clone(), control_at(tmp.path())).await;

    let socket = manager.socket.clone();
    tokio::task::spawn_blocking(move || {
        let mut stream = std::os::unix::net::UnixStream::connect(&socket).expect("connect");
        stream.write_all(b"ETHUSDT-1h\n").expect("write");
    })
    .await
    .expect("raw task");

    let mut cached = false;
    for _ in 0..200 {
        if manager
            .cache
            .cached_datasets()
            .await
            .iter()
            .any(|d| d.name == "ETHUSDT-1h")
        {
            cached = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cached, "fill abandoned after the client went away");
    wait_for_release(&manager.cache, "ETHUSDT-1h").await;

    fake.slow_read
        .store(false, std::sync::atomic::Ordering::Relaxed);
    let dataset = manager.open("ETHUSDT-1h").await.expect("open after disconnect");
    dataset.verify_digest().expect("digest");
    let stats = manager.cache.stats().await;
    assert_eq!(stats.remote_fetches, 1);
    assert!(stats.hits >= 1);
    assert_eq!(fake.metadata_fetches(), 1);
    wait_for_release(&manager.cache, "ETHUSDT-1h").await;
    assert_eq!(manager.cache.ref_count(&ds).await, Some(0));
    manager.stop().await;
}
