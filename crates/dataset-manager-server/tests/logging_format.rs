use dataset_manager_model::{DatasetName, DatasetRecord};
use dataset_manager_server::{CacheConfig, DatasetCache, FakeStore};
use std::io;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::other("lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn json_lines(sink: &SharedBuffer) -> Vec<serde_json::Value> {
    let bytes = sink.0.lock().expect("lock output").clone();
    let text = String::from_utf8(bytes).expect("utf8 log output");
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("json log line"))
        .collect()
}

#[tokio::test]
async fn cache_fill_logs_are_valid_json_with_dataset_fields() {
    let sink = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .json()
        .with_max_level(Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let name = DatasetName::parse("ETHUSDT-1h").expect("name");
    let store = Arc::new(FakeStore::default());
    let records: Vec<DatasetRecord> = (0..3)
        .map(|i| DatasetRecord {
            timestamp: 1_700_000_000 + i * 3_600,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        })
        .collect();
    store.insert(&name, &records).await.expect("seed");
    let tmp = tempdir().expect("tempdir");
    let cache = DatasetCache::new(
        CacheConfig {
            root: tmp.path().to_path_buf(),
            ..CacheConfig::default()
        },
        store,
    )
    .expect("cache");
    cache.resolve(&name).await.expect("resolve");

    let lines = json_lines(&sink);
    assert!(!lines.is_empty());
    let complete = lines
        .iter()
        .find(|l| {
            l.pointer("/fields/message").and_then(|v| v.as_str())
                == Some("dataset download complete")
        })
        .expect("download complete line");
    assert_eq!(complete.get("level").and_then(|v| v.as_str()), Some("INFO"));
    assert_eq!(
        complete.pointer("/fields/dataset").and_then(|v| v.as_str()),
        Some("ETHUSDT-1h")
    );
    assert_eq!(
        complete.pointer("/fields/bytes").and_then(|v| v.as_u64()),
        Some(84)
    );
    assert_eq!(
        complete.pointer("/span/name").and_then(|v| v.as_str()),
        Some("cache_fill")
    );
}
