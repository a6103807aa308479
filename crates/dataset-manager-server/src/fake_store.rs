// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use dataset_manager_model::{encode, DatasetMetadata, DatasetName, DatasetRecord};
use dataset_manager_store::{compress_artifact, ObjectStore, StoreError, StoreErrorCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// In-memory object store for tests and benchmarks.
pub struct FakeStore {
    pub metadata: Mutex<HashMap<DatasetName, DatasetMetadata>>,
    pub artifacts: Mutex<HashMap<DatasetName, Vec<u8>>>,
    pub fetch_calls: AtomicU64,
    pub artifact_calls: AtomicU64,
    /// Flip one byte of every served artifact.
    pub corrupt_artifacts: AtomicBool,
    /// Delay every store call by 200ms.
    pub slow_read: AtomicBool,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            metadata: Mutex::new(HashMap::new()),
            artifacts: Mutex::new(HashMap::new()),
            fetch_calls: AtomicU64::new(0),
            artifact_calls: AtomicU64::new(0),
            corrupt_artifacts: AtomicBool::new(false),
            slow_read: AtomicBool::new(false),
        }
    }
}

impl FakeStore {
    /// Publishes `records` under `name` the same way an ingest run would.
    pub async fn insert(
        &self,
        name: &DatasetName,
        records: &[DatasetRecord],
    ) -> Result<DatasetMetadata, StoreError> {
        let metadata = DatasetMetadata::describe(
            name.symbol.as_str(),
            name.timeframe.as_str(),
            records,
        )
        .map_err(|e| StoreError::new(StoreErrorCode::Validation, e.0))?;
        let artifact = compress_artifact(&encode(records))?;
        self.metadata
            .lock()
            .await
            .insert(name.clone(), metadata.clone());
        self.artifacts.lock().await.insert(name.clone(), artifact);
        Ok(metadata)
    }

    pub fn metadata_fetches(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    fn backend_tag(&self) -> &'static str {
        "fake"
    }

    async fn fetch_metadata(&self, name: &DatasetName) -> Result<DatasetMetadata, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);
        if self.slow_read.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        self.metadata
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&name.canonical_string()))
    }

    async fn fetch_artifact(&self, name: &DatasetName) -> Result<Vec<u8>, StoreError> {
        self.artifact_calls.fetch_add(1, Ordering::Relaxed);
        if self.slow_read.load(Ordering::Relaxed) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let mut bytes = self
            .artifacts
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found(&name.canonical_string()))?;
        if self.corrupt_artifacts.load(Ordering::Relaxed) {
            let mid = bytes.len() / 2;
            if let Some(byte) = bytes.get_mut(mid) {
                *byte ^= 0xff;
            }
        }
        Ok(bytes)
    }
}
