// SPDX-License-Identifier: Apache-2.0

//! Writes datasets into a local bucket directory, the same layout the
//! ingest pipeline uploads. Used to seed `local:` stores and by tests.

use crate::paths::{dataset_keys, PUBLISH_LOCK_FILE};
use crate::{StoreError, StoreErrorCode};
use dataset_manager_model::{encode, DatasetMetadata, DatasetRecord};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Held while a dataset directory is being written.
pub struct PublishLockGuard {
    lock_path: PathBuf,
}

impl PublishLockGuard {
    pub fn acquire(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(io_error)?;
        let lock_path = dir.join(PUBLISH_LOCK_FILE);
        match OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&lock_path)
        {
            Ok(_) => Ok(Self { lock_path }),
            Err(e) => Err(StoreError::new(
                StoreErrorCode::Conflict,
                format!("failed to acquire publish lock: {e}"),
            )),
        }
    }
}

impl Drop for PublishLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// Gzip at the level the ingest pipeline uses.
pub fn compress_artifact(raw: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(6));
    encoder.write_all(raw).map_err(io_error)?;
    encoder.finish().map_err(io_error)
}

/// Publishes `records` under `<root>/<prefix>/<SYMBOL>/<timeframe>/` and
/// returns the metadata written beside them.
pub fn publish_dataset(
    root: &Path,
    prefix: &str,
    symbol: &str,
    timeframe: &str,
    records: &[DatasetRecord],
) -> Result<DatasetMetadata, StoreError> {
    let metadata = DatasetMetadata::describe(symbol, timeframe, records)
        .map_err(|e| StoreError::new(StoreErrorCode::Validation, e.to_string()))?;
    let name = metadata
        .dataset_name()
        .map_err(|e| StoreError::new(StoreErrorCode::Validation, e.to_string()))?;
    let keys = dataset_keys(prefix, &name);
    let dir = root.join(&keys.dir);
    let _guard = PublishLockGuard::acquire(&dir)?;

    let artifact = compress_artifact(&encode(records))?;
    let meta_bytes = serde_json::to_vec_pretty(&metadata)
        .map_err(|e| StoreError::new(StoreErrorCode::Internal, e.to_string()))?;

    let artifact_path = root.join(&keys.artifact);
    let metadata_path = root.join(&keys.metadata);
    let artifact_tmp = dir.join(".candles.bin.gz.tmp");
    let metadata_tmp = dir.join(".meta.json.tmp");
    write_and_sync(&artifact_tmp, &artifact)?;
    write_and_sync(&metadata_tmp, &meta_bytes)?;
    // Artifact lands first so a reader never sees metadata without data.
    fs::rename(&artifact_tmp, &artifact_path).map_err(io_error)?;
    fs::rename(&metadata_tmp, &metadata_path).map_err(io_error)?;
    sync_dir(&dir)?;

    info!(
        dataset = %name,
        candles = metadata.candles,
        compressed_bytes = artifact.len(),
        "dataset published"
    );
    Ok(metadata)
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut f = fs::File::create(path).map_err(io_error)?;
    f.write_all(bytes).map_err(io_error)?;
    f.sync_all().map_err(io_error)?;
    Ok(())
}

fn sync_dir(dir: &Path) -> Result<(), StoreError> {
    let f = OpenOptions::new().read(true).open(dir).map_err(io_error)?;
    f.sync_all().map_err(io_error)?;
    Ok(())
}

fn io_error(e: std::io::Error) -> StoreError {
    StoreError::new(StoreErrorCode::Io, e.to_string())
}
