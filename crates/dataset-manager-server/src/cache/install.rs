// SPDX-License-Identifier: Apache-2.0

use crate::CacheError;
use dataset_manager_model::{ContentDigest, DatasetMetadata, DatasetName, DigestWriter};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub(super) const TMP_DIR: &str = ".tmp";
pub(super) const METADATA_FILE: &str = "metadata.json";
const DATA_EXTENSION: &str = "bin";
const COPY_BUFFER_BYTES: usize = 64 * 1024;

/// On-disk layout for one dataset: `{root}/{name}/{hex}.bin` next to the
/// `metadata.json` that vouches for it.
#[derive(Debug, Clone)]
pub(super) struct CachePaths {
    pub name: String,
    pub dataset_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub tmp_dir: PathBuf,
}

impl CachePaths {
    pub fn new(root: &Path, name: &DatasetName) -> Self {
        let name = name.canonical_string();
        let dataset_dir = root.join(&name);
        Self {
            metadata_file: dataset_dir.join(METADATA_FILE),
            tmp_dir: root.join(TMP_DIR),
            dataset_dir,
            name,
        }
    }

    pub fn data_file(&self, digest: &ContentDigest) -> PathBuf {
        self.dataset_dir
            .join(format!("{}.{DATA_EXTENSION}", digest.hex()))
    }
}

#[derive(Debug)]
pub(super) struct InstalledFile {
    pub file: File,
    pub path: PathBuf,
    pub digest: ContentDigest,
    pub metadata: DatasetMetadata,
    pub size_bytes: u64,
}

/// Creates the cache root and empties its temp directory. Returns how many
/// leftover entries were removed.
pub(super) fn prepare_cache_root(root: &Path) -> Result<usize, CacheError> {
    ensure_secure_dir(root)?;
    let tmp = root.join(TMP_DIR);
    let mut purged = 0;
    match std::fs::read_dir(&tmp) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let path = entry.path();
                let removed = if path.is_dir() {
                    std::fs::remove_dir_all(&path)
                } else {
                    std::fs::remove_file(&path)
                };
                match removed {
                    Ok(()) => purged += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to purge temp entry"),
                }
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    ensure_secure_dir(&tmp)?;
    Ok(purged)
}

/// Decompresses `artifact` into a temp file while hashing it, and only
/// publishes the file into the cache layout once digest and length match
/// `metadata`. Nothing is left behind on failure.
pub(super) fn install_verified(
    paths: &CachePaths,
    artifact: &[u8],
    metadata: &DatasetMetadata,
    expected: &ContentDigest,
) -> Result<InstalledFile, CacheError> {
    ensure_secure_dir(&paths.dataset_dir)?;
    ensure_secure_dir(&paths.tmp_dir)?;
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{}.", paths.name))
        .suffix(".part")
        .tempfile_in(&paths.tmp_dir)?;

    let mut decoder = MultiGzDecoder::new(artifact);
    let mut digest = DigestWriter::new();
    let mut buf = vec![0_u8; COPY_BUFFER_BYTES];
    loop {
        let n = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(CacheError::integrity(format!(
                    "artifact decompression failed: {e}"
                )))
            }
        };
        digest.write_all(&buf[..n])?;
        tmp.as_file_mut().write_all(&buf[..n])?;
    }

    let size_bytes = digest.bytes_written();
    let actual = digest.finish();
    if &actual != expected {
        return Err(CacheError::integrity(format!(
            "digest mismatch for {}: expected {expected}, got {actual}",
            paths.name
        )));
    }
    if size_bytes != metadata.expected_len() {
        return Err(CacheError::integrity(format!(
            "{} decompressed to {size_bytes} bytes, metadata promises {} records of {} bytes",
            paths.name, metadata.candles, metadata.bytes_per_record
        )));
    }
    tmp.as_file().sync_all()?;

    let data_path = paths.data_file(expected);
    tmp.persist(&data_path)
        .map_err(|e| CacheError::internal(format!("install rename failed: {}", e.error)))?;
    let encoded = serde_json::to_vec_pretty(metadata)
        .map_err(|e| CacheError::internal(format!("metadata encode failed: {e}")))?;
    write_atomic_file(&paths.metadata_file, &encoded)?;
    sync_dir(&paths.dataset_dir);
    prune_superseded(&paths.dataset_dir, &data_path);

    let file = File::open(&data_path)?;
    Ok(InstalledFile {
        file,
        path: data_path,
        digest: actual,
        metadata: metadata.clone(),
        size_bytes,
    })
}

/// Warm start: reuses a previously installed file if its metadata still
/// describes `name` and its bytes still hash to the recorded digest. Stale
/// or damaged leftovers are removed so the caller refetches.
pub(super) fn adopt_verified(
    paths: &CachePaths,
    name: &DatasetName,
) -> Result<Option<InstalledFile>, CacheError> {
    let raw = match std::fs::read(&paths.metadata_file) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let metadata = match DatasetMetadata::from_json_slice(&raw) {
        Ok(m) if m.describes(name) => m,
        Ok(m) => {
            warn!(dataset = %name, found = %m.name(), "cached metadata names another dataset");
            discard_dataset_dir(paths);
            return Ok(None);
        }
        Err(e) => {
            warn!(dataset = %name, error = %e, "cached metadata is invalid");
            discard_dataset_dir(paths);
            return Ok(None);
        }
    };
    let Ok(expected) = metadata.digest() else {
        discard_dataset_dir(paths);
        return Ok(None);
    };
    let data_path = paths.data_file(&expected);
    let (actual, size_bytes) = match hash_file(&data_path) {
        Ok(found) => found,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if actual != expected || size_bytes != metadata.expected_len() {
        warn!(
            dataset = %name,
            path = %data_path.display(),
            "cached file does not match its metadata; discarding"
        );
        discard_dataset_dir(paths);
        return Ok(None);
    }
    let file = File::open(&data_path)?;
    Ok(Some(InstalledFile {
        file,
        path: data_path,
        digest: actual,
        metadata,
        size_bytes,
    }))
}

pub(super) fn hash_file(path: &Path) -> std::io::Result<(ContentDigest, u64)> {
    let mut file = File::open(path)?;
    let mut writer = DigestWriter::new();
    std::io::copy(&mut file, &mut writer)?;
    let len = writer.bytes_written();
    Ok((writer.finish(), len))
}

pub(super) fn file_matches(path: &Path, expected: &ContentDigest) -> bool {
    matches!(hash_file(path), Ok((actual, _)) if &actual == expected)
}

fn discard_dataset_dir(paths: &CachePaths) {
    if let Err(e) = std::fs::remove_dir_all(&paths.dataset_dir) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %paths.dataset_dir.display(), error = %e, "failed to discard cache dir");
        }
    }
}

// Older content-addressed files stay valid for existing mappings after unlink.
fn prune_superseded(dir: &Path, keep: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_data = path.extension().and_then(|e| e.to_str()) == Some(DATA_EXTENSION);
        if is_data && path != keep {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "pruned superseded dataset file"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to prune dataset file"),
            }
        }
    }
}

fn write_atomic_file(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let parent = path
        .parent()
        .ok_or_else(|| CacheError::internal("atomic write missing parent"))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".metadata.")
        .tempfile_in(parent)?;
    tmp.as_file_mut().write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| CacheError::internal(format!("atomic rename failed: {}", e.error)))?;
    Ok(())
}

fn sync_dir(dir: &Path) {
    let synced = File::open(dir).and_then(|handle| handle.sync_all());
    if let Err(e) = synced {
        warn!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
}

fn ensure_secure_dir(path: &Path) -> Result<(), CacheError> {
    std::fs::create_dir_all(path)?;
    use std::os::unix::fs::PermissionsExt;
    let mut mode = std::fs::metadata(path)?.permissions().mode();
    if mode & 0o002 != 0 {
        mode &= !0o002;
        match std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
            Ok(()) => {}
            // Mounted volume roots may belong to another user.
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
