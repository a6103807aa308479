// SPDX-License-Identifier: Apache-2.0

//! Verified local cache of published datasets.
//!
//! Each dataset is installed once as a content-addressed file and kept open
//! read-only. Clients never receive the cache's own descriptor, only
//! duplicates of it, so closing an evicted entry cannot affect a mapping.

use crate::CacheError;
use dataset_manager_core::{resolve_cache_dir, ErrorCode};
use dataset_manager_model::{ContentDigest, DatasetMetadata, DatasetName};
use dataset_manager_store::ObjectStore;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn, Instrument};

mod install;
mod maintenance;

use install::{CachePaths, InstalledFile};

#[derive(Debug, Clone, Serialize)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub max_open_files: usize,
    pub max_concurrent_fetches: usize,
    pub verify_on_hit: bool,
    pub reverify_interval: Duration,
    pub eviction_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: resolve_cache_dir(),
            max_open_files: 64,
            max_concurrent_fetches: 4,
            verify_on_hit: true,
            reverify_interval: Duration::from_secs(300),
            eviction_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub remote_fetches: AtomicU64,
    pub disk_adoptions: AtomicU64,
    pub integrity_failures: AtomicU64,
    pub evictions: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub remote_fetches: u64,
    pub disk_adoptions: u64,
    pub integrity_failures: u64,
    pub evictions: u64,
    pub entries: usize,
    pub referenced_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedDatasetInfo {
    pub name: String,
    pub digest: String,
    pub size_bytes: u64,
    pub ref_count: usize,
}

/// A verified, installed dataset file.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub name: DatasetName,
    pub path: PathBuf,
    pub digest: ContentDigest,
    pub metadata: DatasetMetadata,
    pub size_bytes: u64,
    file: Arc<File>,
}

impl CacheEntry {
    fn from_installed(name: DatasetName, installed: InstalledFile) -> Self {
        Self {
            name,
            path: installed.path,
            digest: installed.digest,
            metadata: installed.metadata,
            size_bytes: installed.size_bytes,
            file: Arc::new(installed.file),
        }
    }

    /// New read-only descriptor for the same open file.
    pub fn duplicate_fd(&self) -> Result<File, CacheError> {
        self.file
            .try_clone()
            .map_err(|e| CacheError::internal(format!("descriptor dup failed: {e}")))
    }
}

/// Result of `DatasetCache::acquire`: metadata plus a private duplicate of
/// the backing descriptor, ready to be sent to a client.
#[derive(Debug)]
pub struct AcquiredDataset {
    pub name: DatasetName,
    pub metadata: DatasetMetadata,
    pub digest: ContentDigest,
    file: File,
}

impl AcquiredDataset {
    #[must_use]
    pub fn into_file(self) -> File {
        self.file
    }
}

impl AsFd for AcquiredDataset {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

struct Slot {
    entry: CacheEntry,
    ref_count: usize,
    last_access: Instant,
    // Failed re-verification while still referenced; dropped on last release.
    invalid: bool,
}

impl Slot {
    fn new(entry: CacheEntry) -> Self {
        Self {
            entry,
            ref_count: 0,
            last_access: Instant::now(),
            invalid: false,
        }
    }
}

pub struct DatasetCache {
    cfg: CacheConfig,
    store: Arc<dyn ObjectStore>,
    entries: Mutex<HashMap<DatasetName, Slot>>,
    inflight: Mutex<HashMap<DatasetName, Arc<Mutex<()>>>>,
    fetch_semaphore: Arc<Semaphore>,
    pub metrics: Arc<CacheMetrics>,
}

impl DatasetCache {
    /// Prepares the cache root and discards temporary files left behind by
    /// an interrupted install.
    pub fn new(cfg: CacheConfig, store: Arc<dyn ObjectStore>) -> Result<Arc<Self>, CacheError> {
        let purged = install::prepare_cache_root(&cfg.root)?;
        if purged > 0 {
            info!(purged, root = %cfg.root.display(), "removed stale temporary files");
        }
        Ok(Arc::new(Self {
            fetch_semaphore: Arc::new(Semaphore::new(cfg.max_concurrent_fetches.max(1))),
            cfg,
            store,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            metrics: Arc::new(CacheMetrics::default()),
        }))
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    /// Returns a verified entry for `name`, fetching and installing it on a
    /// miss. Concurrent misses for one name share a single fetch, and the
    /// fill keeps running if the caller goes away.
    pub async fn resolve(self: &Arc<Self>, name: &DatasetName) -> Result<CacheEntry, CacheError> {
        if let Some(entry) = self.lookup(name).await? {
            self.metrics.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry);
        }
        self.metrics.misses.fetch_add(1, Ordering::Relaxed);

        let me = Arc::clone(self);
        let owned = name.clone();
        let span = tracing::info_span!("cache_fill", dataset = %name);
        tokio::spawn(async move { me.fill_single_flight(&owned).await }.instrument(span))
            .await
            .map_err(|e| CacheError::internal(format!("cache fill task failed: {e}")))?
    }

    /// `resolve` plus one reference. Pair every success with `release`.
    pub async fn acquire(self: &Arc<Self>, name: &DatasetName) -> Result<AcquiredDataset, CacheError> {
        let resolved = self.resolve(name).await?;
        let file = resolved.duplicate_fd()?;
        let mut entries = self.entries.lock().await;
        let slot = entries
            .entry(name.clone())
            .or_insert_with(|| Slot::new(resolved.clone()));
        slot.ref_count += 1;
        slot.last_access = Instant::now();
        Ok(AcquiredDataset {
            name: name.clone(),
            metadata: resolved.metadata,
            digest: resolved.digest,
            file,
        })
    }

    pub async fn release(&self, name: &DatasetName) {
        let over_capacity = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(name) {
                Some(slot) if slot.ref_count > 0 => {
                    slot.ref_count -= 1;
                    if slot.ref_count == 0 && slot.invalid {
                        entries.remove(name);
                    }
                }
                _ => warn!(dataset = %name, "release without a matching acquire"),
            }
            entries.len() > self.cfg.max_open_files
        };
        if over_capacity {
            self.evict_over_capacity(None).await;
        }
    }

    pub async fn ref_count(&self, name: &DatasetName) -> Option<usize> {
        self.entries.lock().await.get(name).map(|s| s.ref_count)
    }

    pub async fn stats(&self) -> CacheStats {
        let (entries, referenced_entries) = {
            let entries = self.entries.lock().await;
            (
                entries.len(),
                entries.values().filter(|s| s.ref_count > 0).count(),
            )
        };
        CacheStats {
            hits: self.metrics.hits.load(Ordering::Relaxed),
            misses: self.metrics.misses.load(Ordering::Relaxed),
            remote_fetches: self.metrics.remote_fetches.load(Ordering::Relaxed),
            disk_adoptions: self.metrics.disk_adoptions.load(Ordering::Relaxed),
            integrity_failures: self.metrics.integrity_failures.load(Ordering::Relaxed),
            evictions: self.metrics.evictions.load(Ordering::Relaxed),
            entries,
            referenced_entries,
        }
    }

    pub async fn cached_datasets(&self) -> Vec<CachedDatasetInfo> {
        let entries = self.entries.lock().await;
        let mut out: Vec<CachedDatasetInfo> = entries
            .values()
            .map(|slot| CachedDatasetInfo {
                name: slot.entry.name.canonical_string(),
                digest: slot.entry.digest.to_string(),
                size_bytes: slot.entry.size_bytes,
                ref_count: slot.ref_count,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    async fn lookup(&self, name: &DatasetName) -> Result<Option<CacheEntry>, CacheError> {
        let entry = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(name) {
                Some(slot) if !slot.invalid => {
                    slot.last_access = Instant::now();
                    slot.entry.clone()
                }
                _ => return Ok(None),
            }
        };
        if self.entry_intact(&entry).await? {
            return Ok(Some(entry));
        }
        self.metrics
            .integrity_failures
            .fetch_add(1, Ordering::Relaxed);
        error!(
            dataset = %name,
            path = %entry.path.display(),
            "cached dataset failed verification; refetching"
        );
        self.invalidate(name, &entry.digest).await;
        Ok(None)
    }

    async fn entry_intact(&self, entry: &CacheEntry) -> Result<bool, CacheError> {
        let on_disk = match tokio::fs::metadata(&entry.path).await {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if on_disk != entry.size_bytes {
            return Ok(false);
        }
        if !self.cfg.verify_on_hit {
            return Ok(true);
        }
        let path = entry.path.clone();
        let digest = entry.digest.clone();
        tokio::task::spawn_blocking(move || install::file_matches(&path, &digest))
            .await
            .map_err(|e| CacheError::internal(format!("verify task failed: {e}")))
    }

    async fn invalidate(&self, name: &DatasetName, digest: &ContentDigest) {
        let mut entries = self.entries.lock().await;
        let referenced = match entries.get_mut(name) {
            Some(slot) if &slot.entry.digest == digest => {
                slot.invalid = true;
                slot.ref_count > 0
            }
            _ => return,
        };
        if !referenced {
            entries.remove(name);
        }
    }

    async fn insert(&self, entry: CacheEntry) {
        let mut entries = self.entries.lock().await;
        let inherited = entries.get(&entry.name).map_or(0, |s| s.ref_count);
        let name = entry.name.clone();
        let mut slot = Slot::new(entry);
        slot.ref_count = inherited;
        entries.insert(name, slot);
    }

    async fn fill_single_flight(&self, name: &DatasetName) -> Result<CacheEntry, CacheError> {
        let lock = {
            let mut map = self.inflight.lock().await;
            Arc::clone(
                map.entry(name.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let result = self.fill_under_lock(name, &lock).await;

        let mut map = self.inflight.lock().await;
        if let Some(existing) = map.get(name) {
            // Two owners left: the map and this call.
            if Arc::ptr_eq(existing, &lock) && Arc::strong_count(&lock) <= 2 {
                map.remove(name);
            }
        }
        result
    }

    async fn fill_under_lock(
        &self,
        name: &DatasetName,
        lock: &Mutex<()>,
    ) -> Result<CacheEntry, CacheError> {
        let _guard = lock.lock().await;
        if let Some(entry) = self.lookup(name).await? {
            return Ok(entry);
        }
        self.fill(name).await
    }

    async fn fill(&self, name: &DatasetName) -> Result<CacheEntry, CacheError> {
        let entry = match self.adopt_from_disk(name).await? {
            Some(entry) => {
                self.metrics.disk_adoptions.fetch_add(1, Ordering::Relaxed);
                info!(
                    dataset = %name,
                    digest = %entry.digest,
                    "adopted verified dataset from disk"
                );
                entry
            }
            None => self.fetch_and_install(name).await.inspect_err(|e| {
                if e.code == ErrorCode::Integrity {
                    self.metrics
                        .integrity_failures
                        .fetch_add(1, Ordering::Relaxed);
                    error!(dataset = %name, error = %e, "dataset integrity verification failed");
                } else {
                    warn!(dataset = %name, error = %e, "dataset fetch failed");
                }
            })?,
        };
        self.insert(entry.clone()).await;
        self.evict_over_capacity(Some(name)).await;
        Ok(entry)
    }

    async fn adopt_from_disk(&self, name: &DatasetName) -> Result<Option<CacheEntry>, CacheError> {
        let paths = CachePaths::new(&self.cfg.root, name);
        let owned = name.clone();
        let found = tokio::task::spawn_blocking(move || install::adopt_verified(&paths, &owned))
            .await
            .map_err(|e| CacheError::internal(format!("warm start task failed: {e}")))??;
        Ok(found.map(|installed| CacheEntry::from_installed(name.clone(), installed)))
    }

    async fn fetch_and_install(&self, name: &DatasetName) -> Result<CacheEntry, CacheError> {
        let _permit = self
            .fetch_semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| CacheError::internal(e.to_string()))?;
        self.metrics.remote_fetches.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        info!(
            dataset = %name,
            backend = self.store.backend_tag(),
            "dataset download start"
        );

        let metadata = self.store.fetch_metadata(name).await?;
        if !metadata.describes(name) {
            return Err(CacheError::integrity(format!(
                "metadata describes {} but {} was requested",
                metadata.name(),
                name
            )));
        }
        let expected = metadata
            .digest()
            .map_err(|e| CacheError::integrity(e.to_string()))?;
        let artifact = self.store.fetch_artifact(name).await?;
        let compressed_bytes = artifact.len();

        let paths = CachePaths::new(&self.cfg.root, name);
        let installed = tokio::task::spawn_blocking(move || {
            install::install_verified(&paths, &artifact, &metadata, &expected)
        })
        .await
        .map_err(|e| CacheError::internal(format!("install task failed: {e}")))??;

        info!(
            dataset = %name,
            digest = %installed.digest,
            bytes = installed.size_bytes,
            compressed_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dataset download complete"
        );
        Ok(CacheEntry::from_installed(name.clone(), installed))
    }
}
