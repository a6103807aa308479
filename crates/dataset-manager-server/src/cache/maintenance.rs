// SPDX-License-Identifier: Apache-2.0

use super::{install, DatasetCache};
use crate::CacheError;
use dataset_manager_model::{ContentDigest, DatasetName};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

impl DatasetCache {
    /// Starts the eviction sweep and the periodic re-verification loop.
    /// Both stop when the last other reference to the cache is dropped.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let every = self.cfg.eviction_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.evict_over_capacity(None).await;
            }
        });

        let weak = Arc::downgrade(self);
        let every = self.cfg.reverify_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                match cache.reverify_cached_datasets().await {
                    Ok(0) => debug!("re-verification found no damaged datasets"),
                    Ok(dropped) => warn!(dropped, "re-verification dropped damaged datasets"),
                    Err(e) => warn!(error = %e, "re-verification pass failed"),
                }
            }
        });
    }

    /// Closes least recently used, unreferenced descriptors until the open
    /// count fits `max_open_files`. Files stay on disk for warm starts.
    /// `keep` protects an entry that was just installed.
    pub async fn evict_over_capacity(&self, keep: Option<&DatasetName>) -> usize {
        let mut entries = self.entries.lock().await;
        let mut evicted = 0;

        let stale: Vec<DatasetName> = entries
            .iter()
            .filter(|(_, slot)| slot.invalid && slot.ref_count == 0)
            .map(|(name, _)| name.clone())
            .collect();
        for name in stale {
            entries.remove(&name);
            evicted += 1;
        }

        while entries.len() > self.cfg.max_open_files {
            let victim = entries
                .iter()
                .filter(|(name, slot)| slot.ref_count == 0 && Some(*name) != keep)
                .min_by_key(|(_, slot)| slot.last_access)
                .map(|(name, _)| name.clone());
            let Some(victim) = victim else {
                warn!(
                    open = entries.len(),
                    limit = self.cfg.max_open_files,
                    "descriptor limit exceeded but every entry is referenced"
                );
                break;
            };
            if let Some(slot) = entries.remove(&victim) {
                info!(
                    dataset = %victim,
                    size_bytes = slot.entry.size_bytes,
                    "evicted dataset descriptor"
                );
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.metrics
                .evictions
                .fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// Rehashes every unreferenced entry and drops those whose file no
    /// longer matches. Returns how many were dropped.
    pub async fn reverify_cached_datasets(&self) -> Result<usize, CacheError> {
        let candidates: Vec<(DatasetName, PathBuf, ContentDigest)> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|(_, slot)| slot.ref_count == 0 && !slot.invalid)
                .map(|(name, slot)| {
                    (
                        name.clone(),
                        slot.entry.path.clone(),
                        slot.entry.digest.clone(),
                    )
                })
                .collect()
        };

        let mut dropped = 0;
        for (name, path, digest) in candidates {
            let check_path = path.clone();
            let check_digest = digest.clone();
            let intact = tokio::task::spawn_blocking(move || {
                install::file_matches(&check_path, &check_digest)
            })
            .await
            .map_err(|e| CacheError::internal(format!("verify task failed: {e}")))?;
            if !intact {
                self.metrics
                    .integrity_failures
                    .fetch_add(1, Ordering::Relaxed);
                error!(
                    dataset = %name,
                    path = %path.display(),
                    "cached dataset failed re-verification"
                );
                self.invalidate(&name, &digest).await;
                dropped += 1;
            }
        }
        Ok(dropped)
    }
}
