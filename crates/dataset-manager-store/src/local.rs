// SPDX-License-Identifier: Apache-2.0

use crate::paths::dataset_keys;
use crate::{parse_metadata, ObjectStore, StoreError, StoreErrorCode};
use async_trait::async_trait;
use dataset_manager_model::{DatasetMetadata, DatasetName};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::instrument;

/// A directory laid out exactly like the bucket.
pub struct LocalFsBackend {
    root: PathBuf,
    prefix: String,
}

impl LocalFsBackend {
    #[must_use]
    pub fn new(root: PathBuf, prefix: impl Into<String>) -> Self {
        Self {
            root,
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    async fn read_safe(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let root = tokio::fs::canonicalize(&self.root)
            .await
            .unwrap_or_else(|_| self.root.clone());
        let path = self.root.join(key);
        let canonical = match tokio::fs::canonicalize(&path).await {
            Ok(p) => p,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::not_found(key)),
            Err(e) => {
                return Err(StoreError::new(
                    StoreErrorCode::Io,
                    format!("path check failed for {key}: {e}"),
                ))
            }
        };
        if !canonical.starts_with(&root) {
            return Err(StoreError::new(
                StoreErrorCode::Validation,
                format!("path traversal blocked: {key}"),
            ));
        }
        tokio::fs::read(&canonical).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::not_found(key)
            } else {
                StoreError::new(StoreErrorCode::Io, format!("read failed for {key}: {e}"))
            }
        })
    }
}

#[async_trait]
impl ObjectStore for LocalFsBackend {
    fn backend_tag(&self) -> &'static str {
        "localfs"
    }

    #[instrument(name = "store_local_fetch_metadata", skip(self), fields(dataset = %name))]
    async fn fetch_metadata(&self, name: &DatasetName) -> Result<DatasetMetadata, StoreError> {
        let keys = dataset_keys(&self.prefix, name);
        let bytes = self.read_safe(&keys.metadata).await?;
        parse_metadata(&bytes)
    }

    #[instrument(name = "store_local_fetch_artifact", skip(self), fields(dataset = %name))]
    async fn fetch_artifact(&self, name: &DatasetName) -> Result<Vec<u8>, StoreError> {
        let keys = dataset_keys(&self.prefix, name);
        self.read_safe(&keys.artifact).await
    }
}
