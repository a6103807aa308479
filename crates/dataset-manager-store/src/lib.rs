// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Remote object stores holding published datasets.
//!
//! Every backend exposes the same bucket layout:
//! `<prefix>/<SYMBOL>/<timeframe>/{candles.bin.gz,meta.json}`.

use async_trait::async_trait;
use dataset_manager_core::ErrorCode;
use dataset_manager_model::{DatasetMetadata, DatasetName};
use std::fmt::{Display, Formatter};

mod http;
mod local;
mod paths;
mod publish;
mod retry;

pub use http::HttpBackend;
pub use local::LocalFsBackend;
pub use paths::{
    dataset_keys, DatasetKeys, ARTIFACT_FILE, DEFAULT_PREFIX, METADATA_FILE, PUBLISH_LOCK_FILE,
};
pub use publish::{compress_artifact, publish_dataset, PublishLockGuard};
pub use retry::{BackoffPolicy, RetryPolicy};

pub const CRATE_NAME: &str = "dataset-manager-store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreErrorCode {
    NotFound,
    Validation,
    Network,
    Io,
    Conflict,
    Internal,
}

impl StoreErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Validation => "validation_error",
            Self::Network => "network_error",
            Self::Io => "io_error",
            Self::Conflict => "conflict",
            Self::Internal => "internal_error",
        }
    }

    #[must_use]
    pub const fn as_error_code(self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::Validation => ErrorCode::Integrity,
            Self::Network | Self::Io => ErrorCode::Unavailable,
            Self::Conflict | Self::Internal => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
}

impl StoreError {
    #[must_use]
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(key: &str) -> Self {
        Self::new(StoreErrorCode::NotFound, format!("object not found: {key}"))
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for StoreError {}

/// Read side of a bucket holding published datasets.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    fn backend_tag(&self) -> &'static str;

    /// Fetches and validates `meta.json`. Checking that the document
    /// describes `name` is left to the caller.
    async fn fetch_metadata(&self, name: &DatasetName) -> Result<DatasetMetadata, StoreError>;

    /// Fetches the gzip-compressed record stream.
    async fn fetch_artifact(&self, name: &DatasetName) -> Result<Vec<u8>, StoreError>;
}

pub(crate) fn parse_metadata(bytes: &[u8]) -> Result<DatasetMetadata, StoreError> {
    DatasetMetadata::from_json_slice(bytes)
        .map_err(|e| StoreError::new(StoreErrorCode::Validation, e.to_string()))
}
