// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Dataset Manager service: a verified local cache of published datasets
//! and a Unix-socket control plane that hands clients read-only file
//! descriptors into it.

use dataset_manager_core::ErrorCode;
use dataset_manager_store::StoreError;
use std::fmt::{Display, Formatter};

mod cache;
mod config;
mod control;
mod fake_store;

pub use cache::{
    AcquiredDataset, CacheConfig, CacheEntry, CacheMetrics, CacheStats, CachedDatasetInfo,
    DatasetCache,
};
pub use config::{
    validate_startup_config_contract, ControlConfig, ManagerConfig, StoreConfig, StoreSpec,
};
pub use control::{ConnectionOutcome, ConnectionState, ControlServer};
pub use fake_store::FakeStore;

pub const CRATE_NAME: &str = "dataset-manager-server";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheError {
    pub code: ErrorCode,
    pub message: String,
}

impl CacheError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Integrity, message)
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for CacheError {}

impl From<StoreError> for CacheError {
    fn from(value: StoreError) -> Self {
        Self::new(value.code.as_error_code(), value.message)
    }
}

impl From<std::io::Error> for CacheError {
    fn from(value: std::io::Error) -> Self {
        Self::internal(value.to_string())
    }
}
