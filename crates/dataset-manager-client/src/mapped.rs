// SPDX-License-Identifier: Apache-2.0

use crate::ClientError;
use dataset_manager_core::ErrorCode;
use dataset_manager_model::{ContentDigest, DatasetMetadata, MalformedRecordError, RecordView};
use memmap2::Mmap;
use std::fs::File;
use std::os::fd::OwnedFd;
use tracing::debug;

/// Read-only view of a dataset, backed by a private mapping of the file the
/// manager passed over the socket.
#[derive(Debug)]
pub struct MappedDataset {
    metadata: DatasetMetadata,
    map: Mmap,
}

impl MappedDataset {
    pub(crate) fn map(metadata: DatasetMetadata, fd: OwnedFd) -> Result<Self, ClientError> {
        metadata
            .validate()
            .map_err(|e| ClientError::protocol(format!("invalid metadata: {e}")))?;
        let file = File::from(fd);
        let size = file.metadata()?.len();
        if size != metadata.expected_len() {
            return Err(ClientError::protocol(format!(
                "descriptor is {size} bytes, metadata expects {}",
                metadata.expected_len()
            )));
        }
        // SAFETY: the descriptor is read-only and the manager never rewrites
        // an installed file; replacements are new files.
        let map = unsafe { Mmap::map(&file) }
            .map_err(|e| ClientError::unavailable(format!("mmap failed: {e}")))?;
        let dataset = Self { metadata, map };
        dataset.check_bounds()?;
        debug!(dataset = %dataset.metadata.name(), bytes = dataset.len(), "dataset mapped");
        Ok(dataset)
    }

    // First and last timestamps must agree with the metadata.
    fn check_bounds(&self) -> Result<(), ClientError> {
        let view = self
            .records()
            .map_err(|e| ClientError::new(ErrorCode::Integrity, e.to_string()))?;
        let bounds = (view.first_timestamp(), view.last_timestamp());
        if bounds != (Some(self.metadata.start_ts), Some(self.metadata.end_ts)) {
            return Err(ClientError::new(
                ErrorCode::Integrity,
                format!(
                    "mapped records span {bounds:?}, metadata says {}..={}",
                    self.metadata.start_ts, self.metadata.end_ts
                ),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.map
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn records(&self) -> Result<RecordView<'_>, MalformedRecordError> {
        RecordView::new(&self.map)
    }

    #[must_use]
    pub fn first_timestamp(&self) -> Option<u64> {
        self.records().ok()?.first_timestamp()
    }

    /// Rehashes the mapping. Linear in the dataset size.
    pub fn verify_digest(&self) -> Result<(), ClientError> {
        let expected = self
            .metadata
            .digest()
            .map_err(|e| ClientError::protocol(e.to_string()))?;
        let actual = ContentDigest::of_bytes(self.as_bytes());
        if actual != expected {
            return Err(ClientError::new(
                ErrorCode::Integrity,
                format!("mapped bytes hash to {actual}, metadata says {expected}"),
            ));
        }
        Ok(())
    }
}

impl AsRef<[u8]> for MappedDataset {
    fn as_ref(&self) -> &[u8] {
        &self.map
    }
}
