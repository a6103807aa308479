// SPDX-License-Identifier: Apache-2.0

use dataset_manager_model::DatasetName;

pub const DEFAULT_PREFIX: &str = "crypto";
pub const ARTIFACT_FILE: &str = "candles.bin.gz";
pub const METADATA_FILE: &str = "meta.json";
pub const PUBLISH_LOCK_FILE: &str = ".publish.lock";

/// Object keys for one dataset, relative to the bucket root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetKeys {
    pub dir: String,
    pub artifact: String,
    pub metadata: String,
}

#[must_use]
pub fn dataset_keys(prefix: &str, name: &DatasetName) -> DatasetKeys {
    let prefix = prefix.trim_matches('/');
    let dir = if prefix.is_empty() {
        format!("{}/{}", name.symbol, name.timeframe)
    } else {
        format!("{prefix}/{}/{}", name.symbol, name.timeframe)
    };
    DatasetKeys {
        artifact: format!("{dir}/{ARTIFACT_FILE}"),
        metadata: format!("{dir}/{METADATA_FILE}"),
        dir,
    }
}
