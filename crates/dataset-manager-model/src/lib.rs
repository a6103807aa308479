// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use dataset_manager_core::ErrorCode;
use std::fmt::{Display, Formatter};

mod digest;
mod metadata;
mod name;
mod record;

pub use digest::{ContentDigest, DigestWriter, DIGEST_ALGORITHM};
pub use metadata::{
    DatasetMetadata, RECORD_ENCODING, RECORD_ENDIANNESS, RECORD_FIELDS,
};
pub use name::{DatasetName, Symbol, Timeframe, SYMBOL_MAX_LEN, TIMEFRAME_MAX_LEN};
pub use record::{
    decode, encode, validate_ordering, DatasetRecord, MalformedRecordError, RecordView,
    RECORD_SIZE,
};

pub const CRATE_NAME: &str = "dataset-manager-model";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl ValidationError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::MalformedRecord
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ValidationError {}

impl From<MalformedRecordError> for ValidationError {
    fn from(value: MalformedRecordError) -> Self {
        Self(value.to_string())
    }
}
