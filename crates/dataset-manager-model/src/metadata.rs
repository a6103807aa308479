// SPDX-License-Identifier: Apache-2.0

use crate::digest::ContentDigest;
use crate::name::DatasetName;
use crate::record::{encode, validate_ordering, DatasetRecord, RECORD_SIZE};
use crate::ValidationError;
use serde::{Deserialize, Serialize};

pub const RECORD_ENCODING: &str = "u64,f32,f32,f32,f32,f32";
pub const RECORD_ENDIANNESS: &str = "little";
pub const RECORD_FIELDS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Published description of one dataset (`meta.json`). Immutable once
/// published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetMetadata {
    pub symbol: String,
    pub timeframe: String,
    pub candles: u64,
    pub start_ts: u64,
    pub end_ts: u64,
    pub hash: String,
    pub encoding: String,
    pub bytes_per_record: u64,
    pub endianness: String,
    pub fields: Vec<String>,
}

impl DatasetMetadata {
    /// Builds the document an ingest run publishes for `records`.
    pub fn describe(
        symbol: &str,
        timeframe: &str,
        records: &[DatasetRecord],
    ) -> Result<Self, ValidationError> {
        let name = DatasetName::new(symbol, timeframe)?;
        let (first, last) = match (records.first(), records.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(ValidationError(
                    "dataset must contain at least one record".to_string(),
                ))
            }
        };
        validate_ordering(records)?;
        Ok(Self {
            symbol: name.symbol.to_string(),
            timeframe: name.timeframe.to_string(),
            candles: records.len() as u64,
            start_ts: first.timestamp,
            end_ts: last.timestamp,
            hash: ContentDigest::of_bytes(&encode(records)).to_string(),
            encoding: RECORD_ENCODING.to_string(),
            bytes_per_record: RECORD_SIZE as u64,
            endianness: RECORD_ENDIANNESS.to_string(),
            fields: RECORD_FIELDS.iter().map(ToString::to_string).collect(),
        })
    }

    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
        let metadata: Self = serde_json::from_slice(bytes)
            .map_err(|e| ValidationError(format!("metadata parse failed: {e}")))?;
        metadata.validate()?;
        Ok(metadata)
    }

    /// Internal consistency of the document; says nothing about the bytes.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.dataset_name()?;
        if self.bytes_per_record != RECORD_SIZE as u64 {
            return Err(ValidationError(format!(
                "bytes_per_record must be {RECORD_SIZE}, got {}",
                self.bytes_per_record
            )));
        }
        if self.encoding != RECORD_ENCODING {
            return Err(ValidationError(format!(
                "unsupported encoding `{}`",
                self.encoding
            )));
        }
        if self.endianness != RECORD_ENDIANNESS {
            return Err(ValidationError(format!(
                "unsupported endianness `{}`",
                self.endianness
            )));
        }
        if self.fields.iter().map(String::as_str).ne(RECORD_FIELDS) {
            return Err(ValidationError(format!(
                "fields must be {:?}",
                RECORD_FIELDS
            )));
        }
        if self.candles == 0 {
            return Err(ValidationError("candles must be >= 1".to_string()));
        }
        if self.start_ts > self.end_ts {
            return Err(ValidationError(format!(
                "start_ts {} is after end_ts {}",
                self.start_ts, self.end_ts
            )));
        }
        if self.candles == 1 && self.start_ts != self.end_ts {
            return Err(ValidationError(
                "single-record dataset must have start_ts == end_ts".to_string(),
            ));
        }
        self.digest()?;
        Ok(())
    }

    pub fn dataset_name(&self) -> Result<DatasetName, ValidationError> {
        DatasetName::new(&self.symbol, &self.timeframe)
    }

    #[must_use]
    pub fn name(&self) -> String {
        format!("{}-{}", self.symbol, self.timeframe)
    }

    #[must_use]
    pub fn describes(&self, name: &DatasetName) -> bool {
        self.symbol == name.symbol.as_str() && self.timeframe == name.timeframe.as_str()
    }

    pub fn digest(&self) -> Result<ContentDigest, ValidationError> {
        ContentDigest::parse(&self.hash)
    }

    /// Byte length of the uncompressed record stream.
    #[must_use]
    pub fn expected_len(&self) -> u64 {
        self.candles.saturating_mul(self.bytes_per_record)
    }
}
