// SPDX-License-Identifier: Apache-2.0

use dataset_manager_core::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Packed size of one record: `u64` timestamp plus five `f32` values.
pub const RECORD_SIZE: usize = 28;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecordError(pub String);

impl MalformedRecordError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        ErrorCode::MalformedRecord
    }
}

impl Display for MalformedRecordError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "malformed record stream: {}", self.0)
    }
}

impl std::error::Error for MalformedRecordError {}

/// One candle. Encoded little-endian with no padding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub timestamp: u64,
    pub open: f32,
    pub high: f32,
    pub low: f32,
    pub close: f32,
    pub volume: f32,
}

impl DatasetRecord {
    pub fn write_to(&self, out: &mut [u8; RECORD_SIZE]) {
        out[0..8].copy_from_slice(&self.timestamp.to_le_bytes());
        let values = [self.open, self.high, self.low, self.close, self.volume];
        for (idx, value) in values.iter().enumerate() {
            let at = 8 + idx * 4;
            out[at..at + 4].copy_from_slice(&value.to_le_bytes());
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0_u8; RECORD_SIZE];
        self.write_to(&mut out);
        out
    }

    pub fn read_from(bytes: &[u8]) -> Result<Self, MalformedRecordError> {
        if bytes.len() != RECORD_SIZE {
            return Err(MalformedRecordError(format!(
                "record must be {RECORD_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self::from_exact(bytes))
    }

    // Caller guarantees `chunk.len() == RECORD_SIZE`.
    fn from_exact(chunk: &[u8]) -> Self {
        let mut ts = [0_u8; 8];
        ts.copy_from_slice(&chunk[0..8]);
        Self {
            timestamp: u64::from_le_bytes(ts),
            open: le_f32(chunk, 8),
            high: le_f32(chunk, 12),
            low: le_f32(chunk, 16),
            close: le_f32(chunk, 20),
            volume: le_f32(chunk, 24),
        }
    }
}

fn le_f32(chunk: &[u8], at: usize) -> f32 {
    let mut buf = [0_u8; 4];
    buf.copy_from_slice(&chunk[at..at + 4]);
    f32::from_le_bytes(buf)
}

#[must_use]
pub fn encode(records: &[DatasetRecord]) -> Vec<u8> {
    let mut out = vec![0_u8; records.len() * RECORD_SIZE];
    for (record, chunk) in records.iter().zip(out.chunks_exact_mut(RECORD_SIZE)) {
        let mut buf = [0_u8; RECORD_SIZE];
        record.write_to(&mut buf);
        chunk.copy_from_slice(&buf);
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<Vec<DatasetRecord>, MalformedRecordError> {
    Ok(RecordView::new(bytes)?.iter().collect())
}

/// Timestamps must be strictly ascending, which also rules out duplicates.
pub fn validate_ordering(records: &[DatasetRecord]) -> Result<(), MalformedRecordError> {
    for (idx, pair) in records.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(MalformedRecordError(format!(
                "timestamp at index {} ({}) does not follow {}",
                idx + 1,
                pair[1].timestamp,
                pair[0].timestamp
            )));
        }
    }
    Ok(())
}

/// Zero-copy view over an encoded record stream, typically a mapped file.
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    bytes: &'a [u8],
}

impl<'a> RecordView<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, MalformedRecordError> {
        if bytes.len() % RECORD_SIZE != 0 {
            return Err(MalformedRecordError(format!(
                "length {} is not a multiple of {RECORD_SIZE}",
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len() / RECORD_SIZE
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<DatasetRecord> {
        let start = index.checked_mul(RECORD_SIZE)?;
        let chunk = self.bytes.get(start..start + RECORD_SIZE)?;
        Some(DatasetRecord::from_exact(chunk))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = DatasetRecord> + 'a {
        self.bytes
            .chunks_exact(RECORD_SIZE)
            .map(DatasetRecord::from_exact)
    }

    #[must_use]
    pub fn first_timestamp(&self) -> Option<u64> {
        self.get(0).map(|r| r.timestamp)
    }

    #[must_use]
    pub fn last_timestamp(&self) -> Option<u64> {
        self.len()
            .checked_sub(1)
            .and_then(|last| self.get(last))
            .map(|r| r.timestamp)
    }
}
