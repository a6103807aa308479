// SPDX-License-Identifier: Apache-2.0

use crate::ValidationError;
use dataset_manager_core::sha256_hex;
use sha2::{Digest, Sha256};
use std::fmt::{Display, Formatter};
use std::io;

/// The only algorithm accepted in a `hash` field.
pub const DIGEST_ALGORITHM: &str = "sha256";

/// SHA-256 of an uncompressed record stream, rendered as `sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentDigest {
    hex: String,
}

impl ContentDigest {
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self {
            hex: sha256_hex(bytes),
        }
    }

    pub fn parse(tagged: &str) -> Result<Self, ValidationError> {
        let (algorithm, hex) = tagged.trim().split_once(':').ok_or_else(|| {
            ValidationError(format!("digest `{tagged}` is missing an algorithm tag"))
        })?;
        if algorithm != DIGEST_ALGORITHM {
            return Err(ValidationError(format!(
                "unsupported digest algorithm `{algorithm}`"
            )));
        }
        Self::from_hex(hex)
    }

    pub fn from_hex(hex: &str) -> Result<Self, ValidationError> {
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(ValidationError(
                "sha256 digest must be 64 lowercase hex characters".to_string(),
            ));
        }
        Ok(Self {
            hex: hex.to_string(),
        })
    }

    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl Display for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{DIGEST_ALGORITHM}:{}", self.hex)
    }
}

/// `io::Write` sink that hashes everything written through it.
#[derive(Default)]
pub struct DigestWriter {
    hasher: Sha256,
    bytes: u64,
}

impl DigestWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes
    }

    #[must_use]
    pub fn finish(self) -> ContentDigest {
        ContentDigest {
            hex: format!("{:x}", self.hasher.finalize()),
        }
    }
}

impl io::Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.bytes = self.bytes.saturating_add(buf.len() as u64);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
