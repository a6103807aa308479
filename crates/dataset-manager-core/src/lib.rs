// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use sha2::{Digest, Sha256};
use std::path::PathBuf;

pub mod env;
mod error;

pub use error::ErrorCode;

pub const CRATE_NAME: &str = "dataset-manager-core";

pub const ENV_CACHE_DIR: &str = "DSM_CACHE_DIR";
pub const ENV_SOCKET_PATH: &str = "DSM_SOCKET_PATH";

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/dataset_manager.sock";

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Cache root used when `DSM_CACHE_DIR` is unset: XDG cache home, then
/// `~/.cache`, then a relative fallback.
#[must_use]
pub fn resolve_cache_dir() -> PathBuf {
    if let Ok(explicit) = std::env::var(ENV_CACHE_DIR) {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }

    if let Ok(xdg_cache_home) = std::env::var("XDG_CACHE_HOME") {
        let trimmed = xdg_cache_home.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed).join("dataset-manager");
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed).join(".cache").join("dataset-manager");
        }
    }

    PathBuf::from(".dataset-manager").join("cache")
}

#[must_use]
pub fn resolve_socket_path() -> PathBuf {
    match std::env::var(ENV_SOCKET_PATH) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => PathBuf::from(DEFAULT_SOCKET_PATH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn sha256_hex_is_lowercase_and_fixed_width() {
        let hex = sha256_hex(&[]);
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }
}
