// SPDX-License-Identifier: Apache-2.0

use crate::CacheConfig;
use dataset_manager_api::DEFAULT_MAX_REQUEST_BYTES;
use dataset_manager_core::env::{
    env_bool, env_duration_ms, env_mode, env_string, env_u64, env_usize,
};
use dataset_manager_core::{resolve_cache_dir, resolve_socket_path};
use dataset_manager_store::{
    HttpBackend, LocalFsBackend, ObjectStore, RetryPolicy, StoreError, DEFAULT_PREFIX,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SOCKET_MODE: u32 = 0o660;
pub const DEFAULT_STORE: &str = "local:./datasets";

#[derive(Debug, Clone, Serialize)]
pub struct ControlConfig {
    pub socket_path: PathBuf,
    pub socket_mode: u32,
    pub request_timeout: Duration,
    pub max_request_bytes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: resolve_socket_path(),
            socket_mode: DEFAULT_SOCKET_MODE,
            request_timeout: Duration::from_secs(5),
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

/// Where published datasets are read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StoreSpec {
    Local(PathBuf),
    Http(String),
}

impl StoreSpec {
    /// Parses `local:<dir>` or `http:<base url>`. A bare `http(s)://` URL is
    /// accepted as well.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if let Some(dir) = raw.strip_prefix("local:") {
            if dir.is_empty() {
                return Err("local store requires a directory".to_string());
            }
            return Ok(Self::Local(PathBuf::from(dir)));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Http(raw.to_string()));
        }
        if let Some(url) = raw.strip_prefix("http:") {
            if url.is_empty() {
                return Err("http store requires a base url".to_string());
            }
            return Ok(Self::Http(url.to_string()));
        }
        Err(format!(
            "unsupported store `{raw}`; expected local:<dir> or http:<url>"
        ))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreConfig {
    pub spec: StoreSpec,
    pub prefix: String,
    #[serde(skip_serializing)]
    pub bearer: Option<String>,
    pub retry_attempts: usize,
    pub retry_backoff_ms: u64,
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            spec: StoreSpec::Local(PathBuf::from("./datasets")),
            prefix: DEFAULT_PREFIX.to_string(),
            bearer: None,
            retry_attempts: retry.max_attempts,
            retry_backoff_ms: retry.base_backoff_ms,
            timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    pub fn build_backend(&self) -> Result<Arc<dyn ObjectStore>, StoreError> {
        Ok(match &self.spec {
            StoreSpec::Local(root) => Arc::new(LocalFsBackend::new(root.clone(), &self.prefix)),
            StoreSpec::Http(url) => Arc::new(HttpBackend::new(
                url,
                &self.prefix,
                self.bearer.clone(),
                RetryPolicy {
                    max_attempts: self.retry_attempts,
                    base_backoff_ms: self.retry_backoff_ms,
                },
                self.timeout,
            )?),
        })
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ManagerConfig {
    pub control: ControlConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
}

impl ManagerConfig {
    pub fn from_env() -> Result<Self, String> {
        let control = ControlConfig {
            socket_path: resolve_socket_path(),
            socket_mode: env_mode("DSM_SOCKET_MODE", DEFAULT_SOCKET_MODE),
            request_timeout: env_duration_ms("DSM_REQUEST_TIMEOUT_MS", 5_000),
            max_request_bytes: env_usize("DSM_MAX_REQUEST_BYTES", DEFAULT_MAX_REQUEST_BYTES),
        };
        let cache = CacheConfig {
            root: resolve_cache_dir(),
            max_open_files: env_usize("DSM_MAX_OPEN_FILES", 64),
            max_concurrent_fetches: env_usize("DSM_MAX_CONCURRENT_FETCHES", 4),
            verify_on_hit: env_bool("DSM_VERIFY_ON_HIT", true),
            reverify_interval: env_duration_ms("DSM_REVERIFY_INTERVAL_MS", 300_000),
            eviction_interval: env_duration_ms("DSM_EVICTION_INTERVAL_MS", 30_000),
        };
        let store = StoreConfig {
            spec: StoreSpec::parse(
                &env_string("DSM_STORE").unwrap_or_else(|| DEFAULT_STORE.to_string()),
            )?,
            prefix: env_string("DSM_STORE_PREFIX").unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
            bearer: env_string("DSM_STORE_BEARER"),
            retry_attempts: env_usize("DSM_STORE_RETRY_ATTEMPTS", 4),
            retry_backoff_ms: env_u64("DSM_STORE_RETRY_BACKOFF_MS", 120),
            timeout: env_duration_ms("DSM_STORE_TIMEOUT_MS", 30_000),
        };
        let cfg = Self {
            control,
            cache,
            store,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_startup_config_contract(&self.control, &self.cache, &self.store)
    }
}

pub fn validate_startup_config_contract(
    control: &ControlConfig,
    cache: &CacheConfig,
    store: &StoreConfig,
) -> Result<(), String> {
    if control.socket_path.as_os_str().is_empty() {
        return Err("socket path must not be empty".to_string());
    }
    if control.max_request_bytes == 0 {
        return Err("max request bytes must be > 0".to_string());
    }
    if control.request_timeout.is_zero() || store.timeout.is_zero() {
        return Err("timeouts must be > 0".to_string());
    }
    if cache.max_open_files == 0 {
        return Err("max open files must be > 0".to_string());
    }
    if cache.max_concurrent_fetches == 0 {
        return Err("max concurrent fetches must be > 0".to_string());
    }
    if cache.reverify_interval.is_zero() || cache.eviction_interval.is_zero() {
        return Err("maintenance intervals must be > 0".to_string());
    }
    if store.retry_attempts == 0 {
        return Err("store retry attempts must be > 0".to_string());
    }
    if store.prefix.is_empty() || store.prefix.contains("..") {
        return Err("store prefix must be a non-empty relative key".to_string());
    }
    if store.bearer.is_some() && matches!(store.spec, StoreSpec::Local(_)) {
        return Err("a bearer token requires an http store".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_spec_accepts_local_and_http_forms() {
        assert_eq!(
            StoreSpec::parse("local:/srv/datasets").expect("local"),
            StoreSpec::Local(PathBuf::from("/srv/datasets"))
        );
        assert_eq!(
            StoreSpec::parse("http:https://bucket.example/pub").expect("http"),
            StoreSpec::Http("https://bucket.example/pub".to_string())
        );
        assert_eq!(
            StoreSpec::parse("https://bucket.example").expect("bare url"),
            StoreSpec::Http("https://bucket.example".to_string())
        );
        assert!(StoreSpec::parse("s3://bucket").is_err());
        assert!(StoreSpec::parse("local:").is_err());
    }

    #[test]
    fn default_config_passes_startup_contract() {
        ManagerConfig::default().validate().expect("defaults are valid");
    }

    #[test]
    fn startup_contract_rejects_zero_limits() {
        let cfg = ManagerConfig {
            cache: CacheConfig {
                max_open_files: 0,
                ..CacheConfig::default()
            },
            ..ManagerConfig::default()
        };
        let err = cfg.validate().expect_err("zero open files");
        assert!(err.contains("max open files"));

        let cfg = ManagerConfig {
            control: ControlConfig {
                request_timeout: Duration::ZERO,
                ..ControlConfig::default()
            },
            ..ManagerConfig::default()
        };
        let err = cfg.validate().expect_err("zero timeout");
        assert!(err.contains("timeouts"));
    }

    #[test]
    fn startup_contract_rejects_bearer_for_local_store() {
        let cfg = ManagerConfig {
            store: StoreConfig {
                bearer: Some("token".to_string()),
                ..StoreConfig::default()
            },
            ..ManagerConfig::default()
        };
        let err = cfg.validate().expect_err("bearer on local");
        assert!(err.contains("http store"));
    }

    #[test]
    fn bearer_token_is_never_serialized() {
        let store = StoreConfig {
            spec: StoreSpec::Http("https://bucket.example".to_string()),
            bearer: Some("secret-token".to_string()),
            ..StoreConfig::default()
        };
        let json = serde_json::to_string(&store).expect("serialize");
        assert!(!json.contains("secret-token"));
    }
}
