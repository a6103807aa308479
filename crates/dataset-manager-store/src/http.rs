// SPDX-License-Identifier: Apache-2.0

use crate::paths::dataset_keys;
use crate::retry::{BackoffPolicy, RetryPolicy};
use crate::{parse_metadata, ObjectStore, StoreError, StoreErrorCode};
use async_trait::async_trait;
use dataset_manager_model::{DatasetMetadata, DatasetName};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{instrument, warn};

/// S3-compatible bucket reached over plain HTTP(S) GETs, e.g. a public R2
/// bucket URL or a presigned gateway.
pub struct HttpBackend {
    base_url: String,
    prefix: String,
    auth_bearer: Option<String>,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        prefix: impl Into<String>,
        auth_bearer: Option<String>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| {
            StoreError::new(StoreErrorCode::Internal, format!("invalid store url: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                StoreError::new(StoreErrorCode::Internal, format!("http client build failed: {e}"))
            })?;
        Ok(Self {
            base_url,
            prefix: prefix.into(),
            auth_bearer: auth_bearer.filter(|t| !t.is_empty()),
            retry,
            client,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn auth_headers(&self) -> Result<HeaderMap, StoreError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.auth_bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                StoreError::new(StoreErrorCode::Internal, format!("invalid auth header: {e}"))
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    #[instrument(name = "store_http_get_with_retry", skip(self))]
    async fn get_with_retry(&self, url: &str) -> Result<Vec<u8>, StoreError> {
        let headers = self.auth_headers()?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let req = self.client.get(url).headers(headers.clone());
            match req.send().await {
                Ok(resp) if resp.status().is_success() => {
                    return resp.bytes().await.map(|b| b.to_vec()).map_err(|e| {
                        StoreError::new(
                            StoreErrorCode::Network,
                            format!("read body failed url={url}: {e}"),
                        )
                    });
                }
                Ok(resp) if resp.status() == StatusCode::NOT_FOUND => {
                    return Err(StoreError::not_found(url));
                }
                Ok(resp)
                    if resp.status() == StatusCode::UNAUTHORIZED
                        || resp.status() == StatusCode::FORBIDDEN =>
                {
                    return Err(StoreError::new(
                        StoreErrorCode::Network,
                        format!("store denied access status={} url={url}", resp.status()),
                    ));
                }
                Ok(resp) => {
                    if self.retry.exhausted(attempt) {
                        return Err(StoreError::new(
                            StoreErrorCode::Network,
                            format!("download failed status={} url={url}", resp.status()),
                        ));
                    }
                    warn!(attempt, status = %resp.status(), "store request failed, retrying");
                }
                Err(e) => {
                    if self.retry.exhausted(attempt) {
                        return Err(StoreError::new(
                            StoreErrorCode::Network,
                            format!("download failed url={url}: {e}"),
                        ));
                    }
                    warn!(attempt, error = %e, "store request failed, retrying");
                }
            }
            tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
        }
    }
}

#[async_trait]
impl ObjectStore for HttpBackend {
    fn backend_tag(&self) -> &'static str {
        "http"
    }

    async fn fetch_metadata(&self, name: &DatasetName) -> Result<DatasetMetadata, StoreError> {
        let keys = dataset_keys(&self.prefix, name);
        let bytes = self.get_with_retry(&self.object_url(&keys.metadata)).await?;
        parse_metadata(&bytes)
    }

    async fn fetch_artifact(&self, name: &DatasetName) -> Result<Vec<u8>, StoreError> {
        let keys = dataset_keys(&self.prefix, name);
        self.get_with_retry(&self.object_url(&keys.artifact)).await
    }
}
