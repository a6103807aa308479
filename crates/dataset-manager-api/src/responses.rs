// SPDX-License-Identifier: Apache-2.0

use crate::errors::ApiError;
use dataset_manager_core::ErrorCode;
use dataset_manager_model::DatasetMetadata;
use serde::{Deserialize, Serialize};

/// JSON body of a response frame as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDocument {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DatasetMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    Ready(DatasetMetadata),
    Failed(ApiError),
}

impl ControlResponse {
    /// Error responses only ever carry the wire subset of codes.
    #[must_use]
    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failed(ApiError::new(code.wire_code(), message))
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[must_use]
    pub fn to_document(&self) -> ResponseDocument {
        match self {
            Self::Ready(metadata) => ResponseDocument {
                ok: true,
                metadata: Some(metadata.clone()),
                error: None,
                message: None,
            },
            Self::Failed(err) => ResponseDocument {
                ok: false,
                metadata: None,
                error: Some(err.code.wire_code().as_str().to_string()),
                message: Some(err.message.clone()),
            },
        }
    }

    pub fn from_document(doc: ResponseDocument) -> Result<Self, ApiError> {
        match (doc.ok, doc.metadata, doc.error) {
            (true, Some(metadata), None) => Ok(Self::Ready(metadata)),
            (false, None, Some(code)) => {
                let code = ErrorCode::parse(&code).ok_or_else(|| {
                    ApiError::bad_request(format!("unknown error code `{code}`"))
                })?;
                Ok(Self::Failed(ApiError::new(
                    code,
                    doc.message.unwrap_or_default(),
                )))
            }
            (true, None, _) => Err(ApiError::bad_request(
                "ok response is missing metadata",
            )),
            _ => Err(ApiError::bad_request("inconsistent response document")),
        }
    }
}
