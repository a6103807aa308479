// SPDX-License-Identifier: Apache-2.0

use dataset_manager_core::ErrorCode;
use std::fmt::{Display, Formatter};

/// Failure as reported to (or by) the other end of the control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Protocol, message)
    }

    #[must_use]
    pub fn not_found(name: &str) -> Self {
        Self::new(ErrorCode::NotFound, format!("dataset not found: {name}"))
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}
