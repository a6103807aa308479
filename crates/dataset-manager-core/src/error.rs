// SPDX-License-Identifier: Apache-2.0

use std::fmt::{Display, Formatter};

/// Error classes shared by every crate in the workspace.
///
/// `as_str` values are stable and appear on the control-plane wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    NotFound,
    Integrity,
    Unavailable,
    MalformedRecord,
    Protocol,
    Internal,
}

impl ErrorCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Integrity => "integrity_error",
            Self::Unavailable => "unavailable",
            Self::MalformedRecord => "malformed_record",
            Self::Protocol => "bad_request",
            Self::Internal => "internal_error",
        }
    }

    /// Maps a code to the subset a client is allowed to see on the wire.
    /// Local faults look transient from the outside.
    #[must_use]
    pub const fn wire_code(self) -> Self {
        match self {
            Self::NotFound => Self::NotFound,
            Self::Integrity => Self::Integrity,
            Self::Protocol => Self::Protocol,
            Self::MalformedRecord => Self::Integrity,
            Self::Unavailable | Self::Internal => Self::Unavailable,
        }
    }

    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "not_found" => Some(Self::NotFound),
            "integrity_error" => Some(Self::Integrity),
            "unavailable" => Some(Self::Unavailable),
            "malformed_record" => Some(Self::MalformedRecord),
            "bad_request" => Some(Self::Protocol),
            "internal_error" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Whether a caller may reasonably retry with backoff.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
