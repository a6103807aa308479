// SPDX-License-Identifier: Apache-2.0

use crate::errors::ApiError;
use crate::responses::{ControlResponse, ResponseDocument};
use dataset_manager_model::DatasetName;

pub const FRAME_HEADER_LEN: usize = 4;
pub const MAX_FRAME_BYTES: usize = 64 * 1024;
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 256;

pub fn encode_frame(response: &ControlResponse) -> Result<Vec<u8>, ApiError> {
    let body = serde_json::to_vec(&response.to_document())
        .map_err(|e| ApiError::bad_request(format!("response encode failed: {e}")))?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(ApiError::bad_request(format!(
            "response frame of {} bytes exceeds {MAX_FRAME_BYTES}",
            body.len()
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| ApiError::bad_request("response frame length overflow"))?;
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Body length announced by a frame header, bounded by `MAX_FRAME_BYTES`.
pub fn frame_body_len(header: [u8; FRAME_HEADER_LEN]) -> Result<usize, ApiError> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(ApiError::bad_request(format!(
            "response frame of {len} bytes exceeds {MAX_FRAME_BYTES}"
        )));
    }
    Ok(len)
}

/// Decodes one complete frame. Trailing bytes are a protocol error since the
/// server sends exactly one frame per connection.
pub fn decode_frame(bytes: &[u8]) -> Result<ControlResponse, ApiError> {
    if bytes.len() < FRAME_HEADER_LEN {
        return Err(ApiError::bad_request("truncated frame header"));
    }
    let mut header = [0_u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&bytes[..FRAME_HEADER_LEN]);
    let len = frame_body_len(header)?;
    let body = &bytes[FRAME_HEADER_LEN..];
    if body.len() != len {
        return Err(ApiError::bad_request(format!(
            "frame announced {len} bytes but carried {}",
            body.len()
        )));
    }
    let doc: ResponseDocument = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("response parse failed: {e}")))?;
    ControlResponse::from_document(doc)
}

#[must_use]
pub fn encode_request(name: &DatasetName) -> Vec<u8> {
    let mut out = name.canonical_string().into_bytes();
    out.push(b'\n');
    out
}

/// Parses the raw request bytes read from a connection.
pub fn parse_request(raw: &[u8], max_bytes: usize) -> Result<DatasetName, ApiError> {
    if raw.len() > max_bytes {
        return Err(ApiError::bad_request(format!(
            "request exceeds {max_bytes} bytes"
        )));
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| ApiError::bad_request("request is not valid utf-8"))?;
    let line = text.strip_suffix('\n').unwrap_or(text);
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.is_empty() {
        return Err(ApiError::bad_request("empty request"));
    }
    if line.contains('\n') {
        return Err(ApiError::bad_request(
            "one request per connection; pipelining is not supported",
        ));
    }
    DatasetName::parse(line).map_err(|e| ApiError::bad_request(e.to_string()))
}
