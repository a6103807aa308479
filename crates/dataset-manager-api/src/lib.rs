// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

//! Control-plane wire contract shared by the manager and its clients.
//!
//! A request is a dataset name, optionally newline-terminated. A response is
//! one frame: a 4-byte big-endian length followed by a JSON document. A
//! successful response also carries one file descriptor as ancillary data;
//! that part is handled by the transport on each side, not here.

mod errors;
mod responses;
mod wire;

pub use errors::ApiError;
pub use responses::{ControlResponse, ResponseDocument};
pub use wire::{
    decode_frame, encode_frame, encode_request, frame_body_len, parse_request,
    DEFAULT_MAX_REQUEST_BYTES, FRAME_HEADER_LEN, MAX_FRAME_BYTES,
};

pub const CRATE_NAME: &str = "dataset-manager-api";
