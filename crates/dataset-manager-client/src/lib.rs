// SPDX-License-Identifier: Apache-2.0

//! Client side of the dataset manager control socket.
//!
//! ```no_run
//! use dataset_manager_client::DatasetClient;
//!
//! let dataset = DatasetClient::from_env().open("ETHUSDT-1h")?;
//! println!("{} candles from {:?}", dataset.metadata().candles, dataset.first_timestamp());
//! # Ok::<(), dataset_manager_client::ClientError>(())
//! ```

mod error;
mod mapped;
mod recv;

pub use error::ClientError;
pub use mapped::MappedDataset;

use dataset_manager_api::{decode_frame, encode_request, ControlResponse};
use dataset_manager_core::resolve_socket_path;
use dataset_manager_model::DatasetName;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const CRATE_NAME: &str = "dataset-manager-client";

#[derive(Debug, Clone)]
pub struct DatasetClient {
    socket_path: PathBuf,
    timeout: Option<Duration>,
}

impl DatasetClient {
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: None,
        }
    }

    /// Uses `DSM_SOCKET_PATH`, falling back to the well-known default path.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(resolve_socket_path())
    }

    /// Bounds each read and write on the control connection.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn open(&self, name: &str) -> Result<MappedDataset, ClientError> {
        let name = DatasetName::parse(name).map_err(|e| ClientError::protocol(e.to_string()))?;
        self.open_dataset(&name)
    }

    /// Runs one request/response exchange and maps the returned descriptor.
    /// The connection is closed before this returns; the mapping outlives it.
    pub fn open_dataset(&self, name: &DatasetName) -> Result<MappedDataset, ClientError> {
        let mut stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            ClientError::unavailable(format!(
                "connect {} failed: {e}",
                self.socket_path.display()
            ))
        })?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        stream.write_all(&encode_request(name))?;
        debug!(dataset = %name, "request sent");

        let reply = recv::receive_reply(&stream)?;
        drop(stream);

        let response = decode_frame(&reply.frame)?;
        match (response, reply.fd) {
            (ControlResponse::Ready(metadata), Some(fd)) => {
                if !metadata.describes(name) {
                    return Err(ClientError::protocol(format!(
                        "asked for {name} but the reply describes {}",
                        metadata.name()
                    )));
                }
                MappedDataset::map(metadata, fd)
            }
            (ControlResponse::Ready(_), None) => Err(ClientError::protocol(
                "ok reply arrived without a descriptor",
            )),
            (ControlResponse::Failed(err), None) => Err(err.into()),
            (ControlResponse::Failed(err), Some(_stray)) => Err(ClientError::protocol(format!(
                "error reply ({err}) carried a descriptor"
            ))),
        }
    }
}
