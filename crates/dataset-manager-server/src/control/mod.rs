// SPDX-License-Identifier: Apache-2.0

//! Unix-socket control plane. One request per connection: read a dataset
//! name, answer with one frame, pass a read-only descriptor on success, close.

use crate::{ControlConfig, DatasetCache};
use dataset_manager_api::{encode_frame, parse_request, ApiError, ControlResponse};
use dataset_manager_core::ErrorCode;
use std::future::Future;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinSet;
use tracing::{debug, error, field, info, warn, Instrument, Span};

mod fd_passing;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingRequest,
    Resolving,
    Responding,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingRequest => "awaiting_request",
            Self::Resolving => "resolving",
            Self::Responding => "responding",
            Self::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOutcome {
    Served,
    Failed(ErrorCode),
    /// The response could not be delivered.
    Disconnected,
}

impl ConnectionOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Served => "ok",
            Self::Failed(code) => code.wire_code().as_str(),
            Self::Disconnected => "disconnected",
        }
    }
}

struct SocketFileGuard(PathBuf);

impl Drop for SocketFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

struct ConnectionContext {
    cache: Arc<DatasetCache>,
    request_timeout: Duration,
    max_request_bytes: usize,
}

pub struct ControlServer {
    listener: UnixListener,
    ctx: Arc<ConnectionContext>,
    next_conn_id: AtomicU64,
    socket: SocketFileGuard,
}

impl ControlServer {
    /// Binds the control socket. A stale socket file left by a dead process
    /// is replaced; a live listener or a non-socket file at the path is an
    /// error.
    pub fn bind(cfg: &ControlConfig, cache: Arc<DatasetCache>) -> io::Result<Self> {
        let path = &cfg.socket_path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        remove_stale_socket(path)?;
        let listener = UnixListener::bind(path)?;
        let socket = SocketFileGuard(path.clone());
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(cfg.socket_mode))?;
        info!(
            socket = %path.display(),
            mode = %format_args!("{:o}", cfg.socket_mode),
            "control socket bound"
        );
        Ok(Self {
            listener,
            ctx: Arc::new(ConnectionContext {
                cache,
                request_timeout: cfg.request_timeout,
                max_request_bytes: cfg.max_request_bytes,
            }),
            next_conn_id: AtomicU64::new(1),
            socket,
        })
    }

    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket.0
    }

    /// Accepts connections until `shutdown` resolves, then waits for the
    /// in-flight ones. The socket file is removed on return.
    pub async fn serve_until<F>(self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown requested; draining connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
                        let ctx = Arc::clone(&self.ctx);
                        tasks.spawn(async move { ctx.handle(stream, conn_id).await });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            }
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        info!(socket = %self.socket.0.display(), "control plane stopped");
        Ok(())
    }
}

fn log_join(joined: Result<ConnectionOutcome, tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "connection task failed");
    }
}

fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !meta.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        ));
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("another process is listening on {}", path.display()),
        ));
    }
    warn!(socket = %path.display(), "removing stale control socket");
    std::fs::remove_file(path)
}

fn enter(state: &mut ConnectionState, next: ConnectionState) {
    debug!(from = state.as_str(), to = next.as_str(), "connection state");
    *state = next;
    Span::current().record("state", next.as_str());
}

impl ConnectionContext {
    async fn handle(&self, mut stream: UnixStream, conn_id: u64) -> ConnectionOutcome {
        let span = tracing::info_span!(
            "control_connection",
            conn_id,
            dataset = field::Empty,
            state = field::Empty,
            outcome = field::Empty,
        );
        async move {
            let mut state = ConnectionState::AwaitingRequest;
            let outcome = self.serve_one(&mut stream, &mut state).await;
            enter(&mut state, ConnectionState::Closed);
            Span::current().record("outcome", outcome.as_str());
            info!("connection closed");
            outcome
        }
        .instrument(span)
        .await
    }

    async fn serve_one(
        &self,
        stream: &mut UnixStream,
        state: &mut ConnectionState,
    ) -> ConnectionOutcome {
        let read = tokio::time::timeout(
            self.request_timeout,
            read_request(stream, self.max_request_bytes),
        )
        .await;
        let raw = match read {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return reply_error(stream, state, ApiError::bad_request(e)).await,
            Err(_) => {
                let err = ApiError::bad_request(format!(
                    "no request within {} ms",
                    self.request_timeout.as_millis()
                ));
                return reply_error(stream, state, err).await;
            }
        };
        let name = match parse_request(&raw, self.max_request_bytes) {
            Ok(name) => name,
            Err(e) => return reply_error(stream, state, e).await,
        };
        Span::current().record("dataset", field::display(&name));

        enter(state, ConnectionState::Resolving);
        let acquired = match self.cache.acquire(&name).await {
            Ok(acquired) => acquired,
            Err(e) => {
                return reply_error(stream, state, ApiError::new(e.code, e.message)).await;
            }
        };

        enter(state, ConnectionState::Responding);
        let outcome = match encode_frame(&ControlResponse::Ready(acquired.metadata.clone())) {
            Ok(frame) => {
                match fd_passing::send_frame(stream, &frame, Some(acquired.as_fd())).await {
                    Ok(()) => ConnectionOutcome::Served,
                    Err(e) => {
                        warn!(error = %e, "client went away before the response was sent");
                        ConnectionOutcome::Disconnected
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "response encode failed");
                ConnectionOutcome::Failed(ErrorCode::Internal)
            }
        };
        drop(acquired);
        self.cache.release(&name).await;
        outcome
    }
}

async fn reply_error(
    stream: &mut UnixStream,
    state: &mut ConnectionState,
    err: ApiError,
) -> ConnectionOutcome {
    enter(state, ConnectionState::Responding);
    let response = ControlResponse::failed(err.code, err.message);
    let code = err.code;
    debug!(code = code.wire_code().as_str(), "sending error response");
    let sent = match encode_frame(&response) {
        Ok(frame) => fd_passing::send_frame(stream, &frame, None).await,
        Err(e) => Err(io::Error::other(e.to_string())),
    };
    match sent {
        Ok(()) => ConnectionOutcome::Failed(code),
        Err(e) => {
            warn!(error = %e, "error response not delivered");
            ConnectionOutcome::Disconnected
        }
    }
}

/// Reads until a newline, EOF, or a buffer that already parses as a dataset
/// name, so clients that send the bare name and then wait are answered.
/// Anything longer than `max_bytes` is cut off early and left to
/// `parse_request` to reject.
async fn read_request(stream: &mut UnixStream, max_bytes: usize) -> Result<Vec<u8>, String> {
    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0_u8; 256];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| format!("request read failed: {e}"))?;
        if n == 0 {
            return Ok(buf);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            buf.truncate(pos + 1);
            return Ok(buf);
        }
        if buf.len() > max_bytes || parse_request(&buf, max_bytes).is_ok() {
            return Ok(buf);
        }
    }
}
