// SPDX-License-Identifier: Apache-2.0

use nix::sys::socket::{sendmsg, ControlMessage, MsgFlags};
use std::io::{self, IoSlice};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::UnixStream;

/// Writes `frame` as one message, attaching `fd` as `SCM_RIGHTS` ancillary
/// data on the first segment. The kernel duplicates the descriptor into the
/// receiving process; the caller keeps ownership of its own copy.
pub(super) async fn send_frame(
    stream: &mut UnixStream,
    frame: &[u8],
    fd: Option<BorrowedFd<'_>>,
) -> io::Result<()> {
    let socket = stream.as_raw_fd();
    let fds: Vec<RawFd> = fd.iter().map(AsRawFd::as_raw_fd).collect();
    let sent = stream
        .async_io(Interest::WRITABLE, || {
            let iov = [IoSlice::new(frame)];
            let rights = [ControlMessage::ScmRights(&fds)];
            let cmsgs: &[ControlMessage<'_>] = if fds.is_empty() { &[] } else { &rights };
            sendmsg::<()>(socket, &iov, cmsgs, MsgFlags::empty(), None).map_err(io::Error::from)
        })
        .await?;
    // Ancillary data rides on the first byte only; the rest is plain stream.
    if sent < frame.len() {
        stream.write_all(&frame[sent..]).await?;
    }
    stream.flush().await
}
