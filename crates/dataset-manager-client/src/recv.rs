// SPDX-License-Identifier: Apache-2.0

use crate::ClientError;
use dataset_manager_api::{frame_body_len, FRAME_HEADER_LEN, MAX_FRAME_BYTES};
use nix::errno::Errno;
use nix::sys::socket::{recvmsg, ControlMessageOwned, MsgFlags};
use std::io::IoSliceMut;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

pub(crate) struct Reply {
    pub frame: Vec<u8>,
    pub fd: Option<OwnedFd>,
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn recv_flags() -> MsgFlags {
    MsgFlags::MSG_CMSG_CLOEXEC
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn recv_flags() -> MsgFlags {
    MsgFlags::empty()
}

fn announced_len(frame: &[u8]) -> Result<Option<usize>, ClientError> {
    if frame.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let mut header = [0_u8; FRAME_HEADER_LEN];
    header.copy_from_slice(&frame[..FRAME_HEADER_LEN]);
    Ok(Some(FRAME_HEADER_LEN + frame_body_len(header)?))
}

/// Reads one reply frame and every descriptor that arrived with it. More
/// than one descriptor is a protocol error; received descriptors are owned
/// immediately so every error path closes them.
pub(crate) fn receive_reply(stream: &UnixStream) -> Result<Reply, ClientError> {
    let socket = stream.as_raw_fd();
    let mut frame = Vec::with_capacity(1024);
    let mut fds: Vec<OwnedFd> = Vec::new();
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 2]);
    let mut chunk = [0_u8; 8 * 1024];

    loop {
        if let Some(total) = announced_len(&frame)? {
            if frame.len() >= total {
                break;
            }
        }
        let (n, truncated) = {
            let mut iov = [IoSliceMut::new(&mut chunk)];
            let msg = match recvmsg::<()>(socket, &mut iov, Some(&mut cmsg_buf), recv_flags()) {
                Ok(msg) => msg,
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => {
                    return Err(ClientError::unavailable("timed out waiting for a reply"))
                }
                Err(e) => return Err(ClientError::unavailable(format!("recvmsg failed: {e}"))),
            };
            let cmsgs = msg
                .cmsgs()
                .map_err(|e| ClientError::protocol(format!("unreadable control data: {e}")))?;
            for cmsg in cmsgs {
                if let ControlMessageOwned::ScmRights(received) = cmsg {
                    // SAFETY: the kernel installed these descriptors in this
                    // process for this message; nothing else owns them.
                    fds.extend(
                        received
                            .into_iter()
                            .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }),
                    );
                }
            }
            (msg.bytes, msg.flags.contains(MsgFlags::MSG_CTRUNC))
        };
        if truncated {
            return Err(ClientError::protocol("ancillary data was truncated"));
        }
        if n == 0 {
            break;
        }
        frame.extend_from_slice(&chunk[..n]);
        if frame.len() > FRAME_HEADER_LEN + MAX_FRAME_BYTES {
            return Err(ClientError::protocol("reply exceeds the frame limit"));
        }
    }

    if fds.len() > 1 {
        return Err(ClientError::protocol(format!(
            "reply carried {} descriptors, expected at most one",
            fds.len()
        )));
    }
    Ok(Reply {
        frame,
        fd: fds.pop(),
    })
}
