// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection admission: peer credential verification and handshake
//! classification. Neither function touches the session tables directly
//! — the reactor decides what to do with the verdict.

use std::time::Duration;

use tokio::net::UnixStream;

use crate::handshake::{HandshakeRequest, HandshakeResponse, Status, MAGIC};
use crate::session::SessionTables;
use crate::utils::constant_time_eq;

/// Reads the connecting peer's credentials off the socket. Linux exposes
/// `SO_PEERCRED`; BSD/macOS expose `LOCAL_PEERCRED` through the same
/// getsockopt-style call with a different option name and a differently
/// shaped payload.
#[cfg(target_os = "linux")]
pub fn peer_uid(stream: &UnixStream) -> std::io::Result<u32> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let mut cred = libc::ucred {
        pid: 0,
        uid: 0,
        gid: 0,
    };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(cred.uid)
}

#[cfg(any(target_os = "macos", target_os = "freebsd", target_os = "netbsd", target_os = "openbsd"))]
pub fn peer_uid(stream: &UnixStream) -> std::io::Result<u32> {
    use std::os::fd::AsRawFd;

    let fd = stream.as_raw_fd();
    let mut uid: libc::uid_t = 0;
    let mut gid: libc::gid_t = 0;
    let rc = unsafe { libc::getpeereid(fd, &mut uid, &mut gid) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(uid)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd"
)))]
pub fn peer_uid(_stream: &UnixStream) -> std::io::Result<u32> {
    Err(std::io::Error::other("peer credential lookup is not supported on this platform"))
}

/// What the reactor should do in response to a handshake request, once
/// its status has been classified.
pub enum Verdict {
    /// Admit as a brand-new active session.
    AdmitFresh,
    /// Resume the idle session at this index.
    Resume(usize),
    Reject(Status),
    /// The presented resume token names a real idle entry, but it has
    /// passed its idle or absolute TTL: reject as `TokenExpired` and
    /// reap the entry at this index (it is not resumable again).
    Expired(usize),
}

/// Classifies a handshake request against the shared secret and the
/// current session tables. Does not mutate the tables; the reactor acts
/// on the verdict.
pub fn classify(
    request: &HandshakeRequest,
    shared_secret: &[u8; 32],
    tables: &SessionTables,
    idle_ttl: Duration,
    abs_ttl: Duration,
) -> Verdict {
    if request.magic != MAGIC {
        return Verdict::Reject(Status::BadMagic);
    }
    if !request.is_well_formed_magic_and_version() {
        return Verdict::Reject(Status::BadVersion);
    }
    if !constant_time_eq(&request.secret_token, shared_secret) {
        return Verdict::Reject(Status::BadRequest);
    }

    if request.wants_resume() {
        return match tables.idle.find_by_token(&request.resume_token) {
            Some(idx) => {
                let session = tables
                    .idle
                    .get(idx)
                    .expect("find_by_token returned a valid index");
                if session.last_active.elapsed() >= idle_ttl || session.created_at.elapsed() >= abs_ttl {
                    Verdict::Expired(idx)
                } else if tables.active.is_full() {
                    Verdict::Reject(Status::Full)
                } else {
                    Verdict::Resume(idx)
                }
            }
            None => Verdict::Reject(Status::TokenUnknown),
        };
    }

    if tables.active.is_full() {
        return Verdict::Reject(Status::Full);
    }
    Verdict::AdmitFresh
}

pub fn rejection_response(status: Status) -> HandshakeResponse {
    HandshakeResponse::rejection(status)
}
