// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The single-threaded reactor: one tick services every active session
//! currently ready to read, then accepts at most one pending connection.
//! There is no task-per-connection spawning and no worker pool — this
//! keeps session state (the arena, the token stores) free of any
//! synchronization.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};

use super::admission::{self, Verdict};
use crate::backend::DatabaseBackend;
use crate::handshake::{HandshakeRequest, HandshakeResponse, Status, REQUEST_LEN};
use crate::protocol::frame::{self, FrameOutcome};
use crate::protocol::dispatch;
use crate::session::{SessionTables, Transport};
use crate::utils::generate_resume_token;

/// Tunable runtime ceilings. Defaults follow spec.md §5/§7.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    /// Size of the active session table. spec.md §9 leaves this an open
    /// question; the broker supports any small positive value, defaulting
    /// to 1 (a single mediated front-end process at a time).
    pub active_cap: usize,
    /// Size of the idle session table; sized generously relative to
    /// `active_cap` so a burst of disconnects rarely forces a reap.
    pub idle_cap: usize,
    pub idle_ttl: Duration,
    pub abs_ttl: Duration,
    pub frame_timeout: Duration,
    pub handshake_timeout: Duration,
    pub arena_cap: usize,
    pub arena_min_block: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            active_cap: 1,
            idle_cap: 2,
            idle_ttl: Duration::from_secs(20 * 60),
            abs_ttl: Duration::from_secs(8 * 60 * 60),
            frame_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
            arena_cap: 4 * 1024 * 1024,
            arena_min_block: 256,
        }
    }
}

pub struct Broker<B: DatabaseBackend> {
    backend: Arc<B>,
    shared_secret: [u8; 32],
    tables: SessionTables,
    listener: UnixListener,
    limits: RuntimeLimits,
}

impl<B: DatabaseBackend> Broker<B> {
    pub fn new(
        backend: Arc<B>,
        shared_secret: [u8; 32],
        listener: UnixListener,
        limits: RuntimeLimits,
    ) -> Self {
        Self {
            backend,
            shared_secret,
            tables: SessionTables::new(limits.active_cap, limits.idle_cap),
            listener,
            limits,
        }
    }

    /// Runs the reactor forever, one tick at a time.
    pub async fn run(&mut self) -> ! {
        loop {
            self.tick().await;
        }
    }

    async fn tick(&mut self) {
        self.service_active_sessions().await;
        self.reap_expired_sessions();
        self.accept_one_pending_connection().await;
        // `now_or_never()` polling means a quiet tick never hits a real
        // pending await; without this the reactor would spin forever on a
        // single-threaded runtime and starve every other task sharing it.
        tokio::task::yield_now().await;
    }

    /// Services every active session that is currently readable, in
    /// table order. Non-blocking: a session with nothing to read is
    /// skipped this tick rather than waited on.
    async fn service_active_sessions(&mut self) {
        let mut i = 0;
        while i < self.tables.active.len() {
            let readiness = {
                let session = match self.tables.active.get_mut(i) {
                    Some(s) => s,
                    None => break,
                };
                match session.transport.as_mut() {
                    Some(t) => t.stream.readable().now_or_never(),
                    None => None,
                }
            };

            let ready = match readiness {
                None => {
                    i += 1;
                    continue;
                }
                Some(Err(_)) => {
                    self.tables.active.drop_swap(i);
                    continue;
                }
                Some(Ok(())) => true,
            };
            debug_assert!(ready);

            let outcome = {
                let session = match self.tables.active.get_mut(i) {
                    Some(s) => s,
                    None => break,
                };
                let transport = match session.transport.as_mut() {
                    Some(t) => t,
                    None => {
                        i += 1;
                        continue;
                    }
                };
                frame::read_frame(&mut transport.stream, self.limits.frame_timeout).await
            };

            match outcome {
                FrameOutcome::Frame(bytes) => {
                    let session = match self.tables.active.get_mut(i) {
                        Some(s) => s,
                        None => break,
                    };
                    session.touch();
                    let response = dispatch::handle_request(&bytes[..], session, self.backend.as_ref()).await;
                    let transport = session
                        .transport
                        .as_mut()
                        .expect("active session retains a transport while being serviced");
                    if frame::write_frame(&mut transport.stream, &response).await.is_err() {
                        self.tables.active.drop_swap(i);
                        continue;
                    }
                }
                FrameOutcome::Hangup => {
                    self.tables.move_active_to_idle(i);
                    continue;
                }
                FrameOutcome::Error(err) => {
                    warn!(%err, "dropping active session after a frame error");
                    self.tables.active.drop_swap(i);
                    continue;
                }
            }
            i += 1;
        }
    }

    /// Drops idle sessions past `idle_ttl` and any session (active or
    /// idle) past `abs_ttl` since creation.
    fn reap_expired_sessions(&mut self) {
        let mut i = 0;
        while i < self.tables.idle.len() {
            let expired = match self.tables.idle.get(i) {
                Some(s) => {
                    s.last_active.elapsed() >= self.limits.idle_ttl
                        || s.created_at.elapsed() >= self.limits.abs_ttl
                }
                None => break,
            };
            if expired {
                self.tables.idle.drop_swap(i);
                continue;
            }
            i += 1;
        }

        let mut i = 0;
        while i < self.tables.active.len() {
            let expired = match self.tables.active.get(i) {
                Some(s) => s.created_at.elapsed() >= self.limits.abs_ttl,
                None => break,
            };
            if expired {
                self.tables.active.drop_swap(i);
                continue;
            }
            i += 1;
        }
    }

    /// Accepts at most one pending connection per tick, non-blocking.
    async fn accept_one_pending_connection(&mut self) {
        let accepted = match self.listener.accept().now_or_never() {
            Some(Ok((stream, _addr))) => stream,
            Some(Err(err)) => {
                warn!(%err, "failed to accept a pending connection");
                return;
            }
            None => return,
        };
        self.handshake_new_connection(accepted).await;
    }

    async fn handshake_new_connection(&mut self, mut stream: UnixStream) {
        let peer_uid = match admission::peer_uid(&stream) {
            Ok(uid) => uid,
            Err(err) => {
                warn!(error = %crate::broker::error::BrokerError::PeerCredentials(err), "rejecting connection with unreadable peer credentials");
                return;
            }
        };
        let broker_uid = unsafe { libc::geteuid() };
        if peer_uid != broker_uid {
            warn!(peer_uid, broker_uid, "rejecting connection from a mismatched uid");
            return;
        }
        info!(uid = peer_uid, "accepted connection");

        let mut raw = [0u8; REQUEST_LEN];
        let read = tokio::time::timeout(self.limits.handshake_timeout, stream.read_exact(&mut raw)).await;
        let request = match read {
            Ok(Ok(_)) => match HandshakeRequest::decode(&raw) {
                Ok(req) => req,
                Err(_) => return,
            },
            _ => return,
        };

        match admission::classify(
            &request,
            &self.shared_secret,
            &self.tables,
            self.limits.idle_ttl,
            self.limits.abs_ttl,
        ) {
            Verdict::Reject(status) => {
                let _ = stream
                    .write_all(&HandshakeResponse::rejection(status).encode())
                    .await;
            }
            Verdict::Expired(idle_index) => {
                let _ = stream
                    .write_all(&HandshakeResponse::rejection(Status::TokenExpired).encode())
                    .await;
                self.tables.idle.drop_swap(idle_index);
            }
            Verdict::AdmitFresh => {
                let token = generate_resume_token();
                let response = HandshakeResponse {
                    status: Status::Ok,
                    resume_token: token,
                    idle_ttl_secs: self.limits.idle_ttl.as_secs() as u32,
                    abs_ttl_secs: self.limits.abs_ttl.as_secs() as u32,
                };
                if stream.write_all(&response.encode()).await.is_err() {
                    return;
                }
                let _ = self.tables.admit_fresh(
                    token,
                    Transport { stream },
                    self.limits.arena_cap,
                    self.limits.arena_min_block,
                );
            }
            Verdict::Resume(idle_index) => {
                let token = generate_resume_token();
                let response = HandshakeResponse {
                    status: Status::Ok,
                    resume_token: token,
                    idle_ttl_secs: self.limits.idle_ttl.as_secs() as u32,
                    abs_ttl_secs: self.limits.abs_ttl.as_secs() as u32,
                };
                if stream.write_all(&response.encode()).await.is_err() {
                    return;
                }
                let _ = self.tables.resume(idle_index, Transport { stream }, token);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::InMemoryBackend;

    #[test]
    fn default_limits_match_the_documented_ceilings() {
        let limits = RuntimeLimits::default();
        assert_eq!(limits.idle_ttl, Duration::from_secs(1200));
        assert_eq!(limits.abs_ttl, Duration::from_secs(28_800));
    }

    #[tokio::test]
    async fn handshake_admits_a_fresh_connection() {
        let dir = std::env::temp_dir().join(format!("mcp-sql-broker-reactor-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let socket_path = dir.join("ctl.sock");
        let listener = super::super::socket::bind(&socket_path).expect("bind");

        let backend = Arc::new(InMemoryBackend::new());
        let secret = [7u8; 32];
        let limits = RuntimeLimits {
            active_cap: 4,
            idle_cap: 8,
            ..RuntimeLimits::default()
        };
        let mut broker = Broker::new(backend, secret, listener, limits);

        let mut client = UnixStream::connect(&socket_path).await.expect("connect");
        // Written before the server ever calls accept(): the bytes queue in
        // the kernel's socket buffer for the not-yet-accepted connection.
        let req = HandshakeRequest {
            magic: crate::handshake::MAGIC,
            version: crate::handshake::VERSION,
            flags: 0,
            resume_token: [0u8; 32],
            secret_token: secret,
        };
        let mut raw = [0u8; REQUEST_LEN];
        raw[0..4].copy_from_slice(&req.magic.to_be_bytes());
        raw[4..6].copy_from_slice(&req.version.to_be_bytes());
        raw[6..8].copy_from_slice(&req.flags.to_be_bytes());
        raw[8..40].copy_from_slice(&req.resume_token);
        raw[40..72].copy_from_slice(&req.secret_token);
        client.write_all(&raw).await.expect("write handshake");

        // The connection backlog is serviced asynchronously by the OS; give
        // it a few ticks to land before asserting it was accepted.
        for _ in 0..20 {
            if broker.tables.active.len() == 1 {
                break;
            }
            broker.accept_one_pending_connection().await;
            tokio::task::yield_now().await;
        }

        let mut resp_raw = [0u8; crate::handshake::RESPONSE_LEN];
        client.read_exact(&mut resp_raw).await.expect("read handshake response");
        let resp = HandshakeResponse::decode(&resp_raw).expect("decode");
        assert_eq!(resp.status, Status::Ok);

        assert_eq!(broker.tables.active.len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn resume_past_idle_ttl_responds_token_expired_and_reaps_the_entry() {
        let dir = std::env::temp_dir().join(format!("mcp-sql-broker-reactor-expiry-test-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let socket_path = dir.join("ctl.sock");
        let listener = super::super::socket::bind(&socket_path).expect("bind");

        let backend = Arc::new(InMemoryBackend::new());
        let secret = [7u8; 32];
        let limits = RuntimeLimits {
            active_cap: 1,
            idle_cap: 2,
            idle_ttl: Duration::from_secs(1200),
            ..RuntimeLimits::default()
        };
        let mut broker = Broker::new(backend, secret, listener, limits);

        let (a, _b) = std::os::unix::net::UnixStream::pair().expect("socketpair");
        a.set_nonblocking(true).expect("nonblocking");
        let stale_token = [3u8; 32];
        let idx = broker
            .tables
            .admit_fresh(stale_token, Transport { stream: UnixStream::from_std(a).expect("tokio stream") }, 1024, 1)
            .expect("fits");
        broker.tables.move_active_to_idle(idx);
        broker
            .tables
            .idle
            .get_mut(0)
            .expect("present")
            .last_active = std::time::Instant::now() - Duration::from_secs(1201);
        assert_eq!(broker.tables.idle.len(), 1);

        let (client_side, server_side) = std::os::unix::net::UnixStream::pair().expect("socketpair");
        client_side.set_nonblocking(true).expect("nonblocking");
        server_side.set_nonblocking(true).expect("nonblocking");
        let mut client = UnixStream::from_std(client_side).expect("tokio stream");
        let server = UnixStream::from_std(server_side).expect("tokio stream");

        let req = HandshakeRequest {
            magic: crate::handshake::MAGIC,
            version: crate::handshake::VERSION,
            flags: 1, // RESUME
            resume_token: stale_token,
            secret_token: secret,
        };
        let mut raw = [0u8; REQUEST_LEN];
        raw[0..4].copy_from_slice(&req.magic.to_be_bytes());
        raw[4..6].copy_from_slice(&req.version.to_be_bytes());
        raw[6..8].copy_from_slice(&req.flags.to_be_bytes());
        raw[8..40].copy_from_slice(&req.resume_token);
        raw[40..72].copy_from_slice(&req.secret_token);
        client.write_all(&raw).await.expect("write handshake");

        broker.handshake_new_connection(server).await;

        let mut resp_raw = [0u8; crate::handshake::RESPONSE_LEN];
        client.read_exact(&mut resp_raw).await.expect("read handshake response");
        let resp = HandshakeResponse::decode(&resp_raw).expect("decode");
        assert_eq!(resp.status, Status::TokenExpired);
        assert_eq!(broker.tables.idle.len(), 0);
        assert_eq!(broker.tables.active.len(), 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
