// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Active/idle session tables. Both are plain `Vec<Session>` — the owning
//! event loop is single-threaded (spec §5), so there is no need for the
//! concurrent map the teacher crate used for its cross-task connection
//! pool.

use std::collections::HashMap;
use std::time::Instant;

use tokio::net::UnixStream;

use super::arena::Arena;
use super::token_store::TokenStore;
use crate::utils::constant_time_eq;

/// A connected peer's socket, owned outright (no `Mutex`: sessions are
/// only ever touched by the single reactor tick that owns them).
#[derive(Debug)]
pub struct Transport {
    pub stream: UnixStream,
}

#[derive(Debug)]
pub struct Session {
    pub resume_token: [u8; 32],
    pub created_at: Instant,
    pub last_active: Instant,
    /// Bumped whenever the session's per-connection token material is
    /// rotated; consulted by the token-binding tool variant.
    pub generation: u32,
    /// `Some` only while the session is active; idle sessions hold no
    /// transport (an active/idle session always holds exactly one, per
    /// the invariant: idle entries never retain a live transport).
    pub transport: Option<Transport>,
    pub arena: Arena,
    pub token_stores: HashMap<String, TokenStore>,
}

impl Session {
    fn new(resume_token: [u8; 32], transport: Transport, arena_cap: usize, arena_min_block: usize) -> Self {
        let now = Instant::now();
        Self {
            resume_token,
            created_at: now,
            last_active: now,
            generation: 0,
            transport: Some(transport),
            arena: Arena::new(arena_cap, arena_min_block),
            token_stores: HashMap::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn token_store_for(&mut self, connection: &str) -> &mut TokenStore {
        self.token_stores
            .entry(connection.to_string())
            .or_default()
    }
}

#[derive(Debug)]
pub struct SessionTable {
    sessions: Vec<Session>,
    capacity: usize,
}

impl SessionTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sessions.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, index: usize) -> Option<&Session> {
        self.sessions.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Session> {
        self.sessions.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Inserts a session, failing if the table is already at capacity.
    /// Returns the index the session now lives at.
    pub fn emplace(&mut self, session: Session) -> Result<usize, Session> {
        if self.is_full() {
            return Err(session);
        }
        self.sessions.push(session);
        Ok(self.sessions.len() - 1)
    }

    /// Removes the session at `index` by swapping the last entry into its
    /// place (order among the remaining entries is not preserved).
    pub fn drop_swap(&mut self, index: usize) -> Session {
        self.sessions.swap_remove(index)
    }

    /// Finds the idle session whose resume token matches, comparing every
    /// candidate's token in constant time (the scan itself may
    /// short-circuit on the first match; no individual byte comparison
    /// does).
    pub fn find_by_token(&self, token: &[u8; 32]) -> Option<usize> {
        self.sessions
            .iter()
            .position(|s| constant_time_eq(&s.resume_token, token))
    }

    /// Removes and returns the entry with the oldest `last_active`
    /// timestamp (the longest-idle entry), if any.
    pub fn reap_oldest(&mut self) -> Option<Session> {
        let oldest_index = self
            .sessions
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.last_active)
            .map(|(i, _)| i)?;
        Some(self.drop_swap(oldest_index))
    }
}

/// The pair of active/idle tables a broker owns.
#[derive(Debug)]
pub struct SessionTables {
    pub active: SessionTable,
    pub idle: SessionTable,
}

impl SessionTables {
    pub fn new(active_cap: usize, idle_cap: usize) -> Self {
        Self {
            active: SessionTable::new(active_cap),
            idle: SessionTable::new(idle_cap),
        }
    }

    /// Admits a brand-new (non-resuming) connection as an active session.
    pub fn admit_fresh(
        &mut self,
        resume_token: [u8; 32],
        transport: Transport,
        arena_cap: usize,
        arena_min_block: usize,
    ) -> Result<usize, Transport> {
        if self.active.is_full() {
            return Err(transport);
        }
        let session = Session::new(resume_token, transport, arena_cap, arena_min_block);
        self.active
            .emplace(session)
            .map_err(|s| s.transport.expect("fresh session always has a transport"))
    }

    /// Moves an idle session (found by `find_by_token`) back to active,
    /// attaching the new transport and rotating its resume token.
    pub fn resume(
        &mut self,
        idle_index: usize,
        transport: Transport,
        new_resume_token: [u8; 32],
    ) -> Result<usize, Transport> {
        if self.active.is_full() {
            return Err(transport);
        }
        let mut session = self.idle.drop_swap(idle_index);
        session.transport = Some(transport);
        session.resume_token = new_resume_token;
        session.generation = session.generation.wrapping_add(1);
        session.touch();
        self.active
            .emplace(session)
            .map_err(|s| s.transport.expect("resumed session always has a transport"))
    }

    /// Moves an active session to idle: tears down its transport, stamps
    /// a fresh last-active timestamp, and reaps the single oldest idle
    /// entry first if the idle table is already full.
    pub fn move_active_to_idle(&mut self, active_index: usize) {
        let mut session = self.active.drop_swap(active_index);
        session.transport = None;
        session.touch();
        if self.idle.is_full() {
            self.idle.reap_oldest();
        }
        // idle table is sized generously (spec: 2x active cap) so a
        // reap-then-insert should never itself fail; if it somehow does,
        // the session is simply dropped rather than panicking.
        let _ = self.idle.emplace(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream as StdUnixStream;

    fn transport_pair() -> (Transport, Transport) {
        let (a, b) = StdUnixStream::pair().expect("socketpair");
        a.set_nonblocking(true).expect("nonblocking");
        b.set_nonblocking(true).expect("nonblocking");
        (
            Transport {
                stream: UnixStream::from_std(a).expect("tokio stream"),
            },
            Transport {
                stream: UnixStream::from_std(b).expect("tokio stream"),
            },
        )
    }

    #[test]
    fn emplace_respects_capacity() {
        let mut table = SessionTable::new(1);
        let (t1, _t1b) = transport_pair();
        let idx = table
            .emplace(Session::new([1u8; 32], t1, 1024, 1))
            .expect("fits");
        assert_eq!(idx, 0);

        let (t2, _t2b) = transport_pair();
        let rejected = table
            .emplace(Session::new([2u8; 32], t2, 1024, 1))
            .expect_err("table at capacity must reject");
        assert_eq!(rejected.resume_token, [2u8; 32]);
    }

    #[test]
    fn find_by_token_locates_the_right_entry() {
        let mut table = SessionTable::new(4);
        for i in 0..4u8 {
            let (t, _tb) = transport_pair();
            table
                .emplace(Session::new([i; 32], t, 1024, 1))
                .expect("fits");
        }
        assert_eq!(table.find_by_token(&[2u8; 32]), Some(2));
        assert_eq!(table.find_by_token(&[9u8; 32]), None);
    }

    #[test]
    fn drop_swap_reorders_but_preserves_membership() {
        let mut table = SessionTable::new(3);
        for i in 0..3u8 {
            let (t, _tb) = transport_pair();
            table
                .emplace(Session::new([i; 32], t, 1024, 1))
                .expect("fits");
        }
        let removed = table.drop_swap(0);
        assert_eq!(removed.resume_token, [0u8; 32]);
        assert_eq!(table.len(), 2);
        // index 0 now holds what was the last entry (token 2)
        assert_eq!(table.get(0).expect("present").resume_token, [2u8; 32]);
    }

    #[test]
    fn reap_oldest_removes_the_least_recently_active_entry() {
        let mut table = SessionTable::new(4);
        let (t1, _t1b) = transport_pair();
        let (t2, _t2b) = transport_pair();
        let mut first = Session::new([1u8; 32], t1, 1024, 1);
        first.last_active = Instant::now() - std::time::Duration::from_secs(10);
        let second = Session::new([2u8; 32], t2, 1024, 1);
        table.emplace(first).expect("fits");
        table.emplace(second).expect("fits");

        let reaped = table.reap_oldest().expect("has entries");
        assert_eq!(reaped.resume_token, [1u8; 32]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).expect("present").resume_token, [2u8; 32]);
    }

    #[test]
    fn move_active_to_idle_reaps_when_idle_table_is_full() {
        let mut tables = SessionTables::new(2, 1);
        let (t1, _t1b) = transport_pair();
        let (t2, _t2b) = transport_pair();
        let idx1 = tables
            .admit_fresh([1u8; 32], t1, 1024, 1)
            .expect("fits");
        let _idx2 = tables
            .admit_fresh([2u8; 32], t2, 1024, 1)
            .expect("fits");

        tables.move_active_to_idle(idx1);
        assert_eq!(tables.idle.len(), 1);
        assert_eq!(tables.idle.get(0).expect("present").resume_token, [1u8; 32]);

        // idle table (cap 1) is now full; moving the remaining active
        // session to idle must reap the existing idle entry first.
        tables.move_active_to_idle(0);
        assert_eq!(tables.idle.len(), 1);
        assert_eq!(tables.idle.get(0).expect("present").resume_token, [2u8; 32]);
    }

    #[test]
    fn resume_moves_session_back_to_active_and_rotates_token() {
        let mut tables = SessionTables::new(1, 2);
        let (t1, _t1b) = transport_pair();
        let idx = tables.admit_fresh([1u8; 32], t1, 1024, 1).expect("fits");
        tables.move_active_to_idle(idx);

        let idle_idx = tables.idle.find_by_token(&[1u8; 32]).expect("present");
        let (t2, _t2b) = transport_pair();
        let active_idx = tables
            .resume(idle_idx, t2, [9u8; 32])
            .expect("active table has room");
        let session = tables.active.get(active_idx).expect("present");
        assert_eq!(session.resume_token, [9u8; 32]);
        assert!(session.transport.is_some());
        assert_eq!(session.generation, 1);
        assert_eq!(tables.idle.len(), 0);
    }
}
