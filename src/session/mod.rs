// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Session table: the active/idle collections, per-session arenas, and
//! pseudonymization token stores that back connection-oriented sessions.

pub mod arena;
pub mod table;
pub mod token_store;

pub use table::{Session, SessionTable, SessionTables, Transport};
