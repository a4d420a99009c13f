// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Fixed-layout handshake codec: a 72-byte request and a 48-byte response,
//! both big-endian, exchanged once per connection before any framed
//! JSON-RPC traffic begins.

mod status;
mod wire;

pub use status::Status;
pub use wire::{
    HandshakeRequest, HandshakeResponse, MAGIC, REQUEST_LEN, RESPONSE_LEN, VERSION,
    WireDecodeError,
};

bitflags::bitflags! {
    /// Request flag bits (`flags` field of the wire request).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandshakeFlags: u16 {
        /// Set when the peer is attempting to resume a previously idled
        /// session via `resume_token` rather than starting fresh.
        const RESUME = 0b0000_0001;
    }
}

impl HandshakeRequest {
    pub fn wants_resume(&self) -> bool {
        HandshakeFlags::from_bits_truncate(self.flags).contains(HandshakeFlags::RESUME)
    }
}
