// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;
use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use super::Status;

pub const MAGIC: u32 = 0x4D53_5142; // "MSQB"
pub const VERSION: u16 = 1;

pub const REQUEST_LEN: usize = 72;
pub const RESPONSE_LEN: usize = 48;

#[derive(Debug, Error)]
pub enum WireDecodeError {
    #[error("expected {expected} bytes, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("unknown status value {0}")]
    UnknownStatus(u16),
}

#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct RequestWire {
    magic: U32,
    version: U16,
    flags: U16,
    resume_token: [u8; 32],
    secret_token: [u8; 32],
}

#[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
struct ResponseWire {
    magic: U32,
    version: U16,
    status: U16,
    resume_token: [u8; 32],
    idle_ttl_secs: U32,
    abs_ttl_secs: U32,
}

const _: () = assert!(core::mem::size_of::<RequestWire>() == REQUEST_LEN);
const _: () = assert!(core::mem::size_of::<ResponseWire>() == RESPONSE_LEN);

/// In-memory, host-endian view of a handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub resume_token: [u8; 32],
    pub secret_token: [u8; 32],
}

impl HandshakeRequest {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireDecodeError> {
        if bytes.len() != REQUEST_LEN {
            return Err(WireDecodeError::WrongLength {
                expected: REQUEST_LEN,
                got: bytes.len(),
            });
        }
        let wire = RequestWire::read_from_bytes(bytes)
            .expect("length already checked against REQUEST_LEN");
        Ok(Self {
            magic: wire.magic.get(),
            version: wire.version.get(),
            flags: wire.flags.get(),
            resume_token: wire.resume_token,
            secret_token: wire.secret_token,
        })
    }

    pub fn is_well_formed_magic_and_version(&self) -> bool {
        self.magic == MAGIC && self.version == VERSION
    }
}

/// In-memory, host-endian view of a handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub status: Status,
    pub resume_token: [u8; 32],
    pub idle_ttl_secs: u32,
    pub abs_ttl_secs: u32,
}

impl HandshakeResponse {
    pub fn rejection(status: Status) -> Self {
        Self {
            status,
            resume_token: [0u8; 32],
            idle_ttl_secs: 0,
            abs_ttl_secs: 0,
        }
    }

    pub fn encode(&self) -> [u8; RESPONSE_LEN] {
        let wire = ResponseWire {
            magic: U32::new(MAGIC),
            version: U16::new(VERSION),
            status: U16::new(self.status as u16),
            resume_token: self.resume_token,
            idle_ttl_secs: U32::new(self.idle_ttl_secs),
            abs_ttl_secs: U32::new(self.abs_ttl_secs),
        };
        let mut out = [0u8; RESPONSE_LEN];
        out.copy_from_slice(wire.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireDecodeError> {
        if bytes.len() != RESPONSE_LEN {
            return Err(WireDecodeError::WrongLength {
                expected: RESPONSE_LEN,
                got: bytes.len(),
            });
        }
        let wire = ResponseWire::read_from_bytes(bytes)
            .expect("length already checked against RESPONSE_LEN");
        let status = Status::try_from(wire.status.get())
            .map_err(|_| WireDecodeError::UnknownStatus(wire.status.get()))?;
        Ok(Self {
            status,
            resume_token: wire.resume_token,
            idle_ttl_secs: wire.idle_ttl_secs.get(),
            abs_ttl_secs: wire.abs_ttl_secs.get(),
        })
    }
}
